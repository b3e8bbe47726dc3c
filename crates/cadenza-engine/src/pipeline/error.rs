//! Top-level compilation error

use crate::compiler::{BuildError, SerializeError, ValidateError};
use crate::jit::{AllocationError, EmitError, ResolveError, ScheduleError};
use crate::parser::{FrontEndError, LexError, ParseError, Span};
use crate::runtime::{ClassError, HeapError, SymbolError};

/// The first failure of any stage. No bytecode is produced when a
/// compilation returns one of these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// Tokenization failed
    #[error("{0}")]
    Lex(#[from] LexError),

    /// Parsing failed
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// AST or HIR construction failed
    #[error("{0}")]
    Build(#[from] BuildError),

    /// Lowering HIR to LIR failed
    #[error("serialization failed: {0}")]
    Serialize(#[from] SerializeError),

    /// A stage produced output that breaks an invariant
    #[error("{stage} output is invalid: {error}")]
    Validate {
        /// Stage whose output was checked
        stage: &'static str,
        /// The broken invariant
        error: ValidateError,
    },

    /// Register allocation failed
    #[error("register allocation failed: {0}")]
    Allocate(#[from] AllocationError),

    /// Edge resolution failed
    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    /// A parallel move could not be sequentialized
    #[error("move scheduling failed: {0}")]
    Schedule(#[from] ScheduleError),

    /// Code emission failed
    #[error("emission failed: {0}")]
    Emit(EmitError),
}

impl CompileError {
    /// Source location, for errors raised before HIR exists.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex(error) => Some(error.span),
            CompileError::Parse(error) => Some(error.span),
            CompileError::Build(error) => error.span(),
            _ => None,
        }
    }

    /// Name of the failing stage.
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "lex",
            CompileError::Parse(_) => "parse",
            CompileError::Build(_) => "build",
            CompileError::Serialize(_) => "serialize",
            CompileError::Validate { .. } => "validate",
            CompileError::Allocate(_) => "allocate",
            CompileError::Resolve(_) => "resolve",
            CompileError::Schedule(_) => "schedule",
            CompileError::Emit(_) => "emit",
        }
    }

    pub(crate) fn validate(stage: &'static str) -> impl FnOnce(ValidateError) -> CompileError {
        move |error| CompileError::Validate { stage, error }
    }
}

impl From<FrontEndError> for CompileError {
    fn from(error: FrontEndError) -> Self {
        match error {
            FrontEndError::Lex(error) => CompileError::Lex(error),
            FrontEndError::Parse(error) => CompileError::Parse(error),
        }
    }
}

impl From<EmitError> for CompileError {
    fn from(error: EmitError) -> Self {
        match error {
            EmitError::Schedule(error) => CompileError::Schedule(error),
            error => CompileError::Emit(error),
        }
    }
}

impl From<HeapError> for CompileError {
    fn from(error: HeapError) -> Self {
        CompileError::Build(BuildError::Heap(error))
    }
}

impl From<SymbolError> for CompileError {
    fn from(error: SymbolError) -> Self {
        CompileError::Build(BuildError::Symbol(error))
    }
}

impl From<ClassError> for CompileError {
    fn from(error: ClassError) -> Self {
        CompileError::Build(BuildError::Class(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_schedule_error_maps_to_schedule() {
        let error: CompileError = EmitError::Schedule(ScheduleError::SpillOutOfRange(7)).into();
        assert!(matches!(error, CompileError::Schedule(ScheduleError::SpillOutOfRange(7))));
        assert_eq!(error.stage(), "schedule");

        let error: CompileError = EmitError::Overflow { capacity: 8 }.into();
        assert!(matches!(error, CompileError::Emit(EmitError::Overflow { capacity: 8 })));
    }

    #[test]
    fn test_front_end_error_keeps_span() {
        let span = Span::new(3, 4, 1, 4);
        let error: CompileError = FrontEndError::Parse(ParseError::invalid_syntax("bad", span)).into();
        assert_eq!(error.span(), Some(span));
        assert_eq!(error.stage(), "parse");
    }
}
