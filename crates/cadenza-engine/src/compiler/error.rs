//! Errors raised while lowering a parse tree to HIR

use crate::parser::Span;
use crate::runtime::{ClassError, HeapError, SymbolError};

/// AST and HIR construction errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    /// A name that no scope, class, or special binds
    #[error("undefined name '{name}' at {span}")]
    UndefinedName {
        /// The unresolved name
        name: String,
        /// Where it was read
        span: Span,
    },

    /// A construct the parser accepts but the compiler cannot lower here
    #[error("{reason} at {span}")]
    InvalidSyntax {
        /// Why the construct is rejected
        reason: String,
        /// Where it appears
        span: Span,
    },

    /// Interning a name failed
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    /// Allocating a literal failed
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// Registering a class failed
    #[error(transparent)]
    Class(#[from] ClassError),
}

impl BuildError {
    /// Source location, when the error has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            BuildError::UndefinedName { span, .. } | BuildError::InvalidSyntax { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub(crate) fn invalid_syntax(reason: impl Into<String>, span: Span) -> Self {
        BuildError::InvalidSyntax {
            reason: reason.into(),
            span,
        }
    }
}
