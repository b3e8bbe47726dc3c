//! Source-annotated error reports
//!
//! Renders a [`CompileError`] against the source it came from using
//! `codespan-reporting`. Errors with a span get a labelled excerpt; the rest
//! get a plain header.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::{self, SimpleFile};
use codespan_reporting::term;
use termcolor::{NoColor, WriteColor};

use crate::pipeline::CompileError;

/// One source file and the means to report errors in it.
pub struct Diagnostics {
    file: SimpleFile<String, String>,
    config: term::Config,
}

impl Diagnostics {
    /// Report against `source`, shown under `name`.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            file: SimpleFile::new(name.into(), source.into()),
            config: term::Config::default(),
        }
    }

    /// Build the diagnostic for `error`.
    pub fn diagnostic(&self, error: &CompileError) -> Diagnostic<()> {
        let message = match error {
            CompileError::Lex(error) => error.message.clone(),
            CompileError::Parse(error) => error.message.clone(),
            error => error.to_string(),
        };
        let mut diagnostic = Diagnostic::error()
            .with_message(message)
            .with_code(error.stage());
        if let Some(span) = error.span() {
            let range = span.range();
            if range.end <= self.file.source().len() {
                diagnostic = diagnostic.with_labels(vec![Label::primary((), range)]);
            }
        }
        diagnostic
    }

    /// Write the report for `error` to `writer`.
    pub fn emit(&self, writer: &mut dyn WriteColor, error: &CompileError) -> Result<(), files::Error> {
        term::emit(writer, &self.config, &self.file, &self.diagnostic(error))
    }

    /// The report for `error` as uncolored text.
    pub fn render(&self, error: &CompileError) -> String {
        let mut writer = NoColor::new(Vec::new());
        match self.emit(&mut writer, error) {
            Ok(()) => String::from_utf8_lossy(&writer.into_inner()).into_owned(),
            Err(_) => format!("error: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_interpreter;

    #[test]
    fn test_render_parse_error() {
        let source = "var x = ;";
        let error: CompileError = parse_interpreter(source).unwrap_err().into();
        let report = Diagnostics::new("scratch.scd", source).render(&error);
        assert!(report.contains("error[parse]"));
        assert!(report.contains("scratch.scd:1:"));
    }

    #[test]
    fn test_render_without_span() {
        let error = CompileError::Emit(crate::jit::EmitError::Overflow { capacity: 4 });
        let report = Diagnostics::new("scratch.scd", "nil").render(&error);
        assert!(report.contains("bytecode buffer of 4 bytes overflowed"));
        assert!(!report.contains("scratch.scd:"));
    }

    #[test]
    fn test_diagnostic_labels_lex_error() {
        let source = "\"open";
        let error: CompileError = parse_interpreter(source).unwrap_err().into();
        let diagnostic = Diagnostics::new("scratch.scd", source).diagnostic(&error);
        assert_eq!(diagnostic.labels.len(), 1);
        assert_eq!(diagnostic.code.as_deref(), Some("lex"));
    }
}
