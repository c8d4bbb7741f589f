//! # Diagnostics for Cell Analysis
//!
//! Diagnostics produced while lexing, parsing and analyzing cell contents.
//! A cell with any error-level diagnostic is treated as unparseable and is
//! left out of scheduling passes until its content changes.

use ariadne::ReportKind;
use chumsky::span::SimpleSpan;
use std::fmt;

/// A diagnostic message attached to a span of cell source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: DiagnosticCode,
    pub message: String,
    /// Source span where this diagnostic applies
    pub span: SimpleSpan<usize>,
    /// Optional related spans for additional context
    pub related_spans: Vec<(SimpleSpan<usize>, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl From<DiagnosticSeverity> for ReportKind<'static> {
    fn from(severity: DiagnosticSeverity) -> Self {
        match severity {
            DiagnosticSeverity::Error => ReportKind::Error,
            DiagnosticSeverity::Warning => ReportKind::Warning,
            DiagnosticSeverity::Info => ReportKind::Advice,
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    // Parse-related errors (0-999)
    LexicalError,
    SyntaxError,
    UnexpectedToken,
    UnexpectedEndOfInput,
    InvalidCharacter,

    // Reference-related diagnostics (1000-1999)
    UnsupportedAssignmentTarget,
    InvalidSymbolReference,
}

impl From<DiagnosticCode> for u32 {
    fn from(code: DiagnosticCode) -> Self {
        match code {
            DiagnosticCode::LexicalError => 1,
            DiagnosticCode::SyntaxError => 2,
            DiagnosticCode::UnexpectedToken => 3,
            DiagnosticCode::UnexpectedEndOfInput => 4,
            DiagnosticCode::InvalidCharacter => 5,
            DiagnosticCode::UnsupportedAssignmentTarget => 1001,
            DiagnosticCode::InvalidSymbolReference => 1002,
        }
    }
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(code: DiagnosticCode, message: String) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            code,
            message,
            span: SimpleSpan::from(0..0),
            related_spans: Vec::new(),
        }
    }

    /// Create a warning diagnostic
    pub fn warning(code: DiagnosticCode, message: String) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            code,
            message,
            span: SimpleSpan::from(0..0),
            related_spans: Vec::new(),
        }
    }

    /// Add location information to this diagnostic
    pub const fn with_location(mut self, span: SimpleSpan<usize>) -> Self {
        self.span = span;
        self
    }

    /// Add a related span with context message
    pub fn with_related_span(mut self, span: SimpleSpan<usize>, message: String) -> Self {
        self.related_spans.push((span, message));
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }

    pub fn lexical_error(message: String, span: SimpleSpan<usize>) -> Self {
        Self::error(DiagnosticCode::LexicalError, message).with_location(span)
    }

    pub fn syntax_error(message: String, span: SimpleSpan<usize>) -> Self {
        Self::error(DiagnosticCode::SyntaxError, message).with_location(span)
    }

    pub fn unexpected_token(expected: &str, found: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::UnexpectedToken,
            format!("Expected {expected}, found {found}"),
        )
        .with_location(span)
    }

    pub fn unexpected_end_of_input(expected: &str, span: SimpleSpan<usize>) -> Self {
        Self::error(
            DiagnosticCode::UnexpectedEndOfInput,
            format!("Expected {expected}, found end of input"),
        )
        .with_location(span)
    }

    /// An assignment target that is neither a name, an attribute, a subscript
    /// nor a tuple of those. The target is ignored by liveness analysis.
    pub fn unsupported_assignment_target(span: SimpleSpan<usize>) -> Self {
        Self::warning(
            DiagnosticCode::UnsupportedAssignmentTarget,
            "Unsupported assignment target".to_string(),
        )
        .with_location(span)
    }

    pub fn invalid_symbol_reference(text: &str) -> Self {
        Self::error(
            DiagnosticCode::InvalidSymbolReference,
            format!("'{text}' is not a valid symbol reference"),
        )
        .with_location(SimpleSpan::from(0..text.len()))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        write!(f, " (at {}:{})", self.span.start, self.span.end)?;
        for (span, message) in &self.related_spans {
            write!(f, "\n  note: {} (at {}:{})", message, span.start, span.end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_creation() {
        let span = SimpleSpan::from(10..20);
        let diag = Diagnostic::unexpected_token("expression", "'}'", span);
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.code, DiagnosticCode::UnexpectedToken);
        assert!(diag.message.contains("'}'"));
        assert_eq!(diag.span, span);
        assert!(diag.is_error());
    }

    #[test]
    fn test_warning_is_not_error() {
        let diag = Diagnostic::unsupported_assignment_target(SimpleSpan::from(0..3));
        assert!(!diag.is_error());
        assert_eq!(u32::from(diag.code), 1001);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::syntax_error("unclosed block".to_string(), SimpleSpan::from(5..10))
            .with_related_span(SimpleSpan::from(0..1), "block opened here".to_string());
        insta::assert_snapshot!(diag.to_string(), @r"
        error: unclosed block (at 5:10)
          note: block opened here (at 0:1)
        ");
    }
}
