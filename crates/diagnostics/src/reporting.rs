//! Rendering of diagnostics against the cell source they were produced for.

use crate::Diagnostic;
use ariadne::{Label, Report, Source};

/// Build a formatted message for a diagnostic
pub fn build_diagnostic_message(source: &str, diagnostic: &Diagnostic, with_color: bool) -> String {
    let mut write_buffer = Vec::new();
    let code_u32: u32 = diagnostic.code.into();
    let mut report = Report::build(
        diagnostic.severity.into(),
        ((), diagnostic.span.into_range()),
    )
    .with_config(
        ariadne::Config::new()
            .with_index_type(ariadne::IndexType::Byte)
            .with_color(with_color),
    )
    .with_code(code_u32)
    .with_message(&diagnostic.message)
    .with_label(Label::new(((), diagnostic.span.into_range())).with_message(&diagnostic.message));
    for (span, message) in &diagnostic.related_spans {
        report = report.with_label(Label::new(((), span.into_range())).with_message(message));
    }
    if report
        .finish()
        .write(Source::from(source), &mut write_buffer)
        .is_err()
    {
        return diagnostic.to_string();
    }
    String::from_utf8_lossy(&write_buffer).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::span::SimpleSpan;

    #[test]
    fn renders_code_and_message() {
        let source = "x = (1 +\n";
        let diag = Diagnostic::syntax_error("unclosed parenthesis".to_string(), SimpleSpan::from(4..5));
        let rendered = build_diagnostic_message(source, &diag, false);
        assert!(rendered.contains("[02] Error"));
        assert!(rendered.contains("unclosed parenthesis"));
    }
}
