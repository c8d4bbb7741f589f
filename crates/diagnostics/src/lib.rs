mod diagnostics;
mod reporting;

pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSeverity};
pub use reporting::build_diagnostic_message;
