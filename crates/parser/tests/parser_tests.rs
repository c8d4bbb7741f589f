use cellflow_diagnostics::DiagnosticCode;
use cellflow_parser::{
    parse_cell, parse_source, Argument, CellSource, Db as ParserDb, Expression, Statement,
};
use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use salsa::Setter;

#[salsa::db]
#[derive(Clone, Default)]
pub struct TestDb {
    storage: salsa::Storage<Self>,
}

#[salsa::db]
impl salsa::Database for TestDb {}
#[salsa::db]
impl ParserDb for TestDb {}

fn statement_kinds(code: &str) -> Vec<&'static str> {
    let parsed = parse_source(code);
    assert!(!parsed.has_errors(), "{:?}", parsed.diagnostics);
    parsed
        .module
        .body
        .iter()
        .map(|stmt| match stmt.value() {
            Statement::Expression(_) => "expr",
            Statement::Assign { .. } => "assign",
            Statement::AugAssign { .. } => "aug_assign",
            Statement::FunctionDef(_) => "def",
            Statement::Return(_) => "return",
            Statement::If { .. } => "if",
            Statement::For { .. } => "for",
            Statement::While { .. } => "while",
            Statement::Delete(_) => "del",
            Statement::Import { .. } => "import",
            Statement::Pass => "pass",
        })
        .collect()
}

/// `test_name: kind, kind, ...` for the statements of `code`
fn summary(test_name: &str, code: &str) -> String {
    let local = test_name.rsplit("::").next().unwrap_or(test_name);
    format!("{local}: {}", statement_kinds(code).join(", "))
}

#[test]
fn notebook_style_cell() {
    let code = r#"
import pandas as pd
df = pd.read_csv("data.csv")   # load
df["total"] = df.price * df.qty
def summarize(frame, col="total") {
    if not frame {
        pass
    }
    return frame[col].sum()
}
"#;
    assert_snapshot!(
        summary(stdext::function_name!(), code),
        @"notebook_style_cell: import, assign, assign, def"
    );
}

#[test]
fn loops_and_augmented_assignment() {
    let code = "total = 0\nfor i, v in enumerate(xs) {\n  total += v * i\n}\nwhile total > 10 { total -= 1 }\n";
    assert_snapshot!(
        summary(stdext::function_name!(), code),
        @"loops_and_augmented_assignment: assign, for, while"
    );
}

#[test]
fn multiline_call_arguments() {
    let parsed = parse_source("plot(\n  x,\n  y=ys,\n)\n");
    assert!(!parsed.has_errors());
    let Statement::Expression(expr) = parsed.module.body[0].value() else {
        panic!("expected expression statement");
    };
    let Expression::Call { args, .. } = expr.value() else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 2);
    assert!(matches!(&args[1], Argument::Keyword { name, .. } if name.value() == "y"));
}

#[test]
fn lambda_and_dict_literals() {
    assert_eq!(
        statement_kinds("f = lambda a, b: a + b\ncfg = {\"k\": 1, \"j\": f(1, 2)}"),
        vec!["assign", "assign"]
    );
}

#[test]
fn unterminated_input_reports_end_of_input() {
    let parsed = parse_source("def f(x) {\n  return x\n");
    assert!(parsed.has_errors());
    assert!(parsed
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::UnexpectedEndOfInput));
}

#[test]
fn unexpected_token_is_reported() {
    let parsed = parse_source("x = = 1");
    assert!(parsed.has_errors());
    assert_eq!(parsed.diagnostics[0].code, DiagnosticCode::UnexpectedToken);
}

#[test]
fn edits_reparse_only_the_edited_cell() {
    let mut db = TestDb::default();
    let first = CellSource::new(&db, "a = 1".to_string());
    let second = CellSource::new(&db, "b = a".to_string());
    assert_eq!(parse_cell(&db, first).module.body.len(), 1);
    assert_eq!(parse_cell(&db, second).module.body.len(), 1);

    second.set_text(&mut db).to("b = a\nc = b".to_string());
    assert_eq!(parse_cell(&db, first).module.body.len(), 1);
    assert_eq!(parse_cell(&db, second).module.body.len(), 2);

    second.set_text(&mut db).to("c = (".to_string());
    assert!(parse_cell(&db, second).has_errors());
    assert!(parse_cell(&db, second).module().is_none());
}
