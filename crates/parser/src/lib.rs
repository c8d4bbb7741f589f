mod db;
pub mod lexer;
pub mod parser;

pub use db::ParserDatabaseImpl;

// Database trait for anything that needs parsed cells
#[salsa::db]
pub trait Db: salsa::Database {}

#[salsa::db]
impl Db for ParserDatabaseImpl {}

pub use parser::{
    parse_cell, parse_expression, parse_source, Argument, BinaryOp, CellSource, Expression,
    FunctionDef, Literal, Module, Parameter, ParsedCell, Spanned, Statement, UnaryOp,
};
