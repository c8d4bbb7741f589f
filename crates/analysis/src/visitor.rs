//! # AST Visitor
//!
//! Traversal of cell syntax trees, separated from the analyses built on top of it.
//! Each visit method defaults to the matching `walk_*` function, so an analysis only
//! overrides the nodes it cares about and delegates the rest.
//!
//! ```rust,ignore
//! struct NameCollector(Vec<String>);
//!
//! impl<'ast> Visitor<'ast> for NameCollector {
//!     fn visit_expr(&mut self, expr: &'ast Spanned<Expression>) {
//!         if let Expression::Identifier { name, .. } = expr.value() {
//!             self.0.push(name.value().clone());
//!         }
//!         walk_expr(self, expr);
//!     }
//! }
//! ```

use cellflow_parser::{Argument, Expression, FunctionDef, Spanned, Statement};

pub trait Visitor<'ast> {
    /// Visit a sequence of statements
    fn visit_body(&mut self, stmts: &'ast [Spanned<Statement>]) {
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &'ast Spanned<Statement>) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Spanned<Expression>) {
        walk_expr(self, expr);
    }

    /// Visit a function definition. Bodies are not entered by default: a
    /// definition only evaluates its parameter defaults.
    fn visit_function(&mut self, func: &'ast FunctionDef) {
        for param in &func.params {
            if let Some(default) = &param.default {
                self.visit_expr(default);
            }
        }
    }
}

pub fn walk_stmt<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, stmt: &'ast Spanned<Statement>) {
    match stmt.value() {
        Statement::Expression(expr) => visitor.visit_expr(expr),
        Statement::Assign { targets, value } => {
            visitor.visit_expr(value);
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        Statement::AugAssign { target, value, .. } => {
            visitor.visit_expr(value);
            visitor.visit_expr(target);
        }
        Statement::FunctionDef(func) => visitor.visit_function(func),
        Statement::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        Statement::If {
            condition,
            then_block,
            else_block,
        } => {
            visitor.visit_expr(condition);
            visitor.visit_body(then_block);
            if let Some(else_block) = else_block {
                visitor.visit_body(else_block);
            }
        }
        Statement::For { target, iter, body } => {
            visitor.visit_expr(iter);
            visitor.visit_expr(target);
            visitor.visit_body(body);
        }
        Statement::While { condition, body } => {
            visitor.visit_expr(condition);
            visitor.visit_body(body);
        }
        Statement::Delete(targets) => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        Statement::Import { .. } | Statement::Pass => {}
    }
}

pub fn walk_expr<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, expr: &'ast Spanned<Expression>) {
    match expr.value() {
        Expression::Literal(_) | Expression::Identifier { .. } => {}
        Expression::UnaryOp { expr, .. } => visitor.visit_expr(expr),
        Expression::BinaryOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expression::Call { callee, args } => {
            visitor.visit_expr(callee);
            walk_arguments(visitor, args);
        }
        Expression::MemberAccess { object, .. } => visitor.visit_expr(object),
        Expression::Subscript { object, index } => {
            visitor.visit_expr(object);
            visitor.visit_expr(index);
        }
        Expression::List(items) | Expression::Tuple(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        Expression::Dict(entries) => {
            for (key, value) in entries {
                visitor.visit_expr(key);
                visitor.visit_expr(value);
            }
        }
        Expression::Lambda { body, .. } => visitor.visit_expr(body),
        Expression::ListComp {
            element,
            target,
            iter,
            condition,
        } => {
            visitor.visit_expr(iter);
            visitor.visit_expr(target);
            if let Some(condition) = condition {
                visitor.visit_expr(condition);
            }
            visitor.visit_expr(element);
        }
    }
}

pub fn walk_arguments<'ast, V: Visitor<'ast> + ?Sized>(visitor: &mut V, args: &'ast [Argument]) {
    for arg in args {
        visitor.visit_expr(arg.value());
    }
}
