//! Per-statement bound and read names, used to wire statement-level static edges.
//!
//! Unlike liveness this pass is flat: a compound statement contributes only its
//! header (`for` target and iterable, `if`/`while` condition), since its body is
//! made of statements of its own.

use std::collections::BTreeSet;

use cellflow_parser::{Expression, FunctionDef, Spanned, Statement};

use crate::visitor::{walk_expr, Visitor};

/// Names bound (`lvals`) and names read (`rvals`) by one statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementEdges {
    pub lvals: BTreeSet<String>,
    pub rvals: BTreeSet<String>,
}

pub fn compute_lvals_rvals(stmt: &Spanned<Statement>) -> StatementEdges {
    let mut collector = LvalRvalCollector::default();
    collector.visit_stmt(stmt);
    collector.edges
}

#[derive(Default)]
struct LvalRvalCollector {
    edges: StatementEdges,
    gather_lvals: bool,
}

impl LvalRvalCollector {
    fn gather(&mut self, lvals: bool, f: impl FnOnce(&mut Self)) {
        let saved = self.gather_lvals;
        self.gather_lvals = lvals;
        f(self);
        self.gather_lvals = saved;
    }

    fn add(&mut self, name: &str) {
        if self.gather_lvals {
            self.edges.lvals.insert(name.to_string());
        } else {
            self.edges.rvals.insert(name.to_string());
        }
    }

    /// Visit `f` with its own read set, then drop the names bound by `bound`
    fn without_bound_names(&mut self, bound: &[&str], f: impl FnOnce(&mut Self)) {
        let outer = std::mem::take(&mut self.edges.rvals);
        self.gather(false, f);
        let inner = std::mem::replace(&mut self.edges.rvals, outer);
        self.edges
            .rvals
            .extend(inner.into_iter().filter(|name| !bound.contains(&name.as_str())));
    }
}

impl<'ast> Visitor<'ast> for LvalRvalCollector {
    fn visit_stmt(&mut self, stmt: &'ast Spanned<Statement>) {
        match stmt.value() {
            Statement::Assign { targets, value } => {
                self.gather(true, |this| {
                    for target in targets {
                        this.visit_expr(target);
                    }
                });
                self.visit_expr(value);
            }
            Statement::AugAssign { target, value, .. } => {
                self.gather(true, |this| this.visit_expr(target));
                self.visit_expr(value);
            }
            Statement::For { target, iter, .. } => {
                self.gather(true, |this| this.visit_expr(target));
                self.visit_expr(iter);
            }
            Statement::If { condition, .. } | Statement::While { condition, .. } => {
                self.visit_expr(condition);
            }
            Statement::FunctionDef(func) => self.visit_function(func),
            Statement::Import { module, alias } => {
                let bound = alias
                    .as_ref()
                    .map(|alias| alias.value().as_str())
                    .or_else(|| module.value().split('.').next());
                if let Some(bound) = bound {
                    self.edges.lvals.insert(bound.to_string());
                }
            }
            Statement::Expression(expr) | Statement::Return(Some(expr)) => self.visit_expr(expr),
            Statement::Return(None) | Statement::Delete(_) | Statement::Pass => {}
        }
    }

    fn visit_function(&mut self, func: &'ast FunctionDef) {
        self.edges.lvals.insert(func.name.value().clone());
        self.gather(false, |this| {
            for param in &func.params {
                if let Some(default) = &param.default {
                    this.visit_expr(default);
                }
            }
        });
    }

    fn visit_expr(&mut self, expr: &'ast Spanned<Expression>) {
        match expr.value() {
            Expression::Identifier { name, .. } => self.add(name.value()),
            Expression::Subscript { object, index } => {
                self.visit_expr(object);
                self.gather(false, |this| this.visit_expr(index));
            }
            Expression::Lambda { params, body } => {
                let bound: Vec<&str> = params.iter().map(|p| p.value().as_str()).collect();
                self.without_bound_names(&bound, |this| this.visit_expr(body));
            }
            Expression::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                self.gather(false, |this| this.visit_expr(iter));
                let mut targets = LvalRvalCollector {
                    gather_lvals: true,
                    ..Default::default()
                };
                targets.visit_expr(target);
                let bound: Vec<&str> = targets.edges.lvals.iter().map(String::as_str).collect();
                self.without_bound_names(&bound, |this| {
                    if let Some(condition) = condition {
                        this.visit_expr(condition);
                    }
                    this.visit_expr(element);
                });
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellflow_parser::parse_source;

    fn edges_per_statement(code: &str) -> Vec<(Vec<String>, Vec<String>)> {
        parse_source(code)
            .module
            .body
            .iter()
            .map(|stmt| {
                let edges = compute_lvals_rvals(stmt);
                (
                    edges.lvals.into_iter().collect(),
                    edges.rvals.into_iter().collect(),
                )
            })
            .collect()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_for_loop_header() {
        let edges = edges_per_statement("for i in range(10) {\n  a = i\n}");
        assert_eq!(edges, vec![(names(&["i"]), names(&["range"]))]);
    }

    #[test]
    fn test_assignments() {
        let edges = edges_per_statement("a = i\nb = a + i\nlst = [a, b]\nd[k] = v");
        assert_eq!(
            edges,
            vec![
                (names(&["a"]), names(&["i"])),
                (names(&["b"]), names(&["a", "i"])),
                (names(&["lst"]), names(&["a", "b"])),
                (names(&["d"]), names(&["k", "v"])),
            ]
        );
    }

    #[test]
    fn test_method_call_reads_receiver() {
        let edges = edges_per_statement("contents = f.read()");
        assert_eq!(edges, vec![(names(&["contents"]), names(&["f"]))]);
    }

    #[test]
    fn test_definitions_and_imports() {
        let edges = edges_per_statement("def g(x=default) { return y }\nimport pandas as pd");
        assert_eq!(
            edges,
            vec![
                (names(&["g"]), names(&["default"])),
                (names(&["pd"]), vec![]),
            ]
        );
    }

    #[test]
    fn test_scoped_names_are_not_read() {
        let edges = edges_per_statement("f = lambda a: a + b\nsq = [v for v in xs]");
        assert_eq!(
            edges,
            vec![
                (names(&["f"]), names(&["b"])),
                (names(&["sq"]), names(&["xs"])),
            ]
        );
    }
}
