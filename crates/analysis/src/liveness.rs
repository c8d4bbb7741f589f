//! # Liveness analysis
//!
//! Computes, for a block of statements, which references are read before being
//! overwritten (*live*) and which are overwritten (*dead*).
//!
//! The traversal follows evaluation order: an assignment's right-hand side is
//! visited before its targets are killed, so `x = x + 1` reads and kills `x`.
//! Attribute, subscript and call chains are collapsed into a single
//! [`SymbolRef`]; a chain is dropped from the live set when its root name has
//! already been killed earlier in the block.
//!
//! The analyzer never touches symbol state. Resolving live references against
//! the session's symbols, and following calls into function bodies, happens in
//! the dataflow crate.

use std::collections::BTreeSet;

use cellflow_diagnostics::Diagnostic;
use cellflow_parser::{Expression, ParsedCell, Spanned, Statement};

use crate::symbol_ref::{LiveSymbolRef, SymbolRef};
use crate::visitor::{walk_arguments, walk_expr, walk_stmt, Visitor};

/// Decides whether a plain rebind `target = source` should leave `source` out of
/// the live set, e.g. because both already refer to the same value.
pub trait RebindOracle {
    fn suppress_rebind(&self, target: &SymbolRef, source: &SymbolRef) -> bool;
}

#[derive(Default)]
pub struct LivenessOptions<'a> {
    /// References considered killed before the first statement (e.g. parameters)
    pub init_killed: BTreeSet<SymbolRef>,
    pub rebind_oracle: Option<&'a dyn RebindOracle>,
}

impl<'a> LivenessOptions<'a> {
    pub fn with_init_killed(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.init_killed
            .extend(names.into_iter().map(SymbolRef::name));
        self
    }

    pub fn with_rebind_oracle(mut self, oracle: &'a dyn RebindOracle) -> Self {
        self.rebind_oracle = Some(oracle);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessResult {
    pub live: BTreeSet<LiveSymbolRef>,
    pub dead: BTreeSet<SymbolRef>,
    /// Warnings about constructs the analysis ignored
    pub diagnostics: Vec<Diagnostic>,
}

/// Analyze a block of statements.
pub fn compute_live_dead_refs(
    body: &[Spanned<Statement>],
    options: LivenessOptions<'_>,
) -> LivenessResult {
    let _span = tracing::trace_span!("liveness", stmts = body.len()).entered();
    let mut visitor = LiveRefsVisitor {
        dead: options.init_killed,
        rebind_oracle: options.rebind_oracle,
        ..Default::default()
    };
    for stmt in body {
        visitor.visit_stmt(stmt);
        visitor.stmt_index += 1;
    }
    LivenessResult {
        live: visitor.live,
        dead: visitor.dead,
        diagnostics: visitor.diagnostics,
    }
}

/// Analyze a parsed cell, refusing cells that failed to parse.
pub fn compute_live_dead_refs_for_cell(
    cell: &ParsedCell,
    options: LivenessOptions<'_>,
) -> Result<LivenessResult, Vec<Diagnostic>> {
    match cell.module() {
        Some(module) => Ok(compute_live_dead_refs(&module.body, options)),
        None => Err(cell.diagnostics.clone()),
    }
}

#[derive(Default)]
struct LiveRefsVisitor<'a> {
    live: BTreeSet<LiveSymbolRef>,
    dead: BTreeSet<SymbolRef>,
    diagnostics: Vec<Diagnostic>,
    rebind_oracle: Option<&'a dyn RebindOracle>,
    stmt_index: usize,
    /// Set while visiting the base of a chain that was already recorded whole
    inside_chain: bool,
    skip_simple_names: bool,
}

impl LiveRefsVisitor<'_> {
    fn with_flags(&mut self, inside_chain: bool, skip_simple_names: bool, f: impl FnOnce(&mut Self)) {
        let saved = (self.inside_chain, self.skip_simple_names);
        self.inside_chain = inside_chain;
        self.skip_simple_names = skip_simple_names;
        f(self);
        (self.inside_chain, self.skip_simple_names) = saved;
    }

    /// Run `f` with `names` killed, then forget those kills
    fn scoped(&mut self, names: impl IntoIterator<Item = SymbolRef>, f: impl FnOnce(&mut Self)) {
        let saved = self.dead.clone();
        self.dead.extend(names);
        f(self);
        self.dead = saved;
    }

    fn visit_name(&mut self, name: &str, reactive: bool) {
        if self.skip_simple_names {
            return;
        }
        let symbol_ref = SymbolRef::name(name);
        if self.dead.contains(&symbol_ref) {
            return;
        }
        let symbol_ref = if reactive {
            symbol_ref.reactive()
        } else {
            symbol_ref
        };
        self.live
            .insert(LiveSymbolRef::new(symbol_ref, self.stmt_index));
    }

    fn add_chain_if_eligible(&mut self, expr: &Expression) {
        let Ok(symbol_ref) = SymbolRef::try_from(expr) else {
            return;
        };
        if self.dead.contains(&symbol_ref.nonreactive())
            || self.dead.contains(&SymbolRef::name(symbol_ref.root_name()))
        {
            return;
        }
        self.live
            .insert(LiveSymbolRef::new(symbol_ref, self.stmt_index));
    }

    /// Visit the object a chain hangs off. If the chain was recorded whole, its
    /// simple names must not be recorded again.
    fn visit_chain_base(&mut self, base: &Spanned<Expression>) {
        if SymbolRef::try_from(base.value()).is_ok() {
            self.with_flags(true, true, |this| this.visit_expr(base));
        } else {
            self.with_flags(false, false, |this| this.visit_expr(base));
        }
    }

    fn kill_target(&mut self, target: &Spanned<Expression>) {
        match target.value() {
            Expression::Identifier { name, .. } => {
                self.dead.insert(SymbolRef::name(name.value().clone()));
            }
            Expression::MemberAccess { .. } | Expression::Subscript { .. } => {
                match SymbolRef::try_from(target.value()) {
                    Ok(symbol_ref) => {
                        self.dead.insert(symbol_ref.nonreactive());
                    }
                    Err(()) => self.unsupported_target(target),
                }
                if let Expression::Subscript { index, .. } = target.value() {
                    self.with_flags(false, false, |this| this.visit_expr(index));
                }
            }
            Expression::Tuple(items) | Expression::List(items) => {
                for item in items {
                    self.kill_target(item);
                }
            }
            _ => self.unsupported_target(target),
        }
    }

    fn unsupported_target(&mut self, target: &Spanned<Expression>) {
        tracing::warn!("unsupported assignment target at {:?}", target.span());
        self.diagnostics
            .push(Diagnostic::unsupported_assignment_target(target.span()));
    }

    fn visit_assign(
        &mut self,
        targets: &[Spanned<Expression>],
        value: &Spanned<Expression>,
        aug_target: Option<&Spanned<Expression>>,
    ) {
        let outer_live = std::mem::take(&mut self.live);
        self.visit_expr(value);
        if let Some(target) = aug_target {
            self.visit_expr(target);
        }
        let mut this_live = std::mem::replace(&mut self.live, outer_live);

        let outer_dead = self.dead.clone();
        for target in targets {
            self.kill_target(target);
        }

        if let Some(oracle) = self.rebind_oracle {
            let is_plain_rebind = aug_target.is_none()
                && matches!(
                    value.value(),
                    Expression::Identifier { .. }
                        | Expression::MemberAccess { .. }
                        | Expression::Subscript { .. }
                );
            let mut this_dead = self.dead.difference(&outer_dead);
            if let (true, 1, Some(target), None) =
                (is_plain_rebind, this_live.len(), this_dead.next(), this_dead.next())
            {
                let suppress = this_live
                    .first()
                    .is_some_and(|source| oracle.suppress_rebind(target, &source.reference));
                if suppress {
                    tracing::trace!("suppressing rebind liveness for {target}");
                    this_live.clear();
                }
            }
        }
        self.live.extend(this_live);
    }
}

impl<'ast> Visitor<'ast> for LiveRefsVisitor<'_> {
    fn visit_stmt(&mut self, stmt: &'ast Spanned<Statement>) {
        match stmt.value() {
            Statement::Assign { targets, value } => self.visit_assign(targets, value, None),
            Statement::AugAssign { target, value, .. } => {
                self.visit_assign(std::slice::from_ref(target), value, Some(target));
            }
            Statement::FunctionDef(func) => {
                self.visit_function(func);
                self.dead.insert(SymbolRef::name(func.name.value().clone()));
            }
            Statement::For { target, iter, body } => {
                self.visit_expr(iter);
                self.kill_target(target);
                self.visit_body(body);
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                self.visit_expr(condition);
                let before = self.dead.clone();
                self.visit_body(then_block);
                if let Some(else_block) = else_block {
                    let after_then = std::mem::replace(&mut self.dead, before);
                    self.visit_body(else_block);
                    self.dead.extend(after_then);
                }
            }
            // Deletions are observed through trace events
            Statement::Delete(_) => {}
            Statement::Import { module, alias } => {
                let bound = alias.as_ref().map_or_else(
                    || {
                        module
                            .value()
                            .split('.')
                            .next()
                            .unwrap_or_default()
                            .to_string()
                    },
                    |alias| alias.value().clone(),
                );
                self.dead.insert(SymbolRef::name(bound));
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &'ast Spanned<Expression>) {
        match expr.value() {
            Expression::Identifier { name, reactive } => self.visit_name(name.value(), *reactive),
            Expression::Call { callee, args } => {
                self.with_flags(false, false, |this| walk_arguments(this, args));
                if !self.inside_chain {
                    self.add_chain_if_eligible(expr.value());
                }
                self.visit_chain_base(callee);
            }
            Expression::MemberAccess { object, .. } => {
                if !self.inside_chain {
                    self.add_chain_if_eligible(expr.value());
                }
                self.visit_chain_base(object);
            }
            Expression::Subscript { object, index } => {
                if !self.inside_chain {
                    self.add_chain_if_eligible(expr.value());
                }
                self.visit_chain_base(object);
                self.with_flags(false, false, |this| this.visit_expr(index));
            }
            Expression::Lambda { params, body } => {
                let params = params
                    .iter()
                    .map(|param| SymbolRef::name(param.value().clone()));
                self.scoped(params, |this| {
                    this.with_flags(false, false, |this| this.visit_expr(body));
                });
            }
            Expression::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                self.visit_expr(iter);
                let saved = self.dead.clone();
                self.kill_target(target);
                if let Some(condition) = condition {
                    self.visit_expr(condition);
                }
                self.visit_expr(element);
                self.dead = saved;
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellflow_parser::parse_source;
    use pretty_assertions::assert_eq;

    fn analyze_with(code: &str, options: LivenessOptions<'_>) -> (Vec<String>, Vec<String>) {
        let parsed = parse_source(code);
        let result = compute_live_dead_refs_for_cell(&parsed, options).expect("cell parses");
        let live = result
            .live
            .iter()
            .map(|live| format!("{}@{}", live.reference, live.stmt_index))
            .collect();
        let dead = result.dead.iter().map(ToString::to_string).collect();
        (live, dead)
    }

    fn analyze(code: &str) -> (Vec<String>, Vec<String>) {
        analyze_with(code, LivenessOptions::default())
    }

    #[test]
    fn test_self_referential_update_is_live_and_dead() {
        assert_eq!(analyze("x = x + 1"), (vec!["x@0".into()], vec!["x".into()]));
    }

    #[test]
    fn test_killed_names_are_not_live_later() {
        let (live, dead) = analyze("x = 1\ny = x\nprint(z)");
        assert_eq!(live, vec!["print()@2", "z@2"]);
        assert_eq!(dead, vec!["x", "y"]);
    }

    #[test]
    fn test_chains_are_recorded_whole() {
        let (live, dead) = analyze("a.b.c = d[0]\nprint(df.col.mean())");
        assert_eq!(live, vec!["d[0]@0", "df.col.mean()@1", "print()@1"]);
        assert_eq!(dead, vec!["a.b.c"]);
    }

    #[test]
    fn test_chain_rooted_at_killed_name_is_dropped() {
        let (live, _) = analyze("obj = make()\nobj.x.y");
        assert_eq!(live, vec!["make()@0"]);
    }

    #[test]
    fn test_dynamic_subscript_reads_its_key() {
        let (live, _) = analyze("v = xs[i]");
        assert_eq!(live, vec!["i@0", "xs[?]@0"]);
    }

    #[test]
    fn test_subscript_target_reads_its_key() {
        let (live, dead) = analyze("d[k] = 1");
        assert_eq!(live, vec!["k@0"]);
        assert_eq!(dead, vec!["d[?]"]);
    }

    #[test]
    fn test_lambda_and_comprehension_params_are_scoped() {
        let (live, dead) = analyze("f = lambda a: a + b\nsq = [v * v for v in xs if v > lo]\nv");
        assert_eq!(live, vec!["b@0", "lo@1", "v@2", "xs@1"]);
        assert_eq!(dead, vec!["f", "sq"]);
    }

    #[test]
    fn test_augmented_assignment_reads_and_kills() {
        let (live, dead) = analyze("for i in range(n) {\n  total += i\n}");
        assert_eq!(live, vec!["n@0", "range()@0", "total@0"]);
        assert_eq!(dead, vec!["i", "total"]);
    }

    #[test]
    fn test_branches_are_unioned() {
        let (live, dead) = analyze("if c { x = 1 } else { y = x }");
        assert_eq!(live, vec!["c@0", "x@0"]);
        assert_eq!(dead, vec!["x", "y"]);
    }

    #[test]
    fn test_function_definition_reads_defaults_only() {
        let (live, dead) = analyze("def f(a, b=d) {\n  return a + g\n}");
        assert_eq!(live, vec!["d@0"]);
        assert_eq!(dead, vec!["f"]);
    }

    #[test]
    fn test_function_body_with_parameters_killed() {
        let parsed = parse_source("def f(a) {\n  return a + g(a)\n}");
        let Statement::FunctionDef(func) = parsed.module.body[0].value() else {
            panic!("expected def");
        };
        let result = compute_live_dead_refs(
            &func.body,
            LivenessOptions::default().with_init_killed(["a".to_string()]),
        );
        let live: Vec<String> = result.live.iter().map(|l| l.reference.to_string()).collect();
        assert_eq!(live, vec!["g()"]);
    }

    #[test]
    fn test_imports_bind_alias_or_top_package() {
        let (_, dead) = analyze("import numpy.linalg as la\nimport os.path");
        assert_eq!(dead, vec!["la", "os"]);
    }

    #[test]
    fn test_reactive_reference() {
        let (live, _) = analyze("y = $x + 1");
        assert_eq!(live, vec!["$x@0"]);
    }

    struct AlwaysSuppress;

    impl RebindOracle for AlwaysSuppress {
        fn suppress_rebind(&self, _target: &SymbolRef, _source: &SymbolRef) -> bool {
            true
        }
    }

    #[test]
    fn test_rebind_suppression_only_applies_to_plain_rebinds() {
        let oracle = AlwaysSuppress;
        let opts = || LivenessOptions::default().with_rebind_oracle(&oracle);
        assert_eq!(analyze_with("a = b", opts()), (vec![], vec!["a".into()]));
        assert_eq!(
            analyze_with("a = b.c", opts()),
            (vec![], vec!["a".into()])
        );
        // more than one live reference
        assert_eq!(analyze_with("a = b[i]", opts()).0, vec!["b[?]@0", "i@0"]);
        // not a plain reference on the right-hand side
        assert_eq!(analyze_with("a = b + 1", opts()).0, vec!["b@0"]);
        // more than one target
        assert_eq!(analyze_with("a = c = b", opts()).0, vec!["b@0"]);
        assert_eq!(analyze_with("a += b", opts()).0, vec!["a@0", "b@0"]);
    }

    #[test]
    fn test_unsupported_target_is_reported_and_skipped() {
        let parsed = parse_source("(a + b) = 1");
        let result = compute_live_dead_refs_for_cell(&parsed, LivenessOptions::default()).unwrap();
        assert!(result.dead.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
        assert!(!result.diagnostics[0].is_error());
    }

    #[test]
    fn test_unparseable_cell_is_refused() {
        let parsed = parse_source("x = (");
        assert!(compute_live_dead_refs_for_cell(&parsed, LivenessOptions::default()).is_err());
    }

    #[test]
    fn test_rendering() {
        let (live, dead) = analyze("model.fit(X, y=labels)\nscore = model.score(X)");
        insta::assert_snapshot!(format!("live: {}\ndead: {}", live.join(", "), dead.join(", ")), @r"
        live: X@0, X@1, labels@0, model.fit()@0, model.score()@1
        dead: score
        ");
    }
}
