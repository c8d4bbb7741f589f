//! # Synthetic tracing
//!
//! Derives the trace a cell would plausibly emit from its syntax alone and
//! replays it through [`Session::handle_event`]. There is no evaluation: `if`
//! statements take their then-branch, loops run their body once, and every
//! store binds a fresh value except a plain `a = b`, which aliases `b`.

use cellflow_analysis::{compute_live_dead_refs, LivenessOptions, SymbolRef};
use cellflow_parser::{Expression, Spanned, Statement};

use crate::error::Result;
use crate::session::{Precheck, Session};
use crate::trace::{StoreKind, TraceEvent};

/// Method names treated as changing their receiver in place
pub const MUTATING_METHODS: &[&str] = &[
    "append",
    "extend",
    "insert",
    "pop",
    "remove",
    "clear",
    "update",
    "add",
    "sort",
    "reverse",
    "setdefault",
    "discard",
];

/// The receiver of a trailing mutating method call, e.g. `xs` for
/// `xs.append(1)`
fn mutated_receiver(reference: &SymbolRef) -> Option<SymbolRef> {
    let (last, _) = reference.chain().split_last()?;
    let method = last.as_name()?;
    if !last.is_callpoint || reference.is_simple_name() || !MUTATING_METHODS.contains(&method) {
        return None;
    }
    reference.prefixes().pop()
}

/// The called prefix of a reference: `obj.method()` for `obj.method().x`
fn callee(reference: &SymbolRef) -> Option<SymbolRef> {
    let position = reference
        .chain()
        .iter()
        .position(|atom| atom.is_callpoint)?;
    if position + 1 == reference.chain().len() {
        Some(reference.clone())
    } else {
        reference.prefixes().into_iter().nth(position)
    }
}

struct SyntheticTracer<'a> {
    session: &'a mut Session,
    call_depth: usize,
}

impl SyntheticTracer<'_> {
    fn emit(&mut self, event: TraceEvent) -> Result<()> {
        self.session.handle_event(event)
    }

    fn run_block(&mut self, block: &[Spanned<Statement>]) -> Result<()> {
        block.iter().try_for_each(|stmt| self.run_statement(stmt))
    }

    fn run_statement(&mut self, stmt: &Spanned<Statement>) -> Result<()> {
        match stmt.value() {
            Statement::If {
                condition,
                then_block,
                ..
            } => {
                self.load_expression(condition)?;
                self.run_block(then_block)
            }
            Statement::For { target, iter, body } => {
                self.load_expression(iter)?;
                self.store_target(target, None)?;
                self.run_block(body)
            }
            Statement::While { condition, body } => {
                self.load_expression(condition)?;
                self.run_block(body)
            }
            Statement::Assign { targets, value } => {
                self.load_statement(stmt)?;
                let source = match value.value() {
                    Expression::Identifier { name, .. } => Some(SymbolRef::name(name.value().clone())),
                    _ => None,
                };
                targets
                    .iter()
                    .try_for_each(|target| self.store_target(target, source.as_ref()))
            }
            Statement::AugAssign { target, .. } => {
                self.load_statement(stmt)?;
                self.store_target(target, None)
            }
            Statement::FunctionDef(def) => {
                self.load_statement(stmt)?;
                self.store(
                    SymbolRef::name(def.name.value().clone()),
                    None,
                    StoreKind::FunctionDefinition,
                )
            }
            Statement::Import { module, alias } => {
                let bound = alias.as_ref().map_or_else(
                    || module.value().split('.').next().unwrap_or_default().to_string(),
                    |alias| alias.value().clone(),
                );
                self.store(SymbolRef::name(bound), None, StoreKind::Import)
            }
            Statement::Delete(targets) => {
                for target in targets {
                    if let Ok(target) = SymbolRef::try_from(target.value()) {
                        self.emit(TraceEvent::Delete { target })?;
                    }
                }
                Ok(())
            }
            Statement::Expression(_) | Statement::Return(_) => self.load_statement(stmt),
            Statement::Pass => Ok(()),
        }
    }

    fn load_expression(&mut self, expr: &Spanned<Expression>) -> Result<()> {
        let stmt = Spanned::new(Statement::Expression(expr.clone()), expr.span());
        self.load_statement(&stmt)
    }

    /// Loads for everything `stmt` reads, calls into tracked functions, and
    /// in-place mutations through well-known methods
    fn load_statement(&mut self, stmt: &Spanned<Statement>) -> Result<()> {
        let liveness =
            compute_live_dead_refs(std::slice::from_ref(stmt), LivenessOptions::default());
        let mut mutated = Vec::new();
        for live in liveness.live {
            let reference = live.reference;
            self.emit(TraceEvent::Load {
                reference: reference.clone(),
            })?;
            self.follow_call(&reference)?;
            mutated.extend(mutated_receiver(&reference));
        }
        for target in mutated {
            self.emit(TraceEvent::Mutate { target })?;
        }
        Ok(())
    }

    /// Step into a tracked function and load what its body reads
    fn follow_call(&mut self, reference: &SymbolRef) -> Result<()> {
        if self.call_depth >= self.session.settings.max_call_depth {
            return Ok(());
        }
        let Some(function) = callee(reference) else {
            return Ok(());
        };
        let Some((scope, _)) = self.session.execution_state() else {
            return Ok(());
        };
        let def = self
            .session
            .symbols
            .resolve(scope, &function)
            .and_then(|resolution| self.session.symbols.symbol(resolution.symbol).function.as_ref())
            .map(|info| info.def.clone());
        let Some(def) = def else {
            return Ok(());
        };

        self.emit(TraceEvent::CallEntry { function })?;
        self.call_depth += 1;
        let params = def.params.iter().map(|param| param.name.value().clone());
        let body = compute_live_dead_refs(&def.body, LivenessOptions::default().with_init_killed(params));
        for live in body.live {
            self.emit(TraceEvent::Load {
                reference: live.reference.clone(),
            })?;
            self.follow_call(&live.reference)?;
        }
        self.call_depth -= 1;
        self.emit(TraceEvent::CallExit)
    }

    fn store_target(&mut self, target: &Spanned<Expression>, source: Option<&SymbolRef>) -> Result<()> {
        match target.value() {
            Expression::Tuple(items) | Expression::List(items) => items
                .iter()
                .try_for_each(|item| self.store_target(item, None)),
            expr => match SymbolRef::try_from(expr) {
                Ok(reference) => self.store(reference, source, StoreKind::Plain),
                Err(()) => {
                    tracing::warn!("unsupported assignment target");
                    Ok(())
                }
            },
        }
    }

    fn store(&mut self, target: SymbolRef, source: Option<&SymbolRef>, kind: StoreKind) -> Result<()> {
        let aliased = source.and_then(|source| {
            let (scope, _) = self.session.execution_state()?;
            let symbol = self.session.symbols.resolve_symbol(scope, source)?;
            Some(self.session.symbols.symbol(symbol).value)
        });
        let value = match aliased {
            Some(value) => value,
            None => self.session.fresh_value(),
        };
        self.emit(TraceEvent::Store {
            target,
            value,
            kind,
        })
    }
}

impl Session {
    /// Execute `content` as a new version of `cell_id`, replaying a trace
    /// derived from its syntax
    pub fn execute_cell(&mut self, cell_id: &str, content: &str) -> Result<Precheck> {
        let precheck = self.begin_cell(cell_id, content)?;
        let module = self
            .execution
            .as_ref()
            .map(|execution| execution.module.clone())
            .unwrap_or_default();
        let mut tracer = SyntheticTracer {
            session: self,
            call_depth: 0,
        };
        for (index, stmt) in module.body.iter().enumerate() {
            tracer.emit(TraceEvent::StatementStarted { index })?;
            tracer.run_statement(stmt)?;
            tracer.emit(TraceEvent::StatementFinished)?;
        }
        self.end_cell()?;
        Ok(precheck)
    }
}
