//! Symbol references: the attribute/subscript chains a statement reads or writes.
//!
//! A reference is a root name followed by zero or more segments, e.g. `df.cols[0]`
//! or `model.fit()`. Every atom remembers whether the value it denotes is called
//! right afterwards (a *callpoint*) and whether it was written with the reactive
//! `$` marker.

use std::fmt;

use cellflow_diagnostics::Diagnostic;
use cellflow_parser::{parse_expression, Expression, Literal, UnaryOp};
use smallvec::SmallVec;

/// One link of a reference chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AtomKind {
    /// The leading name of the chain
    Name(String),
    /// `.field`
    Attribute(String),
    /// `[0]`, `[-1]`
    IntSubscript(i64),
    /// `["key"]`
    StrSubscript(String),
    /// A subscript whose key is only known at run time, e.g. `xs[i]`
    DynamicSubscript,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom {
    pub kind: AtomKind,
    pub is_callpoint: bool,
    pub is_reactive: bool,
}

impl Atom {
    pub const fn new(kind: AtomKind) -> Self {
        Self {
            kind,
            is_callpoint: false,
            is_reactive: false,
        }
    }

    /// The attribute or name this atom refers to, if any
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            AtomKind::Name(name) | AtomKind::Attribute(name) => Some(name),
            _ => None,
        }
    }
}

/// A chain of atoms rooted at a name.
///
/// The chain always holds at least its root atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolRef {
    chain: SmallVec<[Atom; 2]>,
}

impl SymbolRef {
    /// A reference to a plain name
    pub fn name(name: impl Into<String>) -> Self {
        let mut chain = SmallVec::new();
        chain.push(Atom::new(AtomKind::Name(name.into())));
        Self { chain }
    }

    /// Parse a host-provided string such as `"a.b[0]"`
    pub fn parse(text: &str) -> Result<Self, Diagnostic> {
        let expr = parse_expression(text).map_err(|_| Diagnostic::invalid_symbol_reference(text))?;
        Self::try_from(expr.value()).map_err(|()| Diagnostic::invalid_symbol_reference(text))
    }

    pub fn with_attribute(self, attr: impl Into<String>) -> Self {
        self.push(AtomKind::Attribute(attr.into()))
    }

    pub fn with_int_subscript(self, index: i64) -> Self {
        self.push(AtomKind::IntSubscript(index))
    }

    pub fn with_str_subscript(self, key: impl Into<String>) -> Self {
        self.push(AtomKind::StrSubscript(key.into()))
    }

    pub fn with_dynamic_subscript(self) -> Self {
        self.push(AtomKind::DynamicSubscript)
    }

    /// Mark the last atom as called
    pub fn called(mut self) -> Self {
        if let Some(last) = self.chain.last_mut() {
            last.is_callpoint = true;
        }
        self
    }

    /// Mark the root as a reactive (`$x`) reference
    pub fn reactive(mut self) -> Self {
        self.chain[0].is_reactive = true;
        self
    }

    fn push(mut self, kind: AtomKind) -> Self {
        self.chain.push(Atom::new(kind));
        self
    }

    pub fn chain(&self) -> &[Atom] {
        &self.chain
    }

    pub fn root(&self) -> &Atom {
        &self.chain[0]
    }

    pub fn root_name(&self) -> &str {
        match &self.chain[0].kind {
            AtomKind::Name(name) => name,
            // Constructors only ever root a chain at a name
            _ => "",
        }
    }

    /// Whether this is a bare name without attribute or subscript segments
    pub fn is_simple_name(&self) -> bool {
        self.chain.len() == 1
    }

    pub fn is_reactive(&self) -> bool {
        self.chain.iter().any(|atom| atom.is_reactive)
    }

    pub fn has_callpoint(&self) -> bool {
        self.chain.iter().any(|atom| atom.is_callpoint)
    }

    /// The same chain with every reactive marker cleared
    pub fn nonreactive(&self) -> Self {
        let mut chain = self.chain.clone();
        for atom in &mut chain {
            atom.is_reactive = false;
        }
        Self { chain }
    }

    /// The root name as a reference of its own, keeping its callpoint flag
    pub fn leading(&self) -> Self {
        let mut root = self.chain[0].clone();
        root.is_reactive = false;
        let mut chain = SmallVec::new();
        chain.push(root);
        Self { chain }
    }

    /// Every proper prefix of the chain, shortest first.
    ///
    /// For `x.y.z` this returns `[x, x.y]`.
    pub fn prefixes(&self) -> Vec<Self> {
        (1..self.chain.len())
            .map(|len| Self {
                chain: self.chain[..len].iter().cloned().collect(),
            })
            .collect()
    }
}

impl TryFrom<&Expression> for SymbolRef {
    type Error = ();

    fn try_from(expr: &Expression) -> Result<Self, ()> {
        match expr {
            Expression::Identifier { name, reactive } => {
                let symbol_ref = Self::name(name.value().clone());
                Ok(if *reactive {
                    symbol_ref.reactive()
                } else {
                    symbol_ref
                })
            }
            Expression::MemberAccess { object, field } => {
                Ok(Self::try_from(object.value())?.with_attribute(field.value().clone()))
            }
            Expression::Subscript { object, index } => {
                let base = Self::try_from(object.value())?;
                Ok(match index.value() {
                    Expression::Literal(Literal::Int(i)) => base.with_int_subscript(*i),
                    Expression::Literal(Literal::Str(s)) => base.with_str_subscript(s.clone()),
                    Expression::UnaryOp {
                        op: UnaryOp::Neg,
                        expr,
                    } => match expr.value() {
                        Expression::Literal(Literal::Int(i)) => base.with_int_subscript(-*i),
                        _ => base.with_dynamic_subscript(),
                    },
                    _ => base.with_dynamic_subscript(),
                })
            }
            Expression::Call { callee, .. } => Ok(Self::try_from(callee.value())?.called()),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for atom in &self.chain {
            match &atom.kind {
                AtomKind::Name(name) => {
                    if atom.is_reactive {
                        write!(f, "$")?;
                    }
                    write!(f, "{name}")?;
                }
                AtomKind::Attribute(attr) => write!(f, ".{attr}")?,
                AtomKind::IntSubscript(i) => write!(f, "[{i}]")?,
                AtomKind::StrSubscript(key) => write!(f, "[{key:?}]")?,
                AtomKind::DynamicSubscript => write!(f, "[?]")?,
            }
            if atom.is_callpoint {
                write!(f, "()")?;
            }
        }
        Ok(())
    }
}

/// A reference read by the statement at `stmt_index` of the analyzed block
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveSymbolRef {
    pub reference: SymbolRef,
    pub stmt_index: usize,
}

impl LiveSymbolRef {
    pub const fn new(reference: SymbolRef, stmt_index: usize) -> Self {
        Self {
            reference,
            stmt_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_name() {
        let r = SymbolRef::name("x");
        assert!(r.is_simple_name());
        assert_eq!(r.root_name(), "x");
        assert_eq!(r.to_string(), "x");
    }

    #[test]
    fn test_display_chain() {
        let r = SymbolRef::name("a")
            .with_attribute("b")
            .with_int_subscript(0)
            .called();
        assert_eq!(r.to_string(), "a.b[0]()");
        assert!(r.has_callpoint());
    }

    #[test]
    fn test_parse_matches_builder() {
        let parsed = SymbolRef::parse("df[\"col\"].mean()").unwrap();
        let built = SymbolRef::name("df")
            .with_str_subscript("col")
            .with_attribute("mean")
            .called();
        assert_eq!(parsed, built);
    }

    #[test]
    fn test_parse_negative_and_dynamic_subscripts() {
        assert_eq!(
            SymbolRef::parse("xs[-1]").unwrap(),
            SymbolRef::name("xs").with_int_subscript(-1)
        );
        assert_eq!(
            SymbolRef::parse("xs[i]").unwrap().to_string(),
            "xs[?]"
        );
    }

    #[test]
    fn test_parse_rejects_non_references() {
        assert!(SymbolRef::parse("1 + 2").is_err());
        assert!(SymbolRef::parse("x = 1").is_err());
        assert!(SymbolRef::parse("[1, 2][0]").is_err());
    }

    #[test]
    fn test_reactive_marker() {
        let r = SymbolRef::parse("$x.y").unwrap();
        assert!(r.is_reactive());
        assert_eq!(r.to_string(), "$x.y");
        assert_eq!(r.nonreactive().to_string(), "x.y");
        assert_eq!(r.leading(), SymbolRef::name("x"));
    }

    #[test]
    fn test_prefixes() {
        let r = SymbolRef::name("x").with_attribute("y").with_attribute("z");
        let prefixes: Vec<String> = r.prefixes().iter().map(ToString::to_string).collect();
        assert_eq!(prefixes, vec!["x", "x.y"]);
    }
}
