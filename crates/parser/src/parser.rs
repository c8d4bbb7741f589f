//! # Cell Parser
//!
//! This module implements the parser for the cell language using the `chumsky` parser
//! combinator library, with Salsa caching of whole-cell parse results. The parser turns
//! the token stream produced by [`crate::lexer::lex`] into a [`Module`]: the ordered list
//! of statements a cell contains.
//!
//! ## Architecture
//!
//! - **Expression parsing**: literals, names (plain and reactive `$x`), calls, attribute
//!   and subscript chains, list/tuple/dict literals, lambdas, list comprehensions and the
//!   usual operator precedence layers.
//! - **Statement parsing**: assignments (chained, tuple and augmented), `def`, `for`,
//!   `while`, `if`/`else`, `return`, `del`, `import` and `pass`. Blocks are delimited by
//!   braces; statements are terminated by newlines or `;`.
//!
//! ## Salsa Integration
//!
//! - **Input type**: [`CellSource`] holds the text of one cell.
//! - **Cached parsing**: [`parse_cell`] is the only tracked function; the AST is a plain
//!   Rust value cached as a single unit. Editing a cell re-parses that cell only.
//!
//! A cell whose parse produced any diagnostic is reported with an empty module so that
//! downstream analysis never sees a partial tree.

use crate::lexer::{lex, TokenType};
use cellflow_diagnostics::Diagnostic;
use chumsky::{input::ValueInput, prelude::*};

#[salsa::input(debug)]
pub struct CellSource {
    #[returns(ref)]
    pub text: String,
}

#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct Spanned<T>(T, SimpleSpan<usize>);

impl<T> Spanned<T> {
    /// Create a new spanned value
    pub const fn new(value: T, span: SimpleSpan<usize>) -> Self {
        Self(value, span)
    }

    /// Get the inner value
    pub const fn value(&self) -> &T {
        &self.0
    }

    /// Get the span
    pub const fn span(&self) -> SimpleSpan<usize> {
        self.1
    }

    /// Destructure into value and span
    pub fn into_parts(self) -> (T, SimpleSpan<usize>) {
        (self.0, self.1)
    }
}

/// Literal values.
///
/// Floats keep their source text so that the AST stays `Eq` and `Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Float(String),
    Str(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum UnaryOp {
    /// Arithmetic negation `-`
    Neg,
    /// Logical negation `not`
    Not,
}

/// Binary operators, also used for augmented assignment (`+=` is `Add`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
}

/// A call argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Argument {
    /// `f(x)`
    Positional(Spanned<Expression>),
    /// `f(key=x)`
    Keyword {
        name: Spanned<String>,
        value: Spanned<Expression>,
    },
}

impl Argument {
    /// The argument's value expression, regardless of how it is passed
    pub const fn value(&self) -> &Spanned<Expression> {
        match self {
            Self::Positional(value) | Self::Keyword { value, .. } => value,
        }
    }
}

/// Represents an expression in the cell language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    /// Literal value (e.g. `42`, `"s"`, `None`)
    Literal(Literal),
    /// Name reference; `reactive` is set for `$name`
    Identifier {
        name: Spanned<String>,
        reactive: bool,
    },
    /// Unary operation (e.g. `-x`, `not done`)
    UnaryOp {
        op: UnaryOp,
        expr: Box<Spanned<Expression>>,
    },
    /// Binary operation (e.g. `a + b`, `x == y`, `p and q`)
    BinaryOp {
        op: BinaryOp,
        left: Box<Spanned<Expression>>,
        right: Box<Spanned<Expression>>,
    },
    /// Call (e.g. `f()`, `obj.method(x, key=y)`)
    Call {
        callee: Box<Spanned<Expression>>,
        args: Vec<Argument>,
    },
    /// Attribute access (e.g. `obj.field`)
    MemberAccess {
        object: Box<Spanned<Expression>>,
        field: Spanned<String>,
    },
    /// Subscript (e.g. `xs[0]`, `d["key"]`, `m[i]`)
    Subscript {
        object: Box<Spanned<Expression>>,
        index: Box<Spanned<Expression>>,
    },
    /// List literal `[a, b]`
    List(Vec<Spanned<Expression>>),
    /// Tuple `(a, b)` or bare `a, b`
    Tuple(Vec<Spanned<Expression>>),
    /// Dict literal `{k: v}`
    Dict(Vec<(Spanned<Expression>, Spanned<Expression>)>),
    /// `lambda a, b: body`
    Lambda {
        params: Vec<Spanned<String>>,
        body: Box<Spanned<Expression>>,
    },
    /// `[element for target in iter if condition]`
    ListComp {
        element: Box<Spanned<Expression>>,
        target: Box<Spanned<Expression>>,
        iter: Box<Spanned<Expression>>,
        condition: Option<Box<Spanned<Expression>>>,
    },
}

/// A function parameter with an optional default value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: Spanned<String>,
    pub default: Option<Spanned<Expression>>,
}

/// Represents a function definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionDef {
    /// The function's name
    pub name: Spanned<String>,
    /// The function's parameters
    pub params: Vec<Parameter>,
    /// The function's body (list of statements)
    pub body: Vec<Spanned<Statement>>,
}

/// Represents a statement in the cell language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    /// Expression evaluated for its effects (e.g. `print(x)`)
    Expression(Spanned<Expression>),
    /// Assignment; several targets for chained `a = b = value`
    Assign {
        targets: Vec<Spanned<Expression>>,
        value: Spanned<Expression>,
    },
    /// Augmented assignment (e.g. `x += 1`)
    AugAssign {
        target: Spanned<Expression>,
        op: BinaryOp,
        value: Spanned<Expression>,
    },
    FunctionDef(FunctionDef),
    Return(Option<Spanned<Expression>>),
    If {
        condition: Spanned<Expression>,
        then_block: Vec<Spanned<Statement>>,
        else_block: Option<Vec<Spanned<Statement>>>,
    },
    For {
        target: Spanned<Expression>,
        iter: Spanned<Expression>,
        body: Vec<Spanned<Statement>>,
    },
    While {
        condition: Spanned<Expression>,
        body: Vec<Spanned<Statement>>,
    },
    /// `del a, b.c`
    Delete(Vec<Spanned<Expression>>),
    /// `import a.b as c`
    Import {
        module: Spanned<String>,
        alias: Option<Spanned<String>>,
    },
    Pass,
}

/// The statements of one cell
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub body: Vec<Spanned<Statement>>,
}

/// Wrapper for the parsed AST result.
///
/// The whole parse result is cached as one unit rather than per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCell {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedCell {
    /// Whether the cell failed to lex or parse
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// The module, or `None` if the cell did not parse
    pub fn module(&self) -> Option<&Module> {
        (!self.has_errors()).then_some(&self.module)
    }
}

/// Parse a cell into a module AST.
///
/// This is the Salsa-tracked entry point: the result is cached until the
/// cell's text changes.
#[salsa::tracked(returns(ref), no_eq)]
pub fn parse_cell(db: &dyn crate::Db, source: CellSource) -> ParsedCell {
    let _span = tracing::trace_span!("parse_cell").entered();
    parse_source(source.text(db))
}

/// Parse cell text without going through the database.
pub fn parse_source(input: &str) -> ParsedCell {
    let (tokens, lexer_errors) = lex(input);
    if !lexer_errors.is_empty() {
        let diagnostics = lexer_errors
            .into_iter()
            .map(|(err, span)| Diagnostic::lexical_error(err.to_string(), span.into()))
            .collect();
        return ParsedCell {
            module: Module::default(),
            diagnostics,
        };
    }

    let token_stream = chumsky::input::Stream::from_iter(
        tokens
            .into_iter()
            .map(|(token, span)| (token, SimpleSpan::from(span))),
    )
    .map((0..input.len()).into(), |(t, s): (_, _)| (t, s));

    match parser().then_ignore(end()).parse(token_stream).into_result() {
        Ok(body) => ParsedCell {
            module: Module { body },
            diagnostics: Vec::new(),
        },
        Err(errs) => {
            tracing::debug!("cell failed to parse with {} error(s)", errs.len());
            ParsedCell {
                module: Module::default(),
                diagnostics: errs.iter().map(rich_to_diagnostic).collect(),
            }
        }
    }
}

/// Parse a standalone expression such as a host-provided symbol reference.
pub fn parse_expression(input: &str) -> Result<Spanned<Expression>, Vec<Diagnostic>> {
    let (tokens, lexer_errors) = lex(input);
    if !lexer_errors.is_empty() {
        return Err(lexer_errors
            .into_iter()
            .map(|(err, span)| Diagnostic::lexical_error(err.to_string(), span.into()))
            .collect());
    }
    let token_stream = chumsky::input::Stream::from_iter(
        tokens
            .into_iter()
            .filter(|(token, _)| *token != TokenType::Newline)
            .map(|(token, span)| (token, SimpleSpan::from(span))),
    )
    .map((0..input.len()).into(), |(t, s): (_, _)| (t, s));

    expression_parser()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.iter().map(rich_to_diagnostic).collect())
}

fn rich_to_diagnostic(err: &Rich<'_, TokenType<'_>>) -> Diagnostic {
    let span = *err.span();
    let expected = err
        .expected()
        .map(|pattern| pattern.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let expected = if expected.is_empty() {
        "something else".to_string()
    } else {
        expected
    };
    match err.found() {
        Some(found) => Diagnostic::unexpected_token(&expected, &format!("'{found}'"), span),
        None => Diagnostic::unexpected_end_of_input(&expected, span),
    }
}

/// Helper enum for handling postfix operations during expression parsing.
///
/// Used to fold chains like `obj.field(x)[0]` left to right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PostfixOp {
    Call(Vec<Argument>),
    Member(Spanned<String>),
    Index(Spanned<Expression>),
}

type ParserExtra<'tokens, 'src> = extra::Err<Rich<'tokens, TokenType<'src>>>;

// ===================
// Parser Implementation
// ===================

/// Creates a spanned identifier parser that captures both the identifier and its span
fn spanned_ident_parser<'tokens, 'src: 'tokens, I>(
) -> impl Parser<'tokens, I, Spanned<String>, ParserExtra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = TokenType<'src>, Span = SimpleSpan>,
{
    select! { TokenType::Identifier(s) => s.to_string() }
        .map_with(|s, extra| Spanned::new(s, extra.span()))
        .labelled("identifier")
}

/// Fold callback shared by every binary precedence layer
fn fold_binary(
    lhs: Spanned<Expression>,
    (op, rhs): (BinaryOp, Spanned<Expression>),
) -> Spanned<Expression> {
    let span = SimpleSpan::from(lhs.span().start..rhs.span().end);
    Spanned::new(
        Expression::BinaryOp {
            op,
            left: Box::new(lhs),
            right: Box::new(rhs),
        },
        span,
    )
}

/// Collapses `a, b` into a tuple and leaves a single expression alone
fn tuple_or_single(
    mut items: Vec<Spanned<Expression>>,
    span: SimpleSpan<usize>,
) -> Spanned<Expression> {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Spanned::new(Expression::Tuple(items), span)
    }
}

/// Creates a parser for expressions with proper operator precedence
fn expression_parser<'tokens, 'src: 'tokens, I>(
) -> impl Parser<'tokens, I, Spanned<Expression>, ParserExtra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = TokenType<'src>, Span = SimpleSpan>,
{
    let spanned_ident = spanned_ident_parser();

    recursive(|expr| {
        let literal = select! {
            TokenType::LiteralInt(n) => Literal::Int(n),
            TokenType::LiteralFloat(s) => Literal::Float(s.to_string()),
            TokenType::LiteralString(s) => Literal::Str(s.to_string()),
            TokenType::True => Literal::Bool(true),
            TokenType::False => Literal::Bool(false),
            TokenType::None => Literal::None,
        }
        .map_with(|lit, extra| Spanned::new(Expression::Literal(lit), extra.span()));

        let ident_expr = select! {
            TokenType::Identifier(s) => (s.to_string(), false),
            TokenType::ReactiveIdentifier(s) => (s.to_string(), true),
        }
        .map_with(|(name, reactive), extra| {
            Spanned::new(
                Expression::Identifier {
                    name: Spanned::new(name, extra.span()),
                    reactive,
                },
                extra.span(),
            )
        })
        .labelled("identifier");

        // "(a)" is a parenthesized expression, "(a, b)" and "()" are tuples
        let paren_expr = expr
            .clone()
            .separated_by(just(TokenType::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(TokenType::LParen), just(TokenType::RParen))
            .map_with(|mut exprs, extra| {
                if exprs.len() == 1 {
                    exprs.remove(0)
                } else {
                    Spanned::new(Expression::Tuple(exprs), extra.span())
                }
            });

        let target_list = expr
            .clone()
            .separated_by(just(TokenType::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .map_with(|items, extra| tuple_or_single(items, extra.span()));

        let list_comp = expr
            .clone()
            .then_ignore(just(TokenType::For))
            .then(target_list)
            .then_ignore(just(TokenType::In))
            .then(expr.clone())
            .then(just(TokenType::If).ignore_then(expr.clone()).or_not())
            .delimited_by(just(TokenType::LBrack), just(TokenType::RBrack))
            .map_with(|(((element, target), iter), condition), extra| {
                Spanned::new(
                    Expression::ListComp {
                        element: Box::new(element),
                        target: Box::new(target),
                        iter: Box::new(iter),
                        condition: condition.map(Box::new),
                    },
                    extra.span(),
                )
            });

        let list = expr
            .clone()
            .separated_by(just(TokenType::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(TokenType::LBrack), just(TokenType::RBrack))
            .map_with(|items, extra| Spanned::new(Expression::List(items), extra.span()));

        let dict = expr
            .clone()
            .then_ignore(just(TokenType::Colon))
            .then(expr.clone())
            .separated_by(just(TokenType::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(TokenType::LBrace), just(TokenType::RBrace))
            .map_with(|entries, extra| Spanned::new(Expression::Dict(entries), extra.span()));

        let lambda = just(TokenType::Lambda)
            .ignore_then(
                spanned_ident
                    .clone()
                    .separated_by(just(TokenType::Comma))
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just(TokenType::Colon))
            .then(expr.clone())
            .map_with(|(params, body), extra| {
                Spanned::new(
                    Expression::Lambda {
                        params,
                        body: Box::new(body),
                    },
                    extra.span(),
                )
            });

        let atom = choice((
            literal,
            ident_expr,
            paren_expr,
            list_comp,
            list,
            dict,
            lambda,
        ))
        .boxed();

        let argument = spanned_ident
            .clone()
            .then_ignore(just(TokenType::Eq))
            .then(expr.clone())
            .map(|(name, value)| Argument::Keyword { name, value })
            .or(expr.clone().map(Argument::Positional));

        // Postfix operations (left-associative): calls, member access, indexing
        let postfix_op = choice((
            argument
                .separated_by(just(TokenType::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(TokenType::LParen), just(TokenType::RParen))
                .map(PostfixOp::Call),
            just(TokenType::Dot)
                .ignore_then(spanned_ident.clone())
                .map(PostfixOp::Member),
            expr.clone()
                .delimited_by(just(TokenType::LBrack), just(TokenType::RBrack))
                .map(PostfixOp::Index),
        ))
        .map_with(|op, extra| (op, extra.span()));

        let call = atom
            .foldl(postfix_op.repeated(), |expr: Spanned<Expression>, (op, op_span): (PostfixOp, SimpleSpan)| {
                let span = SimpleSpan::from(expr.span().start..op_span.end);
                let expr = Box::new(expr);
                let value = match op {
                    PostfixOp::Call(args) => Expression::Call { callee: expr, args },
                    PostfixOp::Member(field) => Expression::MemberAccess {
                        object: expr,
                        field,
                    },
                    PostfixOp::Index(index) => Expression::Subscript {
                        object: expr,
                        index: Box::new(index),
                    },
                };
                Spanned::new(value, span)
            })
            .boxed();

        // Arithmetic negation binds tighter than any binary operator
        let neg = just(TokenType::Minus)
            .map_with(|_, extra| extra.span())
            .repeated()
            .foldr(call, |op_span: SimpleSpan, rhs: Spanned<Expression>| {
                let span = SimpleSpan::from(op_span.start..rhs.span().end);
                Spanned::new(
                    Expression::UnaryOp {
                        op: UnaryOp::Neg,
                        expr: Box::new(rhs),
                    },
                    span,
                )
            });

        let op = |token, op| just(token).to(op);

        let mul = neg.clone().foldl(
            choice((
                op(TokenType::Mul, BinaryOp::Mul),
                op(TokenType::Div, BinaryOp::Div),
                op(TokenType::Percent, BinaryOp::Mod),
            ))
            .then(neg)
            .repeated(),
            fold_binary,
        );

        let add = mul.clone().foldl(
            choice((
                op(TokenType::Plus, BinaryOp::Add),
                op(TokenType::Minus, BinaryOp::Sub),
            ))
            .then(mul)
            .repeated(),
            fold_binary,
        );

        let cmp = add
            .clone()
            .foldl(
                choice((
                    op(TokenType::EqEq, BinaryOp::Eq),
                    op(TokenType::Neq, BinaryOp::Neq),
                    op(TokenType::LessEqual, BinaryOp::LessEqual),
                    op(TokenType::GreaterEqual, BinaryOp::GreaterEqual),
                    op(TokenType::Less, BinaryOp::Less),
                    op(TokenType::Greater, BinaryOp::Greater),
                ))
                .then(add)
                .repeated(),
                fold_binary,
            )
            .boxed();

        let not = just(TokenType::Not)
            .map_with(|_, extra| extra.span())
            .repeated()
            .foldr(cmp, |op_span: SimpleSpan, rhs: Spanned<Expression>| {
                let span = SimpleSpan::from(op_span.start..rhs.span().end);
                Spanned::new(
                    Expression::UnaryOp {
                        op: UnaryOp::Not,
                        expr: Box::new(rhs),
                    },
                    span,
                )
            });

        let and = not.clone().foldl(
            op(TokenType::And, BinaryOp::And).then(not).repeated(),
            fold_binary,
        );

        and.clone()
            .foldl(
                op(TokenType::Or, BinaryOp::Or).then(and).repeated(),
                fold_binary,
            )
            .labelled("expression")
    })
}

/// Creates a parser for single statements (simple and compound)
fn statement_parser<'tokens, 'src: 'tokens, I>(
) -> impl Parser<'tokens, I, Spanned<Statement>, ParserExtra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = TokenType<'src>, Span = SimpleSpan>,
{
    let spanned_ident = spanned_ident_parser();
    let expr = expression_parser();

    recursive(|statement| {
        let block = statement_list(statement)
            .delimited_by(just(TokenType::LBrace), just(TokenType::RBrace))
            .boxed();

        // Bare tuples are allowed on either side of `=` and after `return`/`for`
        let expr_list = expr
            .clone()
            .separated_by(just(TokenType::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .map_with(|items, extra| tuple_or_single(items, extra.span()));

        let pass_stmt = just(TokenType::Pass).to(Statement::Pass);

        let return_stmt = just(TokenType::Return)
            .ignore_then(expr_list.clone().or_not())
            .map(Statement::Return);

        let del_stmt = just(TokenType::Del)
            .ignore_then(
                expr.clone()
                    .separated_by(just(TokenType::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map(Statement::Delete);

        let dotted_name = spanned_ident
            .clone()
            .map(|name| name.value().clone())
            .separated_by(just(TokenType::Dot))
            .at_least(1)
            .collect::<Vec<String>>()
            .map_with(|parts, extra| Spanned::new(parts.join("."), extra.span()));

        let import_stmt = just(TokenType::Import)
            .ignore_then(dotted_name)
            .then(just(TokenType::As).ignore_then(spanned_ident.clone()).or_not())
            .map(|(module, alias)| Statement::Import { module, alias });

        let aug_op = choice((
            just(TokenType::PlusEq).to(BinaryOp::Add),
            just(TokenType::MinusEq).to(BinaryOp::Sub),
            just(TokenType::MulEq).to(BinaryOp::Mul),
            just(TokenType::DivEq).to(BinaryOp::Div),
        ));

        let aug_assign = expr
            .clone()
            .then(aug_op)
            .then(expr_list.clone())
            .map(|((target, op), value)| Statement::AugAssign { target, op, value });

        // a = b = value
        let assign = expr_list
            .clone()
            .then(
                just(TokenType::Eq)
                    .ignore_then(expr_list.clone())
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map(|(first, mut rest)| {
                // `at_least(1)` guarantees a value on the right-hand side
                let value = rest.pop().unwrap_or_else(|| first.clone());
                let mut targets = vec![first];
                targets.extend(rest);
                Statement::Assign { targets, value }
            });

        let expr_stmt = expr_list.clone().map(Statement::Expression);

        let parameter = spanned_ident
            .clone()
            .then(just(TokenType::Eq).ignore_then(expr.clone()).or_not())
            .map(|(name, default)| Parameter { name, default });

        let def_stmt = just(TokenType::Def)
            .ignore_then(spanned_ident.clone())
            .then(
                parameter
                    .separated_by(just(TokenType::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(TokenType::LParen), just(TokenType::RParen)),
            )
            .then(block.clone())
            .map(|((name, params), body)| Statement::FunctionDef(FunctionDef { name, params, body }));

        let for_stmt = just(TokenType::For)
            .ignore_then(expr_list.clone())
            .then_ignore(just(TokenType::In))
            .then(expr_list.clone())
            .then(block.clone())
            .map(|((target, iter), body)| Statement::For { target, iter, body });

        let while_stmt = just(TokenType::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(condition, body)| Statement::While { condition, body });

        // `else if` chains nest as a single-statement else block
        let if_stmt = recursive(|if_stmt| {
            just(TokenType::If)
                .ignore_then(expr.clone())
                .then(block.clone())
                .then(
                    just(TokenType::Else)
                        .ignore_then(block.clone().or(if_stmt.map(|stmt| vec![stmt])))
                        .or_not(),
                )
                .map_with(|((condition, then_block), else_block), extra| {
                    Spanned::new(
                        Statement::If {
                            condition,
                            then_block,
                            else_block,
                        },
                        extra.span(),
                    )
                })
        });

        let compound = choice((def_stmt, for_stmt, while_stmt))
            .map_with(|stmt, extra| Spanned::new(stmt, extra.span()));

        let simple = choice((
            pass_stmt,
            return_stmt,
            del_stmt,
            import_stmt,
            aug_assign,
            assign,
            expr_stmt,
        ))
        .map_with(|stmt, extra| Spanned::new(stmt, extra.span()));

        choice((if_stmt, compound, simple)).labelled("statement")
    })
}

/// Statements terminated by newlines or `;`, ending before `}` or at end of input
fn statement_list<'tokens, 'src: 'tokens, I, P>(
    statement: P,
) -> impl Parser<'tokens, I, Vec<Spanned<Statement>>, ParserExtra<'tokens, 'src>> + Clone
where
    I: ValueInput<'tokens, Token = TokenType<'src>, Span = SimpleSpan>,
    P: Parser<'tokens, I, Spanned<Statement>, ParserExtra<'tokens, 'src>> + Clone,
{
    let separator = just(TokenType::Newline).or(just(TokenType::Semicolon));
    let terminator = separator
        .clone()
        .repeated()
        .at_least(1)
        .ignored()
        .or(just(TokenType::RBrace).rewind().ignored())
        .or(end());

    separator
        .repeated()
        .ignore_then(statement.then_ignore(terminator).repeated().collect())
}

/// Creates the main parser for a cell.
///
/// ## Operator Precedence (lowest to highest)
///
/// 1. `lambda`
/// 2. `or`
/// 3. `and`
/// 4. `not`
/// 5. Comparison (`==`, `!=`, `<`, `>`, `<=`, `>=`)
/// 6. Additive (`+`, `-`)
/// 7. Multiplicative (`*`, `/`, `%`)
/// 8. Negation (`-x`)
/// 9. Postfix (calls, member access, indexing)
pub fn parser<'tokens, 'src: 'tokens, I>(
) -> impl Parser<'tokens, I, Vec<Spanned<Statement>>, ParserExtra<'tokens, 'src>>
where
    I: ValueInput<'tokens, Token = TokenType<'src>, Span = SimpleSpan>,
{
    statement_list(statement_parser())
}
