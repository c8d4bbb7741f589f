use logos::Logos;
use std::fmt;
use std::ops::Range;

/// Tokens paired with their byte ranges in the source
pub type LexedTokens<'a> = Vec<(TokenType<'a>, Range<usize>)>;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub enum LexingError {
    InvalidInteger(String),
    #[default]
    InvalidCharacter,
}

impl fmt::Display for LexingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInteger(literal) => write!(f, "integer literal out of range: {literal}"),
            Self::InvalidCharacter => write!(f, "invalid character"),
        }
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(error = LexingError)]
#[logos(skip r"[ \t\f]+")] // Skip horizontal whitespace
#[logos(skip r"\\\r?\n")] // Skip explicit line continuations
#[logos(skip r"#[^\n]*")] // Skip comments
pub enum TokenType<'a> {
    #[regex(r"\r?\n")]
    Newline,

    // Literals
    #[regex(r"[0-9]+", |lex| {
        lex.slice()
            .parse::<i64>()
            .map_err(|_| LexingError::InvalidInteger(lex.slice().to_string()))
    })]
    LiteralInt(i64),
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice())]
    LiteralFloat(&'a str),
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    LiteralString(&'a str),

    // Keywords
    #[token("and")]
    And,
    #[token("as")]
    As,
    #[token("def")]
    Def,
    #[token("del")]
    Del,
    #[token("else")]
    Else,
    #[token("False")]
    False,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("lambda")]
    Lambda,
    #[token("None")]
    None,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("pass")]
    Pass,
    #[token("return")]
    Return,
    #[token("True")]
    True,
    #[token("while")]
    While,

    // Identifiers (must come after keywords)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier(&'a str),
    /// `$name` marks a reactive reference
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| &lex.slice()[1..])]
    ReactiveIdentifier(&'a str),

    // Operators (order matters for longest match)
    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    MulEq,
    #[token("/=")]
    DivEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Mul,
    #[token("/")]
    Div,
    #[token("%")]
    Percent,
    #[token("=")]
    Eq,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBrack,
    #[token("]")]
    RBrack,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
}

impl fmt::Display for TokenType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Newline => write!(f, "newline"),
            Self::LiteralInt(n) => write!(f, "{n}"),
            Self::LiteralFloat(s) => write!(f, "{s}"),
            Self::LiteralString(s) => write!(f, "\"{s}\""),
            Self::And => write!(f, "and"),
            Self::As => write!(f, "as"),
            Self::Def => write!(f, "def"),
            Self::Del => write!(f, "del"),
            Self::Else => write!(f, "else"),
            Self::False => write!(f, "False"),
            Self::For => write!(f, "for"),
            Self::If => write!(f, "if"),
            Self::Import => write!(f, "import"),
            Self::In => write!(f, "in"),
            Self::Lambda => write!(f, "lambda"),
            Self::None => write!(f, "None"),
            Self::Not => write!(f, "not"),
            Self::Or => write!(f, "or"),
            Self::Pass => write!(f, "pass"),
            Self::Return => write!(f, "return"),
            Self::True => write!(f, "True"),
            Self::While => write!(f, "while"),
            Self::Identifier(s) => write!(f, "{s}"),
            Self::ReactiveIdentifier(s) => write!(f, "${s}"),
            Self::EqEq => write!(f, "=="),
            Self::Neq => write!(f, "!="),
            Self::LessEqual => write!(f, "<="),
            Self::GreaterEqual => write!(f, ">="),
            Self::Less => write!(f, "<"),
            Self::Greater => write!(f, ">"),
            Self::PlusEq => write!(f, "+="),
            Self::MinusEq => write!(f, "-="),
            Self::MulEq => write!(f, "*="),
            Self::DivEq => write!(f, "/="),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Percent => write!(f, "%"),
            Self::Eq => write!(f, "="),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::LBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::LBrack => write!(f, "["),
            Self::RBrack => write!(f, "]"),
            Self::Comma => write!(f, ","),
            Self::Semicolon => write!(f, ";"),
            Self::Colon => write!(f, ":"),
            Self::Dot => write!(f, "."),
        }
    }
}

/// Lex `input` into spanned tokens.
///
/// Newlines nested inside parentheses or brackets are dropped so that calls and
/// list literals may span several lines; braces keep them since they delimit
/// statement blocks.
pub fn lex(input: &str) -> (LexedTokens<'_>, Vec<(LexingError, Range<usize>)>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut depth = 0usize;
    for (token, span) in TokenType::lexer(input).spanned() {
        match token {
            Ok(token) => {
                match token {
                    TokenType::LParen | TokenType::LBrack => depth += 1,
                    TokenType::RParen | TokenType::RBrack => depth = depth.saturating_sub(1),
                    TokenType::Newline if depth > 0 => continue,
                    _ => {}
                }
                tokens.push((token, span));
            }
            Err(err) => errors.push((err, span)),
        }
    }
    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_types(input: &str) -> Vec<TokenType<'_>> {
        let (tokens, errors) = lex(input);
        assert!(errors.is_empty(), "lexer errors: {errors:?}");
        tokens.into_iter().map(|(token, _)| token).collect()
    }

    #[test]
    fn test_basic_lexer() {
        let input = "def add(x, y=1) {\n    return x + y  # sum\n}\nz = add(10, $w)\n";
        let expected = vec![
            TokenType::Def,
            TokenType::Identifier("add"),
            TokenType::LParen,
            TokenType::Identifier("x"),
            TokenType::Comma,
            TokenType::Identifier("y"),
            TokenType::Eq,
            TokenType::LiteralInt(1),
            TokenType::RParen,
            TokenType::LBrace,
            TokenType::Newline,
            TokenType::Return,
            TokenType::Identifier("x"),
            TokenType::Plus,
            TokenType::Identifier("y"),
            TokenType::Newline,
            TokenType::RBrace,
            TokenType::Newline,
            TokenType::Identifier("z"),
            TokenType::Eq,
            TokenType::Identifier("add"),
            TokenType::LParen,
            TokenType::LiteralInt(10),
            TokenType::Comma,
            TokenType::ReactiveIdentifier("w"),
            TokenType::RParen,
            TokenType::Newline,
        ];
        assert_eq!(token_types(input), expected);
    }

    #[test]
    fn test_newlines_inside_brackets_are_dropped() {
        let tokens = token_types("xs = [\n  1,\n  2,\n]\n");
        assert_eq!(
            tokens.iter().filter(|t| **t == TokenType::Newline).count(),
            1
        );
    }

    #[test]
    fn test_string_and_float_literals() {
        assert_eq!(
            token_types(r#"d["key"] = 'v' + 1.5"#),
            vec![
                TokenType::Identifier("d"),
                TokenType::LBrack,
                TokenType::LiteralString("key"),
                TokenType::RBrack,
                TokenType::Eq,
                TokenType::LiteralString("v"),
                TokenType::Plus,
                TokenType::LiteralFloat("1.5"),
            ]
        );
    }

    #[test]
    fn test_should_err_on_integer_too_large() {
        let (tokens, errors) = lex("x = 99999999999999999999");
        assert_eq!(tokens.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].0, LexingError::InvalidInteger(_)));
    }

    #[test]
    fn test_invalid_character() {
        let (_, errors) = lex("x = 1 @ 2");
        assert_eq!(errors, vec![(LexingError::InvalidCharacter, 6..7)]);
    }
}
