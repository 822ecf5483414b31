//! Tokens of a single instruction line.

use logos::{Lexer, Logos};

use std::fmt;

/// Enumeration of all tokens that can appear after the declarations of a line.
#[derive(Logos, Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Errorneous token that could not be interpreted as any of the other variants.
    /// Whitespace and commas separate tokens and are skipped.
    #[error]
    #[regex(r"[ \t\r\n\f,]+", logos::skip)]
    Error,

    /// A signed integer literal.
    #[regex("-?[0-9]+", |lex| lex.slice().parse())]
    Int(i32),

    /// A signed float literal, e.g. `1.5`, `-2.` or `.25`.
    #[regex(r"-?[0-9]+\.[0-9]*", |lex| lex.slice().parse())]
    #[regex(r"-?\.[0-9]+", |lex| lex.slice().parse())]
    Float(f32),

    /// A single or double quoted string literal with its escapes resolved.
    #[regex(r#""([^"\\]|\\.)*""#, quoted)]
    #[regex(r#"'([^'\\]|\\.)*'"#, quoted)]
    Str(String),

    /// A `$`-prefixed register name, which declares the register if it does not exist yet.
    #[regex("\\$[A-Za-z][A-Za-z0-9_]*", register)]
    Register(&'a str),

    /// A bare word: a mnemonic, a label, a cast type or the name of an existing register.
    #[regex("[A-Za-z][A-Za-z0-9_]*", Lexer::slice)]
    Word(&'a str),

    /// Starts the positive branch of an inline test.
    #[token("+")]
    Positive,

    /// Starts the negative branch of an inline test.
    #[token("-")]
    Negative,
}

fn register<'a>(lex: &mut Lexer<'a, Token<'a>>) -> &'a str {
    &lex.slice()[1..]
}

fn quoted<'a>(lex: &mut Lexer<'a, Token<'a>>) -> String {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}

impl Token<'_> {
    /// Whether this token opens an inline branch.
    pub fn is_branch(&self) -> bool {
        match self {
            Token::Positive | Token::Negative => true,
            _ => false,
        }
    }
}

impl<'t> fmt::Display for Token<'t> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Error => write!(f, "<error>"),
            Token::Int(i) => write!(f, "{}", i),
            Token::Float(x) => write!(f, "{}", x),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Register(name) => write!(f, "${}", name),
            Token::Word(word) => write!(f, "{}", word),
            Token::Positive => write!(f, "+"),
            Token::Negative => write!(f, "-"),
        }
    }
}

#[test]
fn test_inline_test_tokens() {
    let tokens: Vec<_> = Token::lexer(r#"teq 1,1,+ mov "yes" $out,- mov 'n\'o' $out"#).collect();

    assert_eq!(tokens, vec![
        Token::Word("teq"),
        Token::Int(1),
        Token::Int(1),
        Token::Positive,
        Token::Word("mov"),
        Token::Str("yes".into()),
        Token::Register("out"),
        Token::Negative,
        Token::Word("mov"),
        Token::Str("n'o".into()),
        Token::Register("out"),
    ]);
}

#[test]
fn test_numbers() {
    let tokens: Vec<_> = Token::lexer("-12 3.5 -.5 7.").collect();

    assert_eq!(tokens, vec![
        Token::Int(-12),
        Token::Float(3.5),
        Token::Float(-0.5),
        Token::Float(7.0),
    ]);
}

#[test]
fn test_escapes() {
    assert_eq!(unescape(r"a\nb\tc\\d"), "a\nb\tc\\d");
    assert_eq!(Token::lexer("@").next(), Some(Token::Error));
}
