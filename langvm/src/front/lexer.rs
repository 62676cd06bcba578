//! `logos`-derived tokenizer, following the sibling-crate convention the
//! teacher's own parser crate (`subset_julia_vm_parser`) uses `logos` for.

use crate::span::Span;
use logos::Logos;
use thiserror::Error;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("\n")]
    Newline,

    #[token("fn")]
    Fn,
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("return")]
    Return,
    #[token("new")]
    New,
    #[token("true")]
    True,
    #[token("false")]
    False,

    #[token("int")]
    IntType,
    #[token("float")]
    FloatType,
    #[token("bool")]
    BoolType,
    #[token("void")]
    VoidType,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLiteral(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    FloatLiteral(f64),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    Assign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unexpected character at {line}:{column}")]
pub struct LexError {
    pub line: u32,
    pub column: u32,
}

/// Tokenize `source`, tracking 1-based line:column positions. Blank
/// `Newline` tokens are consumed here rather than kept in the stream: the
/// grammar has no line-sensitive constructs, so only line/column
/// bookkeeping needs them.
pub fn lex(source: &str) -> Result<Vec<SpannedToken>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1u32;
    let mut line_start = 0usize;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(Token::Newline) => {
                line += 1;
                line_start = span.end;
            }
            Ok(token) => {
                let column = (span.start - line_start + 1) as u32;
                tokens.push(SpannedToken {
                    token,
                    span: Span::new(line, column),
                });
            }
            Err(()) => {
                let column = (span.start - line_start + 1) as u32;
                return Err(LexError { line, column });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_a_function_signature() {
        let tokens = lex("fn add(int a, int b) int {").unwrap();
        assert!(tokens.iter().any(|t| t.token == Token::Fn));
        assert!(tokens.iter().any(|t| matches!(&t.token, Token::Identifier(n) if n == "add")));
    }

    #[test]
    fn tracks_line_numbers_across_newlines() {
        let tokens = lex("let x = 1;\nlet y = 2;").unwrap();
        let y_tok = tokens
            .iter()
            .find(|t| matches!(&t.token, Token::Identifier(n) if n == "y"))
            .unwrap();
        assert_eq!(y_tok.span.line, 2);
    }

    #[test]
    fn unknown_character_is_a_lex_error() {
        assert!(lex("let x = 1 @ 2;").is_err());
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = lex("// comment\nlet x = 1;").unwrap();
        assert!(!tokens.iter().any(|t| matches!(&t.token, Token::Identifier(n) if n == "comment")));
    }
}
