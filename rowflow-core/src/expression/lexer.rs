//! Tokenizer for row expressions.

use crate::error::ExpressionError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(Value),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Question,
    Colon,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    StrictEq,
    StrictNotEq,
    AndAnd,
    OrOr,
}

impl TokenKind {
    /// Source-like rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(v) => v.to_string(),
            TokenKind::Str(s) => format!("\"{s}\""),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::LBracket => "[".into(),
            TokenKind::RBracket => "]".into(),
            TokenKind::Dot => ".".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Question => "?".into(),
            TokenKind::Colon => ":".into(),
            TokenKind::Bang => "!".into(),
            TokenKind::Plus => "+".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Star => "*".into(),
            TokenKind::Slash => "/".into(),
            TokenKind::Percent => "%".into(),
            TokenKind::Lt => "<".into(),
            TokenKind::Le => "<=".into(),
            TokenKind::Gt => ">".into(),
            TokenKind::Ge => ">=".into(),
            TokenKind::EqEq => "==".into(),
            TokenKind::NotEq => "!=".into(),
            TokenKind::StrictEq => "===".into(),
            TokenKind::StrictNotEq => "!==".into(),
            TokenKind::AndAnd => "&&".into(),
            TokenKind::OrOr => "||".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token start in the source.
    pub pos: usize,
}

/// Split an expression source into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        let kind = match c {
            '0'..='9' => {
                let (value, end) = lex_number(source, start)?;
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    pos: start,
                });
                continue;
            }
            '"' | '\'' => {
                let (text, end) = lex_string(source, start, c)?;
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    pos: start,
                });
                continue;
            }
            c if c == '_' || c == '$' || c.is_ascii_alphabetic() => {
                let mut end = start + 1;
                while end < bytes.len() {
                    let n = bytes[end] as char;
                    if n == '_' || n == '$' || n.is_ascii_alphanumeric() {
                        end += 1;
                    } else {
                        break;
                    }
                }
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Ident(source[start..end].to_string()),
                    pos: start,
                });
                continue;
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '<' => {
                if peek(bytes, i + 1) == Some('=') {
                    i += 1;
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if peek(bytes, i + 1) == Some('=') {
                    i += 1;
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '=' => {
                if peek(bytes, i + 1) != Some('=') {
                    return Err(ExpressionError::UnexpectedChar { ch: '=', pos: start });
                }
                if peek(bytes, i + 2) == Some('=') {
                    i += 2;
                    TokenKind::StrictEq
                } else {
                    i += 1;
                    TokenKind::EqEq
                }
            }
            '!' => {
                if peek(bytes, i + 1) == Some('=') {
                    if peek(bytes, i + 2) == Some('=') {
                        i += 2;
                        TokenKind::StrictNotEq
                    } else {
                        i += 1;
                        TokenKind::NotEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '&' => {
                if peek(bytes, i + 1) != Some('&') {
                    return Err(ExpressionError::UnexpectedChar { ch: '&', pos: start });
                }
                i += 1;
                TokenKind::AndAnd
            }
            '|' => {
                if peek(bytes, i + 1) != Some('|') {
                    return Err(ExpressionError::UnexpectedChar { ch: '|', pos: start });
                }
                i += 1;
                TokenKind::OrOr
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or(c);
                return Err(ExpressionError::UnexpectedChar { ch, pos: start });
            }
        };
        i += 1;
        tokens.push(Token { kind, pos: start });
    }

    Ok(tokens)
}

fn peek(bytes: &[u8], i: usize) -> Option<char> {
    bytes.get(i).map(|b| *b as char)
}

fn lex_number(source: &str, start: usize) -> Result<(Value, usize), ExpressionError> {
    let bytes = source.as_bytes();
    let mut end = start;
    let mut is_float = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.'
            && !is_float
            && peek(bytes, end + 1).is_some_and(|n| n.is_ascii_digit())
        {
            is_float = true;
            end += 1;
        } else if (c == 'e' || c == 'E') && end > start {
            is_float = true;
            end += 1;
            if matches!(peek(bytes, end), Some('+') | Some('-')) {
                end += 1;
            }
        } else {
            break;
        }
    }

    let literal = &source[start..end];
    let invalid = || ExpressionError::InvalidNumber {
        literal: literal.to_string(),
        pos: start,
    };
    let value = if is_float {
        let f: f64 = literal.parse().map_err(|_| invalid())?;
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(invalid)?
    } else {
        match literal.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => {
                let f: f64 = literal.parse().map_err(|_| invalid())?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(invalid)?
            }
        }
    };
    Ok((value, end))
}

fn lex_string(source: &str, start: usize, quote: char) -> Result<(String, usize), ExpressionError> {
    let mut out = String::new();
    let mut chars = source[start + 1..].char_indices();
    while let Some((offset, c)) = chars.next() {
        if c == quote {
            return Ok((out, start + 1 + offset + c.len_utf8()));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            }
        } else {
            out.push(c);
        }
    }
    Err(ExpressionError::UnterminatedString { pos: start })
}
