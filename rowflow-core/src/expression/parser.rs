//! Recursive-descent parser producing the expression AST.

use super::lexer::{Token, TokenKind, tokenize};
use crate::error::ExpressionError;
use serde_json::Value;

/// Maximum AST height accepted by the parser. Every nested group, unary
/// operator, binary fold and postfix access counts one level.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
}

/// Parse a complete expression; trailing tokens are an error.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.conditional()?;
    if let Some(tok) = parser.peek() {
        return Err(ExpressionError::UnexpectedToken {
            found: tok.kind.describe(),
            expected: "end of expression".into(),
            pos: tok.pos,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(tok) if tok.kind == kind => Ok(()),
            Some(tok) => Err(ExpressionError::UnexpectedToken {
                found: tok.kind.describe(),
                expected: format!("'{}'", kind.describe()),
                pos: tok.pos,
            }),
            None => Err(ExpressionError::UnexpectedEnd {
                expected: format!("'{}'", kind.describe()),
            }),
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn conditional(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let cond = self.logical_or()?;
        let expr = if self.eat(&TokenKind::Question) {
            let then = self.conditional()?;
            self.expect(TokenKind::Colon)?;
            let otherwise = self.conditional()?;
            Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn logical_or(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut left = self.logical_and()?;
        while self.eat(&TokenKind::OrOr) {
            self.enter()?;
            let right = self.logical_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut left = self.equality()?;
        while self.eat(&TokenKind::AndAnd) {
            self.enter()?;
            let right = self.equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::NotEq,
                Some(TokenKind::StrictEq) => BinaryOp::StrictEq,
                Some(TokenKind::StrictNotEq) => BinaryOp::StrictNotEq,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut left = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Le) => BinaryOp::Le,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = mark;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mark = self.depth;
        let mut expr = self.primary()?;
        loop {
            if matches!(self.peek_kind(), Some(TokenKind::Dot | TokenKind::LBracket)) {
                self.enter()?;
            }
            if self.eat(&TokenKind::Dot) {
                let name = match self.advance() {
                    Some(Token {
                        kind: TokenKind::Ident(name),
                        ..
                    }) => name,
                    Some(tok) => {
                        return Err(ExpressionError::UnexpectedToken {
                            found: tok.kind.describe(),
                            expected: "property name".into(),
                            pos: tok.pos,
                        });
                    }
                    None => {
                        return Err(ExpressionError::UnexpectedEnd {
                            expected: "property name".into(),
                        });
                    }
                };
                if self.eat(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::MethodCall(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.conditional()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                self.depth = mark;
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.conditional()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen)?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let tok = self.advance().ok_or_else(|| ExpressionError::UnexpectedEnd {
            expected: "expression".into(),
        })?;
        match tok.kind {
            TokenKind::Number(v) => Ok(Expr::Literal(v)),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if self.eat(&TokenKind::LParen) {
                        let args = self.arguments()?;
                        Ok(Expr::Call(name, args))
                    } else {
                        Ok(Expr::Ident(name))
                    }
                }
            },
            TokenKind::LParen => {
                let inner = self.conditional()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(ExpressionError::UnexpectedToken {
                found: other.describe(),
                expected: "expression".into(),
                pos: tok.pos,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_member_comparison() {
        let expr = parse("row.age >= 18").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Ge,
                Box::new(Expr::Member(
                    Box::new(Expr::Ident("row".into())),
                    "age".into()
                )),
                Box::new(Expr::Literal(json!(18))),
            )
        );
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Add, _, right) => {
                assert!(matches!(*right, Expr::Binary(BinaryOp::Mul, _, _)));
            }
            other => panic!("unexpected AST: {other:?}"),
        }
    }

    #[test]
    fn test_parse_method_call_and_index() {
        let expr = parse("row['first name'].toUpperCase()").unwrap();
        assert!(matches!(expr, Expr::MethodCall(_, ref name, ref args) if name == "toUpperCase" && args.is_empty()));
    }

    #[test]
    fn test_parse_ternary() {
        assert!(matches!(
            parse("value > 1 ? 'big' : 'small'").unwrap(),
            Expr::Conditional(_, _, _)
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse("row.age 18").unwrap_err();
        assert!(matches!(err, ExpressionError::UnexpectedToken { pos: 8, .. }));
    }

    #[test]
    fn test_incomplete_expression() {
        assert!(matches!(
            parse("row.age >=").unwrap_err(),
            ExpressionError::UnexpectedEnd { .. }
        ));
        assert!(parse("(1 + 2").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_long_operator_chain_is_too_deep() {
        let src = vec!["row.a"; 10_000].join(" + ") + " > 0";
        assert_eq!(
            parse(&src).unwrap_err(),
            ExpressionError::TooDeep { max: MAX_DEPTH }
        );

        let ors = (0..10_000)
            .map(|i| format!("row.id == {i}"))
            .collect::<Vec<_>>()
            .join(" || ");
        assert_eq!(
            parse(&ors).unwrap_err(),
            ExpressionError::TooDeep { max: MAX_DEPTH }
        );
    }

    #[test]
    fn test_long_member_chain_is_too_deep() {
        let src = format!("row{}", ".a".repeat(10_000));
        assert_eq!(
            parse(&src).unwrap_err(),
            ExpressionError::TooDeep { max: MAX_DEPTH }
        );
    }

    #[test]
    fn test_moderate_chain_parses() {
        let src = vec!["row.a"; 50].join(" + ") + " > 0";
        assert!(parse(&src).is_ok());
        // depth is released between sibling operands
        let src = vec!["(row.a + 1)"; 50].join(" * ");
        assert!(parse(&src).is_ok());
    }

    #[test]
    fn test_depth_limit() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(
            parse(&src).unwrap_err(),
            ExpressionError::TooDeep { max: MAX_DEPTH }
        );
    }
}
