//! Row expression language used by `filter` and `map` steps.
//!
//! A small JavaScript-flavoured grammar: literals, member and index access,
//! arithmetic, comparisons, `&&`/`||`, ternaries, and a fixed builtin library.
//! Expressions see only the bindings they are given (`row` for filters,
//! `value` for map transforms).
//!
//! ```text
//! source ──tokenize──▶ tokens ──parse──▶ Expr ──evaluate(bindings)──▶ Value
//! ```

pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::{Binding, Bindings, display_string, truthy};
pub use parser::Expr;

use crate::error::ExpressionError;
use serde_json::Value;

/// A parsed, reusable expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression. Malformed input is an error, never a panic.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against the given bindings.
    pub fn evaluate(&self, bindings: &Bindings<'_>) -> Result<Value, ExpressionError> {
        eval::evaluate(&self.ast, bindings)
    }

    /// Evaluate and reduce the result to a boolean using truthiness rules.
    pub fn evaluate_truthy(&self, bindings: &Bindings<'_>) -> Result<bool, ExpressionError> {
        Ok(truthy(&self.evaluate(bindings)?))
    }
}
