//! The token definition for the predicate language.

use serde::Serialize;
use std::fmt;

/// A token is a single classified substring of a query expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenType,
    pub value: String,
}

impl Token {
    pub fn new(kind: TokenType, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.value)
    }
}

/// The type of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    BracketOpen,            // (
    BracketClose,           // )
    LogicalOperator,        // & |
    LogicalUnaryOperator,   // !
    RelationalOperator,     // = != < <= > >=
    RelationalOperatorFunc, // .in( .matches( .isEmpty(
    PropertyOperand,
    ValueOperand,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenType::BracketOpen => "BRACKET_OPEN",
            TokenType::BracketClose => "BRACKET_CLOSE",
            TokenType::LogicalOperator => "LOGICAL_OPERATOR",
            TokenType::LogicalUnaryOperator => "LOGICAL_UNARY_OPERATOR",
            TokenType::RelationalOperator => "RELATIONAL_OPERATOR",
            TokenType::RelationalOperatorFunc => "RELATIONAL_OPERATOR_FUNC",
            TokenType::PropertyOperand => "PROPERTY_OPERAND",
            TokenType::ValueOperand => "VALUE_OPERAND",
        };
        f.write_str(name)
    }
}
