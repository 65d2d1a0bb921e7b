//! Predicate parser.
//!
//! ## Parse flow
//!
//! ```text
//! parse()
//!   └─ parse_or_expression()
//!        ├─ parse_and_expression()
//!        │    ├─ parse_not_expression()
//!        │    │    └─ parse_primary_expression()
//!        │    │         ├─ "(" → grouped expression (recursive parse_or_expression)
//!        │    │         ├─ RELATIONAL_OPERATOR → PROPERTY VALUE
//!        │    │         └─ RELATIONAL_OPERATOR_FUNC → PROPERTY [VALUE] ")"
//!        │    │
//!        │    └─ on "&", parse the next NOT expression
//!        │
//!        └─ on "|", parse the next AND expression
//! ```
//!
//! ## Precedence (high to low)
//!
//! 1. brackets `(expression)`
//! 2. NOT `!expression`
//! 3. comparisons `a=1`, `a.in(1,2)`, `a.matches(re)`, `a.isEmpty()`
//! 4. AND `&`
//! 5. OR `|`
//!
//! The lexer emits operators before their property operand, so a comparison
//! arrives as `RELATIONAL_OPERATOR PROPERTY_OPERAND VALUE_OPERAND`.

use crate::error::{QueryError, Result};
use crate::lexer::tokenize;
use crate::predicate::{CompOp, Predicate};
use crate::property::PropertyId;
use crate::schema::ResourceSchema;
use crate::token::{Token, TokenType};

/// Maximum nesting of brackets and `!` operators.
pub const MAX_NESTING_DEPTH: usize = 256;

pub struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    depth: usize,
    schema: Option<&'a ResourceSchema>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, position: 0, depth: 0, schema: None }
    }

    /// Rejects property operands the schema does not know.
    pub fn with_schema(mut self, schema: &'a ResourceSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Returns the current token without advancing.
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    /// Returns the current token and advances.
    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// Expects a token of the given type and advances, otherwise fails.
    fn expect(&mut self, expected: TokenType) -> Result<&'a Token> {
        match self.peek() {
            Some(token) if token.kind == expected => {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(QueryError::invalid(format!(
                "Expected {}, found {} '{}' at token {}",
                expected, token.kind, token.value, self.position
            ))),
            None => Err(QueryError::invalid(format!(
                "Expected {}, but reached end of input",
                expected
            ))),
        }
    }

    fn match_token(&self, kind: TokenType, value: &str) -> bool {
        self.peek().is_some_and(|t| t.kind == kind && t.value == value)
    }

    /// Parses one nested level with `parse`, failing past [`MAX_NESTING_DEPTH`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(QueryError::invalid(format!(
                "expression nested too deeply at token {}",
                self.position
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Parses the whole token stream. An empty stream has no predicate.
    pub fn parse(&mut self) -> Result<Option<Predicate>> {
        if self.tokens.is_empty() {
            return Ok(None);
        }
        let predicate = self.parse_or_expression()?;

        if let Some(token) = self.peek() {
            return Err(QueryError::invalid(format!(
                "Unexpected token {} '{}' at token {}, brackets are unbalanced",
                token.kind, token.value, self.position
            )));
        }
        Ok(Some(predicate))
    }

    /// `and_expr ('|' and_expr)*`
    fn parse_or_expression(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and_expression()?;

        while self.match_token(TokenType::LogicalOperator, "|") {
            self.advance();
            let right = self.parse_and_expression()?;
            left = Predicate::or(left, right);
        }

        Ok(left)
    }

    /// `not_expr ('&' not_expr)*`
    fn parse_and_expression(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not_expression()?;

        while self.match_token(TokenType::LogicalOperator, "&") {
            self.advance();
            let right = self.parse_not_expression()?;
            left = Predicate::and(left, right);
        }

        Ok(left)
    }

    /// `'!'* primary_expr`
    fn parse_not_expression(&mut self) -> Result<Predicate> {
        if self.match_token(TokenType::LogicalUnaryOperator, "!") {
            self.advance();
            let expr = self.nested(Self::parse_not_expression)?;
            Ok(Predicate::not(expr))
        } else {
            self.parse_primary_expression()
        }
    }

    fn parse_primary_expression(&mut self) -> Result<Predicate> {
        let Some(token) = self.advance() else {
            return Err(QueryError::invalid("Unexpected end of input"));
        };

        match token.kind {
            TokenType::BracketOpen => {
                let expr = self.nested(Self::parse_or_expression)?;
                self.expect(TokenType::BracketClose)
                    .map_err(|e| QueryError::invalid(format!("Missing closing bracket: {}", e)))?;
                Ok(expr)
            }
            TokenType::RelationalOperator => {
                let op = CompOp::from_symbol(&token.value).ok_or_else(|| {
                    QueryError::invalid(format!("Unknown relational operator '{}'", token.value))
                })?;
                let property = self.parse_property()?;
                let value = self.expect(TokenType::ValueOperand)?;
                Ok(Predicate::comparison(op, property, value.value.as_str()))
            }
            TokenType::RelationalOperatorFunc => self.parse_operator_function(&token.value),
            _ => Err(QueryError::invalid(format!(
                "Unexpected {} '{}' at token {}",
                token.kind,
                token.value,
                self.position - 1
            ))),
        }
    }

    /// `.in(`, `.matches(` and `.isEmpty(`; the opening bracket is part of the operator.
    fn parse_operator_function(&mut self, function: &str) -> Result<Predicate> {
        let property = self.parse_property()?;

        let predicate = match function {
            ".in(" => {
                let values = self.expect(TokenType::ValueOperand)?;
                Predicate::In {
                    property,
                    values: values.value.split(',').map(str::to_string).collect(),
                }
            }
            ".matches(" => {
                let pattern = self.expect(TokenType::ValueOperand)?;
                Predicate::matches(property, &pattern.value)?
            }
            ".isEmpty(" => {
                if let Some(token) = self.peek().filter(|t| t.kind == TokenType::ValueOperand) {
                    return Err(QueryError::invalid(format!(
                        ".isEmpty() takes no argument, found '{}'",
                        token.value
                    )));
                }
                Predicate::IsEmpty { category: property }
            }
            other => {
                return Err(QueryError::invalid(format!("Unknown operator function '{}'", other)))
            }
        };

        self.expect(TokenType::BracketClose)?;
        Ok(predicate)
    }

    fn parse_property(&mut self) -> Result<PropertyId> {
        let token = self.expect(TokenType::PropertyOperand)?;
        let Some(schema) = self.schema else {
            return Ok(PropertyId::parse(&token.value));
        };

        let id = schema.resolve_path(&token.value);
        if !schema.is_supported(&id) {
            return Err(QueryError::invalid(format!(
                "Property '{}' is not supported by resource type {}",
                token.value, schema.kind
            )));
        }
        Ok(id)
    }
}

/// Tokenizes and parses a query expression in one go.
pub fn parse_expression(expression: &str) -> Result<Option<Predicate>> {
    let tokens = tokenize(expression)?;
    Parser::new(&tokens).parse()
}
