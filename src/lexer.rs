//! Lexer for the predicate language.
//!
//! A query expression is first split into raw substrings on a fixed set of
//! delimiters, then every substring is classified by the handlers that are legal
//! after the previously emitted token type.
//!
//! ```text
//! previous token                         legal handlers (tried in order)
//! ─────────────────────────────────────  ─────────────────────────────────────────
//! <start> ( & | !                        BracketOpen, LogicalUnary, PropertyOperand
//! PROPERTY_OPERAND                       RelationalOperator, RelationalOperatorFunc
//! RELATIONAL_OPERATOR                    ValueOperand
//! RELATIONAL_OPERATOR_FUNC               BracketClose, ValueOperand
//! VALUE_OPERAND )                        BracketClose, LogicalOperator
//! ```
//!
//! Property operands are held back until their operator is seen, so the output
//! always carries the operator immediately before the property it qualifies:
//! `a=1` lexes to `RELATIONAL_OPERATOR =`, `PROPERTY_OPERAND a`, `VALUE_OPERAND 1`.

use crate::error::{QueryError, Result};
use crate::token::{Token, TokenType};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Query string keys that are request directives rather than predicate clauses.
pub const RESERVED_KEYS: [&str; 8] = [
    "fields",
    "format",
    "page_size",
    "to",
    "from",
    "minimal_response",
    "sortBy",
    "_",
];

static DELIMITERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.matches\(|\.in\(|\.isEmpty\(|<=|>=|!=|=|<|>|&|\||!|\(|\)")
        .expect("delimiter pattern is valid")
});

static OPERAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^!&|<>=()]+$").expect("operand pattern is valid"));

/// A classifier for one kind of raw substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    BracketOpen,
    BracketClose,
    LogicalOperator,
    LogicalUnaryOperator,
    RelationalOperator,
    RelationalOperatorFunc,
    PropertyOperand,
    ValueOperand,
}

const AFTER_OPEN: &[Handler] = &[
    Handler::BracketOpen,
    Handler::LogicalUnaryOperator,
    Handler::PropertyOperand,
];
const AFTER_PROPERTY: &[Handler] = &[Handler::RelationalOperator, Handler::RelationalOperatorFunc];
const AFTER_OPERATOR: &[Handler] = &[Handler::ValueOperand];
const AFTER_OPERATOR_FUNC: &[Handler] = &[Handler::BracketClose, Handler::ValueOperand];
const AFTER_VALUE: &[Handler] = &[Handler::BracketClose, Handler::LogicalOperator];

/// The transition table: which handlers may follow the given token type.
fn handlers_after(previous: Option<TokenType>) -> &'static [Handler] {
    match previous {
        None
        | Some(TokenType::BracketOpen)
        | Some(TokenType::LogicalOperator)
        | Some(TokenType::LogicalUnaryOperator) => AFTER_OPEN,
        Some(TokenType::PropertyOperand) => AFTER_PROPERTY,
        Some(TokenType::RelationalOperator) => AFTER_OPERATOR,
        Some(TokenType::RelationalOperatorFunc) => AFTER_OPERATOR_FUNC,
        Some(TokenType::ValueOperand) | Some(TokenType::BracketClose) => AFTER_VALUE,
    }
}

impl Handler {
    fn token_type(self) -> TokenType {
        match self {
            Handler::BracketOpen => TokenType::BracketOpen,
            Handler::BracketClose => TokenType::BracketClose,
            Handler::LogicalOperator => TokenType::LogicalOperator,
            Handler::LogicalUnaryOperator => TokenType::LogicalUnaryOperator,
            Handler::RelationalOperator => TokenType::RelationalOperator,
            Handler::RelationalOperatorFunc => TokenType::RelationalOperatorFunc,
            Handler::PropertyOperand => TokenType::PropertyOperand,
            Handler::ValueOperand => TokenType::ValueOperand,
        }
    }

    fn accepts(self, raw: &str) -> bool {
        match self {
            Handler::BracketOpen => raw == "(",
            Handler::BracketClose => raw == ")",
            Handler::LogicalOperator => raw == "&" || raw == "|",
            Handler::LogicalUnaryOperator => raw == "!",
            Handler::RelationalOperator => matches!(raw, "=" | "!=" | "<" | "<=" | ">" | ">="),
            Handler::RelationalOperatorFunc => matches!(raw, ".in(" | ".matches(" | ".isEmpty("),
            Handler::PropertyOperand | Handler::ValueOperand => OPERAND.is_match(raw),
        }
    }

    fn handle(self, raw: &str, ctx: &mut ScanContext) {
        match self {
            Handler::PropertyOperand => ctx.set_property_operand(raw),
            Handler::RelationalOperator | Handler::RelationalOperatorFunc => {
                ctx.add_token(Token::new(self.token_type(), raw));
                if let Some(property) = ctx.pending_property.take() {
                    ctx.add_token(Token::new(TokenType::PropertyOperand, property));
                }
            }
            _ => ctx.add_token(Token::new(self.token_type(), raw)),
        }
        ctx.last = Some(self.token_type());
    }
}

/// Per-call scanning state.
#[derive(Debug, Default)]
struct ScanContext<'a> {
    last: Option<TokenType>,
    pending_property: Option<String>,
    tokens: Vec<Token>,
    /// When set, tokens are swallowed up to and including the next token of this type.
    ignore_until: Option<TokenType>,
    ignored: HashSet<&'a str>,
}

impl<'a> ScanContext<'a> {
    fn add_token(&mut self, token: Token) {
        match self.ignore_until {
            None => self.tokens.push(token),
            Some(end) if token.kind == end => self.ignore_until = None,
            Some(_) => {}
        }
    }

    fn set_property_operand(&mut self, raw: &str) {
        if !self.ignored.contains(raw) {
            self.pending_property = Some(raw.to_string());
            return;
        }
        if self.tokens.is_empty() {
            self.ignore_until = Some(TokenType::LogicalOperator);
        } else {
            if self.tokens.last().map(|t| t.kind) == Some(TokenType::LogicalOperator) {
                self.tokens.pop();
            }
            self.ignore_until = Some(TokenType::ValueOperand);
        }
    }

    fn validate_end_state(&self) -> Result<()> {
        if let Some(property) = &self.pending_property {
            return Err(QueryError::invalid(format!(
                "property '{}' is not followed by an operator",
                property
            )));
        }
        if self.ignore_until.is_none() && self.last == Some(TokenType::RelationalOperator) {
            return Err(QueryError::invalid("relational operator is missing its value"));
        }
        Ok(())
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    ignored: HashSet<&'a str>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            ignored: RESERVED_KEYS.into_iter().collect(),
        }
    }

    /// Treats additional property names as directives to strip from the predicate.
    pub fn ignore_properties<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ignored.extend(names);
        self
    }

    /// Splits the input into delimiters and the non-empty runs between them.
    fn raw_substrings(&self) -> Vec<&'a str> {
        let mut parts = Vec::new();
        let mut position = 0;
        for m in DELIMITERS.find_iter(self.input) {
            if m.start() > position {
                parts.push(&self.input[position..m.start()]);
            }
            parts.push(m.as_str());
            position = m.end();
        }
        if position < self.input.len() {
            parts.push(&self.input[position..]);
        }
        parts
    }

    pub fn tokenize(self) -> Result<Vec<Token>> {
        let raw = self.raw_substrings();
        let mut ctx = ScanContext {
            ignored: self.ignored,
            ..Default::default()
        };

        for substring in raw {
            let handler = handlers_after(ctx.last)
                .iter()
                .copied()
                .find(|h| h.accepts(substring))
                .ok_or_else(|| {
                    QueryError::invalid(format!(
                        "Invalid Query Token: token='{}', previous token type={}",
                        substring,
                        ctx.last.map_or_else(|| "<start>".to_string(), |t| t.to_string())
                    ))
                })?;
            handler.handle(substring, &mut ctx);
        }
        ctx.validate_end_state()?;

        tracing::trace!(
            input = self.input,
            tokens = ctx.tokens.len(),
            "tokenized query expression"
        );
        Ok(ctx.tokens)
    }
}

/// Tokenizes a query expression with the default reserved keys.
pub fn tokenize(expression: &str) -> Result<Vec<Token>> {
    Lexer::new(expression).tokenize()
}
