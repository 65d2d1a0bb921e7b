//! Error taxonomy shared by the lexer, parser and query executor.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Everything that can go wrong between a raw query string and a result tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// Malformed predicate syntax.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A requested or referenced property is not known to the schema.
    #[error("unsupported property: {0}")]
    UnsupportedProperty(String),

    /// An identified resource does not exist.
    #[error("no such resource: {0}")]
    NoSuchResource(String),

    /// A parent id bound from the request path does not resolve.
    #[error("no such parent resource: {kind}={id}")]
    NoSuchParentResource { kind: String, id: String },

    /// The resource fetch collaborator failed.
    #[error("system error: {0}")]
    System(String),
}

impl QueryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidQuery(message.into())
    }

    pub fn system(message: impl Into<String>) -> Self {
        QueryError::System(message.into())
    }

    /// Client errors map to 4xx responses; only collaborator failures are server errors.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::System(_))
    }
}
