//! A resource query engine: a predicate language over a generic resource
//! property model, and the executor that turns a query into a result tree.
//!
//! ```text
//! query string ─ lexer ─▶ tokens ─ parser ─▶ Predicate
//!                                                │
//! Query (type, key bindings, fields) ◀───────────┘
//!   └─ QueryExecutor ─ ResourceFetch ─▶ TreeNode
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod params;
pub mod parser;
pub mod predicate;
pub mod property;
pub mod query;
pub mod schema;
pub mod sql_compiler;
pub mod store;
pub mod token;

pub use error::{QueryError, Result};
pub use executor::{QueryExecutor, ResourceFetch, TreeNode};
pub use params::QueryParams;
pub use predicate::Predicate;
pub use property::{PropertyId, Resource, ResourceType, TemporalInfo};
pub use query::{Query, Request};
pub use schema::{ResourceSchema, SchemaRegistry, SubResourceDefinition};
