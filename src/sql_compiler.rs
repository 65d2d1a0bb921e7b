//! SQL pushdown: compiles a predicate into a sea-query SELECT for SQL-backed
//! resource providers.

use crate::predicate::{CompOp, Predicate};
use crate::property::{PropertyId, ResourceType};
use sea_query::{Asterisk, Expr, Iden, PostgresQueryBuilder, SelectStatement, SimpleExpr, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Configuration for SQL optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Minimum number of equality alternatives on one column before rewriting to IN
    pub max_or_conditions_for_in: usize,
    /// IN lists above this size are reported as candidates for splitting
    pub max_in_values: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_or_conditions_for_in: 5,
            max_in_values: 1000,
        }
    }
}

/// Table identifier for sea-query
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Column identifier; property paths map to columns with `/` replaced by `_`.
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl ColumnName {
    pub fn for_property(id: &PropertyId) -> Self {
        ColumnName(id.path().replace('/', "_"))
    }
}

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot compile predicate to SQL: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

/// Represents an optimization applied during compilation
#[derive(Debug, Clone, PartialEq)]
pub enum Optimization {
    OrToIn { column: String, value_count: usize },
    InToUnion { column: String, total_values: usize, union_count: usize },
}

/// Result of SQL compilation with optimization information
#[derive(Debug)]
pub struct CompileResult {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
}

pub struct SqlCompiler {
    config: OptimizationConfig,
    /// Maps resource types to table names
    table_mapping: HashMap<String, String>,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::with_config(OptimizationConfig::default())
    }

    pub fn with_config(config: OptimizationConfig) -> Self {
        Self {
            config,
            table_mapping: HashMap::new(),
        }
    }

    pub fn set_table_mapping(&mut self, mapping: HashMap<String, String>) {
        self.table_mapping = mapping;
    }

    /// The table of a resource type, falling back to its lower-cased name.
    fn get_table_name(&self, kind: &ResourceType) -> String {
        self.table_mapping
            .get(kind.as_str())
            .cloned()
            .unwrap_or_else(|| kind.as_str().to_lowercase())
    }

    /// Compiles `SELECT * FROM <table> [WHERE <predicate>]`.
    pub fn compile(
        &self,
        kind: &ResourceType,
        predicate: Option<&Predicate>,
    ) -> Result<CompileResult, CompileError> {
        let mut optimizations = Vec::new();

        let mut select = SelectStatement::new();
        select.from(TableName(self.get_table_name(kind)));
        select.column(Asterisk);

        if let Some(predicate) = predicate {
            let condition = self.compile_predicate(predicate, &mut optimizations)?;
            select.and_where(condition);
        }

        let sql = select.to_string(PostgresQueryBuilder);
        Ok(CompileResult { sql, optimizations })
    }

    fn compile_predicate(
        &self,
        predicate: &Predicate,
        optimizations: &mut Vec<Optimization>,
    ) -> Result<SimpleExpr, CompileError> {
        let expr = match predicate {
            Predicate::Comparison { op, property, value } => {
                self.compile_comparison(*op, property, value)
            }
            Predicate::In { property, values } => self.compile_in(property, values, optimizations),
            Predicate::Matches { property, pattern } => {
                return Err(CompileError::new(format!(
                    "{}.matches({}) has no SQL equivalent",
                    property,
                    pattern.as_str()
                )))
            }
            Predicate::IsEmpty { category } => {
                Expr::col(ColumnName::for_property(category)).is_null()
            }
            Predicate::And(children) => {
                let mut exprs = Vec::with_capacity(children.len());
                for child in children {
                    exprs.push(self.compile_predicate(child, optimizations)?);
                }
                combine(exprs, SimpleExpr::and)
            }
            Predicate::Or(children) => {
                if let Some(expr) = self.try_optimize_or_to_in(children, optimizations) {
                    expr
                } else {
                    let mut exprs = Vec::with_capacity(children.len());
                    for child in children {
                        exprs.push(self.compile_predicate(child, optimizations)?);
                    }
                    combine(exprs, SimpleExpr::or)
                }
            }
            Predicate::Not(inner) => self.compile_predicate(inner, optimizations)?.not(),
        };

        Ok(expr)
    }

    /// Rewrites `a=1|a=2|...` to `a IN (1, 2, ...)` once there are enough alternatives.
    fn try_optimize_or_to_in(
        &self,
        children: &[Predicate],
        optimizations: &mut Vec<Optimization>,
    ) -> Option<SimpleExpr> {
        let (property, values) = self.extract_equality_values(children)?;
        if values.len() < self.config.max_or_conditions_for_in {
            return None;
        }

        let column = ColumnName::for_property(property);
        optimizations.push(Optimization::OrToIn {
            column: column.0.clone(),
            value_count: values.len(),
        });
        Some(Expr::col(column).is_in(values.into_iter().map(operand_to_value)))
    }

    /// The shared property and values when every alternative is an equality on it.
    fn extract_equality_values<'a>(
        &self,
        children: &'a [Predicate],
    ) -> Option<(&'a PropertyId, Vec<&'a str>)> {
        let mut target: Option<&PropertyId> = None;
        let mut values = Vec::new();

        for child in children {
            match child {
                Predicate::Comparison { op: CompOp::Eq, property, value } => {
                    if target.is_some_and(|t| t != property) {
                        return None;
                    }
                    target = Some(property);
                    values.push(value.as_str());
                }
                // other shapes break the equality pattern
                _ => return None,
            }
        }

        target.map(|t| (t, values))
    }

    fn compile_in(
        &self,
        property: &PropertyId,
        values: &[String],
        optimizations: &mut Vec<Optimization>,
    ) -> SimpleExpr {
        let column = ColumnName::for_property(property);
        if values.len() > self.config.max_in_values {
            optimizations.push(Optimization::InToUnion {
                column: column.0.clone(),
                total_values: values.len(),
                union_count: values.len().div_ceil(self.config.max_in_values),
            });
        }
        Expr::col(column).is_in(values.iter().map(|v| operand_to_value(v)))
    }

    /// `!=` also matches missing values, so NULL columns satisfy it.
    fn compile_comparison(&self, op: CompOp, property: &PropertyId, value: &str) -> SimpleExpr {
        let col = || Expr::col(ColumnName::for_property(property));
        let val = operand_to_value(value);

        match op {
            CompOp::Eq => col().eq(val),
            CompOp::NotEq => col().ne(val).or(col().is_null()),
            CompOp::Gt => col().gt(val),
            CompOp::Lt => col().lt(val),
            CompOp::Gte => col().gte(val),
            CompOp::Lte => col().lte(val),
        }
    }
}

fn combine(exprs: Vec<SimpleExpr>, join: fn(SimpleExpr, SimpleExpr) -> SimpleExpr) -> SimpleExpr {
    exprs.into_iter().reduce(join).unwrap_or_else(|| Expr::val(true).into())
}

/// Query operands are untyped strings; integers and floats are bound as numbers.
fn operand_to_value(operand: &str) -> Value {
    if let Ok(n) = operand.parse::<i64>() {
        Value::BigInt(Some(n))
    } else if let Ok(f) = operand.parse::<f64>() {
        Value::Double(Some(f))
    } else {
        Value::String(Some(Box::new(operand.to_string())))
    }
}
