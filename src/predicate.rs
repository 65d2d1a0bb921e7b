//! Predicate trees evaluated against a resource's property map.

use crate::error::{QueryError, Result};
use crate::property::{compare_values, PropertyId, Resource};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Relational operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompOp {
    Eq,    // =
    NotEq, // !=
    Gt,    // >
    Lt,    // <
    Gte,   // >=
    Lte,   // <=
}

impl CompOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(CompOp::Eq),
            "!=" => Some(CompOp::NotEq),
            ">" => Some(CompOp::Gt),
            "<" => Some(CompOp::Lt),
            ">=" => Some(CompOp::Gte),
            "<=" => Some(CompOp::Lte),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompOp::Eq => "=",
            CompOp::NotEq => "!=",
            CompOp::Gt => ">",
            CompOp::Lt => "<",
            CompOp::Gte => ">=",
            CompOp::Lte => "<=",
        }
    }

    /// Applies the operator to `property <op> operand`.
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompOp::Eq => ordering == Ordering::Equal,
            CompOp::NotEq => ordering != Ordering::Equal,
            CompOp::Gt => ordering == Ordering::Greater,
            CompOp::Lt => ordering == Ordering::Less,
            CompOp::Gte => ordering != Ordering::Less,
            CompOp::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A compiled `.matches(` pattern. Compared by its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compiles a pattern that must match the whole property value.
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| {
            QueryError::invalid(format!("invalid regular expression '{}': {}", source, e))
        })?;
        Ok(Pattern { source: source.to_string(), regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A boolean expression over resource properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `property <op> value`
    Comparison { op: CompOp, property: PropertyId, value: String },
    /// `property.in(v1,v2,...)`
    In { property: PropertyId, values: Vec<String> },
    /// `property.matches(regex)`
    Matches { property: PropertyId, pattern: Pattern },
    /// `category.isEmpty()`
    IsEmpty { category: PropertyId },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn comparison(op: CompOp, property: PropertyId, value: impl Into<String>) -> Self {
        Predicate::Comparison { op, property, value: value.into() }
    }

    pub fn equals(property: PropertyId, value: impl Into<String>) -> Self {
        Self::comparison(CompOp::Eq, property, value)
    }

    pub fn matches(property: PropertyId, pattern: &str) -> Result<Self> {
        Ok(Predicate::Matches { property, pattern: Pattern::new(pattern)? })
    }

    /// Conjunction of two predicates; nested conjunctions are flattened.
    pub fn and(left: Predicate, right: Predicate) -> Self {
        let mut children = Vec::new();
        for p in [left, right] {
            match p {
                Predicate::And(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        Predicate::And(children)
    }

    /// Disjunction of two predicates; nested disjunctions are flattened.
    pub fn or(left: Predicate, right: Predicate) -> Self {
        let mut children = Vec::new();
        for p in [left, right] {
            match p {
                Predicate::Or(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        Predicate::Or(children)
    }

    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    /// Conjunction of any number of predicates; `None` when there are none.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::and)
    }

    pub fn evaluate(&self, resource: &Resource) -> bool {
        match self {
            Predicate::Comparison { op: CompOp::NotEq, property, value } => {
                !Self::comparison(CompOp::Eq, property.clone(), value.as_str()).evaluate(resource)
            }
            Predicate::Comparison { op, property, value } => resource
                .property(property)
                .is_some_and(|v| op.holds(compare_values(v, value))),
            Predicate::In { property, values } => resource.property(property).is_some_and(|v| {
                values.iter().any(|candidate| compare_values(v, candidate) == Ordering::Equal)
            }),
            Predicate::Matches { property, pattern } => resource
                .property_string(property)
                .is_some_and(|v| pattern.is_match(&v)),
            Predicate::IsEmpty { category } => resource.is_category_empty(category),
            Predicate::And(children) => children.iter().all(|p| p.evaluate(resource)),
            Predicate::Or(children) => children.iter().any(|p| p.evaluate(resource)),
            Predicate::Not(inner) => !inner.evaluate(resource),
        }
    }

    /// The part of the predicate over the properties `scope` maps, each
    /// renamed to the id `scope` returns.
    ///
    /// Clauses outside the scope count as satisfied, so the result accepts at
    /// least every resource the full predicate accepts. A negation that spans
    /// such a clause is dropped as a whole. `None` when nothing is left.
    pub fn restrict<F>(&self, scope: &F) -> Option<Predicate>
    where
        F: Fn(&PropertyId) -> Option<PropertyId>,
    {
        self.restrict_exact(scope).0
    }

    /// The restricted predicate and whether it is exact, i.e. nothing was dropped.
    fn restrict_exact<F>(&self, scope: &F) -> (Option<Predicate>, bool)
    where
        F: Fn(&PropertyId) -> Option<PropertyId>,
    {
        let leaf = |restricted: Option<Predicate>| {
            let exact = restricted.is_some();
            (restricted, exact)
        };
        match self {
            Predicate::Comparison { op, property, value } => {
                leaf(scope(property).map(|p| Self::comparison(*op, p, value.as_str())))
            }
            Predicate::In { property, values } => leaf(
                scope(property).map(|property| Predicate::In { property, values: values.clone() }),
            ),
            Predicate::Matches { property, pattern } => leaf(
                scope(property)
                    .map(|property| Predicate::Matches { property, pattern: pattern.clone() }),
            ),
            Predicate::IsEmpty { category } => {
                leaf(scope(category).map(|category| Predicate::IsEmpty { category }))
            }
            Predicate::And(children) => {
                let mut exact = true;
                let mut kept = Vec::new();
                for child in children {
                    let (restricted, child_exact) = child.restrict_exact(scope);
                    exact &= child_exact;
                    kept.extend(restricted);
                }
                (Predicate::all(kept), exact)
            }
            Predicate::Or(children) => {
                let mut exact = true;
                let mut kept = Vec::new();
                for child in children {
                    match child.restrict_exact(scope) {
                        (Some(restricted), child_exact) => {
                            exact &= child_exact;
                            kept.push(restricted);
                        }
                        // an unconstrained branch admits everything
                        (None, _) => return (None, false),
                    }
                }
                (kept.into_iter().reduce(Predicate::or), exact)
            }
            Predicate::Not(inner) => match inner.restrict_exact(scope) {
                (Some(restricted), true) => (Some(Predicate::not(restricted)), true),
                _ => (None, false),
            },
        }
    }

    /// Every property id the predicate references.
    pub fn property_ids(&self) -> BTreeSet<PropertyId> {
        let mut ids = BTreeSet::new();
        self.collect_property_ids(&mut ids);
        ids
    }

    fn collect_property_ids(&self, ids: &mut BTreeSet<PropertyId>) {
        match self {
            Predicate::Comparison { property, .. }
            | Predicate::In { property, .. }
            | Predicate::Matches { property, .. } => {
                ids.insert(property.clone());
            }
            Predicate::IsEmpty { category } => {
                ids.insert(category.clone());
            }
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_property_ids(ids);
                }
            }
            Predicate::Not(inner) => inner.collect_property_ids(ids),
        }
    }
}

/// Renders the canonical query-string form, which parses back to an equal tree.
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Comparison { op, property, value } => {
                write!(f, "{}{}{}", property, op.symbol(), value)
            }
            Predicate::In { property, values } => {
                write!(f, "{}.in({})", property, values.join(","))
            }
            Predicate::Matches { property, pattern } => {
                write!(f, "{}.matches({})", property, pattern.as_str())
            }
            Predicate::IsEmpty { category } => write!(f, "{}.isEmpty()", category),
            Predicate::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str("&")?;
                    }
                    match child {
                        Predicate::Or(_) => write!(f, "({})", child)?,
                        _ => write!(f, "{}", child)?,
                    }
                }
                Ok(())
            }
            Predicate::Or(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{}", child)?;
                }
                Ok(())
            }
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::And(_) | Predicate::Or(_) => write!(f, "!({})", inner),
                _ => write!(f, "!{}", inner),
            },
        }
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
