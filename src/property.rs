//! The generic resource property model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The name of a resource type, e.g. `Cluster` or `Host`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(pub String);

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(name: &str) -> Self {
        ResourceType(name.to_string())
    }
}

/// A `(category, name)` pair addressing a single field, e.g. `HostRoles/state`.
///
/// Equality, ordering and hashing only look at the combined path; the temporal
/// flag is metadata carried along for request building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyId {
    path: String,
    #[serde(default)]
    temporal: bool,
}

impl PropertyId {
    pub fn new(category: Option<&str>, name: &str, temporal: bool) -> Self {
        let path = match category {
            Some(category) if !category.is_empty() => format!("{}/{}", category, name),
            _ => name.to_string(),
        };
        PropertyId { path, temporal }
    }

    /// Builds an id from its combined `category/name` form.
    pub fn parse(path: &str) -> Self {
        PropertyId { path: path.to_string(), temporal: false }
    }

    pub fn with_temporal(mut self, temporal: bool) -> Self {
        self.temporal = temporal;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn category(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(category, _)| category)
    }

    pub fn name(&self) -> &str {
        self.path.rsplit_once('/').map_or(self.path.as_str(), |(_, name)| name)
    }

    pub fn is_temporal(&self) -> bool {
        self.temporal
    }

    /// True when `other` is this id or lives in the category this id names.
    pub fn covers(&self, other: &str) -> bool {
        other == self.path
            || (other.len() > self.path.len()
                && other.starts_with(self.path.as_str())
                && other.as_bytes()[self.path.len()] == b'/')
    }
}

impl PartialEq for PropertyId {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for PropertyId {}

impl Hash for PropertyId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl PartialOrd for PropertyId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropertyId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A time range narrowing which time-series values are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalInfo {
    pub start: i64,
    pub end: Option<i64>,
    pub step: Option<i64>,
}

impl TemporalInfo {
    pub fn new(start: i64, end: Option<i64>, step: Option<i64>) -> Self {
        Self { start, end, step }
    }
}

/// A resource instance as returned by the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceType,
    pub properties: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(kind: impl Into<ResourceType>) -> Self {
        Resource { kind: kind.into(), properties: BTreeMap::new() }
    }

    pub fn with_property(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set_property(path, value);
        self
    }

    pub fn set_property(&mut self, path: &str, value: impl Into<Value>) {
        self.properties.insert(path.to_string(), value.into());
    }

    /// The value of a property; JSON `null` counts as absent.
    pub fn property(&self, id: &PropertyId) -> Option<&Value> {
        self.properties.get(id.path()).filter(|v| !v.is_null())
    }

    /// The property as a plain string, the form used for key bindings.
    pub fn property_string(&self, id: &PropertyId) -> Option<String> {
        self.property(id).map(value_to_string)
    }

    /// True when no non-null property lives under the given category.
    pub fn is_category_empty(&self, category: &PropertyId) -> bool {
        !self.properties.iter().any(|(path, value)| {
            !value.is_null() && category.covers(path) && path != category.path()
        })
    }

    /// A copy holding only the properties covered by `ids`.
    pub fn project<'a, I>(&self, ids: I) -> Resource
    where
        I: IntoIterator<Item = &'a PropertyId> + Clone,
    {
        let properties = self
            .properties
            .iter()
            .filter(|(path, _)| ids.clone().into_iter().any(|id| id.covers(path)))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        Resource { kind: self.kind.clone(), properties }
    }
}

/// Renders a value the way it appears in a query string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Compares a stored property value with a query operand.
///
/// Numeric ordering is used when both sides parse as numbers, otherwise the
/// string forms are compared lexically.
pub fn compare_values(property: &Value, operand: &str) -> Ordering {
    if let (Some(lhs), Ok(rhs)) = (value_as_number(property), operand.trim().parse::<f64>()) {
        if let Some(ordering) = lhs.partial_cmp(&rhs) {
            return ordering;
        }
    }
    value_to_string(property).as_str().cmp(operand)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_property_id_parts() {
        let id = PropertyId::parse("metrics/cpu/cpu_user");
        assert_eq!(id.category(), Some("metrics/cpu"));
        assert_eq!(id.name(), "cpu_user");

        let bare = PropertyId::new(None, "name", false);
        assert_eq!(bare.category(), None);
        assert_eq!(bare.to_string(), "name");
    }

    #[test]
    fn test_property_id_identity_ignores_temporal_flag() {
        let a = PropertyId::new(Some("metrics/cpu"), "cpu_user", true);
        let b = PropertyId::parse("metrics/cpu/cpu_user");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_covers() {
        let category = PropertyId::parse("metrics/cpu");
        assert!(category.covers("metrics/cpu"));
        assert!(category.covers("metrics/cpu/cpu_user"));
        assert!(!category.covers("metrics/cpu_count"));
        assert!(!category.covers("metrics"));
    }

    #[test]
    fn test_numeric_comparison_when_both_sides_are_numbers() {
        assert_eq!(compare_values(&json!(10), "9"), Ordering::Greater);
        assert_eq!(compare_values(&json!("10"), "9"), Ordering::Greater);
        assert_eq!(compare_values(&json!(1), "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_string_comparison_fallback() {
        // "10" vs "abc" is lexical because "abc" is not a number.
        assert_eq!(compare_values(&json!("abc"), "9"), Ordering::Greater);
        assert_eq!(compare_values(&json!(10), "9a"), Ordering::Less);
        assert_eq!(compare_values(&json!("STARTED"), "STARTED"), Ordering::Equal);
        assert_eq!(compare_values(&json!(true), "true"), Ordering::Equal);
    }

    #[test]
    fn test_category_empty_and_projection() {
        let resource = Resource::new("Host")
            .with_property("Hosts/host_name", "h1")
            .with_property("metrics/cpu/cpu_user", 0.5)
            .with_property("metrics/disk/free", Value::Null);

        assert!(!resource.is_category_empty(&PropertyId::parse("metrics")));
        assert!(resource.is_category_empty(&PropertyId::parse("metrics/disk")));
        assert!(resource.is_category_empty(&PropertyId::parse("alerts")));

        let ids = [PropertyId::parse("metrics")];
        let projected = resource.project(ids.iter());
        assert_eq!(projected.properties.len(), 2);
        assert!(projected.property(&PropertyId::parse("Hosts/host_name")).is_none());
    }
}
