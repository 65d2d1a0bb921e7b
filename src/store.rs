//! An in-memory [`ResourceFetch`] backed by per-type resource lists.

use crate::config::{read_json_file, ConfigError};
use crate::error::{QueryError, Result};
use crate::executor::ResourceFetch;
use crate::predicate::Predicate;
use crate::property::{Resource, ResourceType};
use crate::query::Request;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceStore {
    resources: HashMap<ResourceType, Vec<Resource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a type known without adding any resource of it.
    pub fn register_type(&mut self, kind: impl Into<ResourceType>) {
        self.resources.entry(kind.into()).or_default();
    }

    pub fn insert(&mut self, resource: Resource) {
        self.resources.entry(resource.kind.clone()).or_default().push(resource);
    }

    pub fn len(&self, kind: &ResourceType) -> usize {
        self.resources.get(kind).map_or(0, Vec::len)
    }

    /// Loads `{ "Type": [ { ... }, ... ] }`.
    ///
    /// Nested objects are flattened into slash-separated paths, so
    /// `{"Hosts": {"host_name": "h1"}}` and `{"Hosts/host_name": "h1"}` are equivalent.
    pub fn from_json_str(json: &str) -> std::result::Result<Self, ConfigError> {
        let data: BTreeMap<ResourceType, Vec<Map<String, Value>>> =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                origin: "inline data".to_string(),
                source,
            })?;
        Ok(Self::from_data(data))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let data: BTreeMap<ResourceType, Vec<Map<String, Value>>> = read_json_file(path)?;
        Ok(Self::from_data(data))
    }

    fn from_data(data: BTreeMap<ResourceType, Vec<Map<String, Value>>>) -> Self {
        let mut store = Self::new();
        for (kind, objects) in data {
            store.register_type(kind.clone());
            for object in objects {
                let mut resource = Resource::new(kind.clone());
                flatten_into(None, object, &mut resource.properties);
                store.insert(resource);
            }
        }
        store
    }
}

fn flatten_into(
    prefix: Option<&str>,
    object: Map<String, Value>,
    out: &mut BTreeMap<String, Value>,
) {
    for (key, value) in object {
        let path = match prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key,
        };
        match value {
            Value::Object(inner) => flatten_into(Some(&path), inner, out),
            leaf => {
                out.insert(path, leaf);
            }
        }
    }
}

impl ResourceFetch for InMemoryResourceStore {
    fn get_resources(
        &self,
        kind: &ResourceType,
        request: &Request,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Resource>> {
        let resources = self.resources.get(kind).ok_or_else(|| {
            QueryError::system(format!("no resources of type {} are provided", kind))
        })?;

        Ok(resources
            .iter()
            .filter(|r| predicate.map_or(true, |p| p.evaluate(r)))
            .map(|r| {
                if request.is_all() {
                    r.clone()
                } else {
                    r.project(request.property_ids().iter())
                }
            })
            .collect())
    }
}
