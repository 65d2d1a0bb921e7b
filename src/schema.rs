//! Per-resource-type metadata: key properties, supported properties and
//! sub-resource relationships.
//!
//! The registry is built once at start-up (in code or from the JSON config) and
//! handed to queries and executors by reference; nothing here is mutated while
//! queries run.

use crate::error::{QueryError, Result};
use crate::property::{PropertyId, ResourceType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A sub-resource declared by a parent resource type, e.g. the `hosts` of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubResourceDefinition {
    pub kind: ResourceType,
    /// The name the sub-resource is requested and rendered under.
    pub name: String,
    pub is_collection: bool,
    /// Foreign keys requested in addition to the primary key of the sub-resource.
    pub additional_foreign_keys: Vec<ResourceType>,
}

impl SubResourceDefinition {
    pub fn new(kind: impl Into<ResourceType>, name: &str) -> Self {
        Self {
            kind: kind.into(),
            name: name.to_string(),
            is_collection: true,
            additional_foreign_keys: Vec::new(),
        }
    }

    pub fn singular(mut self) -> Self {
        self.is_collection = false;
        self
    }

    pub fn with_foreign_key(mut self, kind: impl Into<ResourceType>) -> Self {
        self.additional_foreign_keys.push(kind.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSchema {
    pub kind: ResourceType,
    /// Key property per resource type: the primary key plus the foreign keys of ancestors.
    key_properties: BTreeMap<ResourceType, PropertyId>,
    properties: BTreeSet<PropertyId>,
    sub_resources: Vec<SubResourceDefinition>,
}

impl ResourceSchema {
    pub fn new(kind: impl Into<ResourceType>) -> Self {
        Self {
            kind: kind.into(),
            key_properties: BTreeMap::new(),
            properties: BTreeSet::new(),
            sub_resources: Vec::new(),
        }
    }

    pub fn key_property(mut self, kind: impl Into<ResourceType>, path: &str) -> Self {
        let id = PropertyId::parse(path);
        self.properties.insert(id.clone());
        self.key_properties.insert(kind.into(), id);
        self
    }

    pub fn property(mut self, path: &str) -> Self {
        self.properties.insert(PropertyId::parse(path));
        self
    }

    pub fn temporal_property(mut self, path: &str) -> Self {
        self.properties.replace(PropertyId::parse(path).with_temporal(true));
        self
    }

    pub fn sub_resource(mut self, definition: SubResourceDefinition) -> Self {
        self.sub_resources.push(definition);
        self
    }

    pub fn key_property_id(&self, kind: &ResourceType) -> Option<&PropertyId> {
        self.key_properties.get(kind)
    }

    /// Primary key first, then the foreign keys in type order.
    pub fn key_property_ids(&self) -> impl Iterator<Item = (&ResourceType, &PropertyId)> {
        let own = self.key_properties.get_key_value(&self.kind);
        own.into_iter()
            .chain(self.key_properties.iter().filter(move |(kind, _)| **kind != self.kind))
    }

    pub fn sub_resources(&self) -> &[SubResourceDefinition] {
        &self.sub_resources
    }

    pub fn sub_resource_named(&self, name: &str) -> Option<&SubResourceDefinition> {
        self.sub_resources.iter().find(|d| d.name == name)
    }

    /// Builds the id for `category/name`, carrying the schema's temporal flag when known.
    pub fn resolve_property(&self, category: Option<&str>, name: &str) -> PropertyId {
        let id = PropertyId::new(category, name, false);
        self.properties.get(&id).cloned().unwrap_or(id)
    }

    pub fn resolve_path(&self, path: &str) -> PropertyId {
        let id = PropertyId::parse(path);
        self.resolve_property(id.category(), id.name())
    }

    /// Wildcard expansion: every supported property, or those under `category`.
    pub fn property_ids(&self, category: Option<&str>) -> Vec<PropertyId> {
        match category {
            None => self.properties.iter().cloned().collect(),
            Some(category) => {
                let category = PropertyId::parse(category);
                self.properties
                    .iter()
                    .filter(|p| category.covers(p.path()))
                    .cloned()
                    .collect()
            }
        }
    }

    /// A property id is supported when it names a known property or a category of one.
    pub fn is_supported(&self, id: &PropertyId) -> bool {
        self.properties.iter().any(|p| id.covers(p.path()))
    }
}

/// Read-only schemas for every resource type the engine serves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaRegistry {
    schemas: HashMap<ResourceType, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: ResourceSchema) -> Self {
        self.schemas.insert(schema.kind.clone(), schema);
        self
    }

    pub fn schema(&self, kind: &ResourceType) -> Result<&ResourceSchema> {
        self.schemas.get(kind).ok_or_else(|| {
            QueryError::system(format!("no schema registered for resource type {}", kind))
        })
    }

    /// The key property of `key_kind` as seen from the schema of `kind`.
    pub fn key_property_id(
        &self,
        kind: &ResourceType,
        key_kind: &ResourceType,
    ) -> Option<&PropertyId> {
        self.schemas.get(kind)?.key_property_id(key_kind)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.schemas.keys()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Cluster → (hosts, services); service → components.
    pub fn cluster_registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .register(
                ResourceSchema::new("Cluster")
                    .key_property("Cluster", "Clusters/cluster_name")
                    .property("Clusters/version")
                    .temporal_property("metrics/load/1-min")
                    .sub_resource(SubResourceDefinition::new("Host", "hosts"))
                    .sub_resource(SubResourceDefinition::new("Service", "services")),
            )
            .register(
                ResourceSchema::new("Host")
                    .key_property("Cluster", "Hosts/cluster_name")
                    .key_property("Host", "Hosts/host_name")
                    .property("Hosts/cpu_count")
                    .property("Hosts/state")
                    .temporal_property("metrics/cpu/cpu_user")
                    .temporal_property("metrics/cpu/cpu_system"),
            )
            .register(
                ResourceSchema::new("Service")
                    .key_property("Cluster", "ServiceInfo/cluster_name")
                    .key_property("Service", "ServiceInfo/service_name")
                    .property("ServiceInfo/state")
                    .sub_resource(
                        SubResourceDefinition::new("Component", "components")
                            .with_foreign_key("Service"),
                    ),
            )
            .register(
                ResourceSchema::new("Component")
                    .key_property("Cluster", "ServiceComponentInfo/cluster_name")
                    .key_property("Service", "ServiceComponentInfo/service_name")
                    .key_property("Component", "ServiceComponentInfo/component_name")
                    .property("ServiceComponentInfo/state"),
            )
    }
}
