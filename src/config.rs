//! Configuration loading: the schema registry and SQL table mappings as JSON.
//!
//! ```json
//! {
//!   "resources": {
//!     "Host": {
//!       "key_properties": { "Cluster": "Hosts/cluster_name", "Host": "Hosts/host_name" },
//!       "properties": ["Hosts/state"],
//!       "temporal_properties": ["metrics/cpu/cpu_user"],
//!       "sub_resources": [{ "type": "HostComponent", "name": "host_components" }]
//!     }
//!   },
//!   "table_mapping": { "Host": "hosts" }
//! }
//! ```

use crate::property::ResourceType;
use crate::schema::{ResourceSchema, SchemaRegistry, SubResourceDefinition};
use crate::sql_compiler::{OptimizationConfig, SqlCompiler};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse JSON from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Reads and deserializes a JSON file.
pub fn read_json_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        origin: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubResourceConfig {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    #[serde(default = "default_true")]
    pub collection: bool,
    #[serde(default)]
    pub foreign_keys: Vec<ResourceType>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Key property per resource type; must contain the resource's own type.
    pub key_properties: BTreeMap<ResourceType, String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub temporal_properties: Vec<String>,
    #[serde(default)]
    pub sub_resources: Vec<SubResourceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub resources: BTreeMap<ResourceType, ResourceConfig>,
    /// Resource type to SQL table name.
    #[serde(default)]
    pub table_mapping: HashMap<String, String>,
    #[serde(default)]
    pub max_or_conditions_for_in: Option<usize>,
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json_file(path)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            origin: "inline config".to_string(),
            source,
        })
    }

    /// Builds the registry, checking that every resource has a primary key and
    /// every sub-resource names a configured type.
    pub fn schema_registry(&self) -> Result<SchemaRegistry, ConfigError> {
        let mut registry = SchemaRegistry::new();

        for (kind, resource) in &self.resources {
            if !resource.key_properties.contains_key(kind) {
                return Err(ConfigError::Invalid(format!(
                    "resource type {} does not declare its own key property",
                    kind
                )));
            }

            let mut schema = ResourceSchema::new(kind.clone());
            for (key_kind, path) in &resource.key_properties {
                schema = schema.key_property(key_kind.clone(), path);
            }
            for path in &resource.properties {
                schema = schema.property(path);
            }
            for path in &resource.temporal_properties {
                schema = schema.temporal_property(path);
            }
            for sub in &resource.sub_resources {
                if !self.resources.contains_key(&sub.kind) {
                    return Err(ConfigError::Invalid(format!(
                        "sub-resource {} of {} has unknown type {}",
                        sub.name, kind, sub.kind
                    )));
                }
                let mut definition = SubResourceDefinition::new(sub.kind.clone(), &sub.name);
                if !sub.collection {
                    definition = definition.singular();
                }
                for fk in &sub.foreign_keys {
                    definition = definition.with_foreign_key(fk.clone());
                }
                schema = schema.sub_resource(definition);
            }

            registry = registry.register(schema);
        }

        Ok(registry)
    }

    pub fn sql_compiler(&self) -> SqlCompiler {
        let mut optimization = OptimizationConfig::default();
        if let Some(threshold) = self.max_or_conditions_for_in {
            optimization.max_or_conditions_for_in = threshold;
        }
        let mut compiler = SqlCompiler::with_config(optimization);
        compiler.set_table_mapping(self.table_mapping.clone());
        compiler
    }
}
