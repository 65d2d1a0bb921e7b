//! Read queries against a single resource type and its sub-resources.
//!
//! A [`Query`] is built per request: created with the key values bound from the
//! request path, populated through [`Query::add_property`] from the requested
//! fields, given a user predicate, and finally executed once.

use crate::error::{QueryError, Result};
use crate::executor::{QueryExecutor, ResourceFetch, TreeNode};
use crate::predicate::Predicate;
use crate::property::{PropertyId, ResourceType, TemporalInfo};
use crate::schema::{ResourceSchema, SchemaRegistry, SubResourceDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Key values bound for a query: resource type → id, `None` when unbound.
pub type KeyValueMap = BTreeMap<ResourceType, Option<String>>;

/// The properties to fetch and the time ranges to fetch them for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    property_ids: BTreeSet<PropertyId>,
    temporal: BTreeMap<PropertyId, TemporalInfo>,
    default_temporal: Option<TemporalInfo>,
}

impl Request {
    /// A request for every property of the resource.
    pub fn all(default_temporal: Option<TemporalInfo>) -> Self {
        Request { default_temporal, ..Default::default() }
    }

    pub fn of<I: IntoIterator<Item = PropertyId>>(ids: I) -> Self {
        Request { property_ids: ids.into_iter().collect(), ..Default::default() }
    }

    /// An empty property set means every property is requested.
    pub fn is_all(&self) -> bool {
        self.property_ids.is_empty()
    }

    pub fn property_ids(&self) -> &BTreeSet<PropertyId> {
        &self.property_ids
    }

    /// True when the property at `path` is requested directly or through its category.
    pub fn includes(&self, path: &str) -> bool {
        self.is_all() || self.property_ids.iter().any(|id| id.covers(path))
    }

    /// The explicit range of the property or its closest category, else the default.
    pub fn temporal_info(&self, id: &PropertyId) -> Option<&TemporalInfo> {
        self.temporal
            .iter()
            .filter(|(category, _)| category.covers(id.path()))
            .max_by_key(|(category, _)| category.path().len())
            .map(|(_, info)| info)
            .or(self.default_temporal.as_ref())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            return f.write_str("Request{properties=*}");
        }
        let ids: Vec<_> = self.property_ids.iter().map(PropertyId::path).collect();
        write!(f, "Request{{properties=[{}]", ids.join(", "))?;
        if !self.temporal.is_empty() || self.default_temporal.is_some() {
            let ranges = self.temporal.len() + usize::from(self.default_temporal.is_some());
            write!(f, ", temporal={}", ranges)?;
        }
        f.write_str("}")
    }
}

/// Offset pagination over the top-level resources of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRequest {
    pub property: PropertyId,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct Query<'s> {
    registry: &'s SchemaRegistry,
    schema: &'s ResourceSchema,
    key_values: KeyValueMap,
    properties: BTreeSet<PropertyId>,
    temporal: BTreeMap<PropertyId, TemporalInfo>,
    default_temporal: Option<TemporalInfo>,
    sub_resources: BTreeMap<String, Query<'s>>,
    all_properties: bool,
    user_predicate: Option<Predicate>,
    minimal: bool,
    page: Option<PageRequest>,
    sort: Option<SortRequest>,
}

impl<'s> Query<'s> {
    pub fn new(
        registry: &'s SchemaRegistry,
        kind: &ResourceType,
        key_values: KeyValueMap,
    ) -> Result<Self> {
        let schema = registry.schema(kind)?;
        Ok(Query {
            registry,
            schema,
            key_values,
            properties: BTreeSet::new(),
            temporal: BTreeMap::new(),
            default_temporal: None,
            sub_resources: BTreeMap::new(),
            all_properties: false,
            user_predicate: None,
            minimal: false,
            page: None,
            sort: None,
        })
    }

    pub fn kind(&self) -> &'s ResourceType {
        &self.schema.kind
    }

    pub fn schema(&self) -> &'s ResourceSchema {
        self.schema
    }

    pub fn key_values(&self) -> &KeyValueMap {
        &self.key_values
    }

    /// A query is a collection query unless its own resource id is bound.
    pub fn is_collection(&self) -> bool {
        self.key_values.get(self.kind()).map_or(true, Option::is_none)
    }

    pub fn properties(&self) -> &BTreeSet<PropertyId> {
        &self.properties
    }

    pub fn sub_resources(&self) -> &BTreeMap<String, Query<'s>> {
        &self.sub_resources
    }

    pub fn user_predicate(&self) -> Option<&Predicate> {
        self.user_predicate.as_ref()
    }

    /// Sets the user predicate. Clauses on `sub/property` ids add the named
    /// sub-resources to the query.
    pub fn set_user_predicate(&mut self, predicate: Option<Predicate>) -> Result<()> {
        if let Some(predicate) = &predicate {
            let categories: BTreeSet<&str> = predicate
                .property_ids()
                .iter()
                .filter_map(|id| self.sub_resource_property(id).map(|(name, _)| name))
                .collect();
            for name in categories {
                self.include_sub_resource(name)?;
            }
        }
        self.user_predicate = predicate;
        Ok(())
    }

    /// Splits `hosts/Hosts/state` into the sub-resource name and `Hosts/state`.
    fn sub_resource_property(&self, id: &PropertyId) -> Option<(&'s str, PropertyId)> {
        let schema = self.schema;
        let (head, rest) = id.path().split_once('/')?;
        let definition = schema.sub_resource_named(head)?;
        Some((definition.name.as_str(), PropertyId::parse(rest)))
    }

    /// True when the user predicate has clauses on sub-resource properties.
    pub fn has_sub_resource_predicate(&self) -> bool {
        self.user_predicate.as_ref().is_some_and(|p| {
            p.property_ids().iter().any(|id| self.sub_resource_property(id).is_some())
        })
    }

    /// The user predicate with its sub-resource clauses relaxed away; the part
    /// the fetch of this resource type can apply.
    pub fn local_predicate(&self) -> Option<Predicate> {
        self.user_predicate
            .as_ref()?
            .restrict(&|id| self.sub_resource_property(id).is_none().then(|| id.clone()))
    }

    /// The clauses on the named sub-resource, rewritten relative to it.
    pub fn sub_resource_predicate(&self, name: &str) -> Option<Predicate> {
        self.user_predicate.as_ref()?.restrict(&|id| {
            self.sub_resource_property(id)
                .filter(|(sub, _)| *sub == name)
                .map(|(_, relative)| relative)
        })
    }

    /// True when `id` is a property of this resource type, or of a declared
    /// sub-resource when prefixed by its name.
    pub fn supports_property(&self, id: &PropertyId) -> bool {
        schema_supports(self.registry, self.schema, id)
    }

    pub fn is_minimal(&self) -> bool {
        self.minimal
    }

    pub fn set_minimal(&mut self, minimal: bool) {
        self.minimal = minimal;
    }

    pub fn page_request(&self) -> Option<PageRequest> {
        self.page
    }

    pub fn set_page_request(&mut self, page: Option<PageRequest>) {
        self.page = page;
    }

    pub fn sort_request(&self) -> Option<&SortRequest> {
        self.sort.as_ref()
    }

    pub fn set_sort_request(&mut self, sort: Option<SortRequest>) {
        self.sort = sort;
    }

    /// Adds a requested field.
    ///
    /// `*` selects everything including all sub-resources, `category/*` selects a
    /// category, and a leading sub-resource name routes the rest of the path to
    /// that sub-resource's query.
    pub fn add_property(&mut self, property: &str, temporal: Option<TemporalInfo>) -> Result<()> {
        if property == "*" {
            self.all_properties = true;
            if temporal.is_some() {
                self.default_temporal = temporal;
            }
            let schema = self.schema;
            for definition in schema.sub_resources() {
                self.include_sub_resource(&definition.name)?;
            }
            return Ok(());
        }

        let (head, rest) = match property.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (property, None),
        };
        if self.schema.sub_resource_named(head).is_some() {
            let keys = self.response_key_ids();
            self.properties.extend(keys);
            let sub = self.include_sub_resource(head)?;
            if let Some(rest) = rest {
                sub.add_property(rest, temporal)?;
            }
            return Ok(());
        }

        let ids = match property.strip_suffix("/*") {
            Some(category) => self.schema.property_ids(Some(category)),
            None => {
                let id = self.schema.resolve_path(property);
                if self.schema.is_supported(&id) {
                    vec![id]
                } else {
                    Vec::new()
                }
            }
        };
        if ids.is_empty() {
            return Err(QueryError::UnsupportedProperty(format!(
                "{} is not a property of resource type {}",
                property,
                self.kind()
            )));
        }
        for id in ids {
            self.add_resolved_property(id, temporal);
        }
        Ok(())
    }

    fn add_resolved_property(&mut self, id: PropertyId, temporal: Option<TemporalInfo>) {
        if let Some(info) = temporal {
            let schema = self.schema;
            if schema.property_ids(Some(id.path())).iter().any(PropertyId::is_temporal) {
                self.temporal.insert(id.clone(), info);
            } else {
                debug!(property = %id, "ignoring time range on a property without time series");
            }
        }
        self.properties.insert(id);
    }

    /// Adds a property id without any sub-resource routing or validation.
    pub fn add_local_property(&mut self, id: PropertyId) {
        self.properties.insert(id);
    }

    /// Adds the named declared sub-resource to the query, returning its query.
    pub fn include_sub_resource(&mut self, name: &str) -> Result<&mut Query<'s>> {
        if !self.sub_resources.contains_key(name) {
            let definition = self.schema.sub_resource_named(name).ok_or_else(|| {
                QueryError::UnsupportedProperty(format!(
                    "{} is not a sub-resource of resource type {}",
                    name,
                    self.kind()
                ))
            })?;
            let template = self.sub_resource_template(definition)?;
            self.sub_resources.insert(name.to_string(), template);
        }
        self.sub_resources
            .get_mut(name)
            .ok_or_else(|| QueryError::system(format!("sub-resource {} vanished", name)))
    }

    /// Every declared sub-resource as a fresh query template.
    pub fn available_sub_resources(&self) -> Result<BTreeMap<String, Query<'s>>> {
        self.schema
            .sub_resources()
            .iter()
            .map(|d| Ok((d.name.clone(), self.sub_resource_template(d)?)))
            .collect()
    }

    fn sub_resource_template(&self, definition: &SubResourceDefinition) -> Result<Query<'s>> {
        let mut sub = Query::new(self.registry, &definition.kind, self.key_values.clone())?;
        sub.minimal = self.minimal;

        let sub_schema = sub.schema;
        if let Some(pk) = sub_schema.key_property_id(&definition.kind) {
            sub.add_local_property(pk.clone());
        }
        if !self.minimal {
            for fk in &definition.additional_foreign_keys {
                if let Some(id) = sub_schema.key_property_id(fk) {
                    sub.add_local_property(id.clone());
                }
            }
        }
        Ok(sub)
    }

    /// The sub-resources to execute: the requested ones, or every declared one when
    /// neither properties nor sub-resources were requested. Each carries its share
    /// of the user predicate and requests the properties that share reads.
    pub fn effective_sub_resources(&self) -> Result<BTreeMap<String, Query<'s>>> {
        let defaults = self.requested_property_ids().is_empty()
            && self.sub_resources.is_empty()
            && !self.all_properties;
        let mut subs = if defaults {
            self.available_sub_resources()?
        } else {
            self.sub_resources.clone()
        };

        if self.has_sub_resource_predicate() {
            for (name, sub) in subs.iter_mut() {
                let predicate = self.sub_resource_predicate(name);
                sub.set_user_predicate(predicate)?;
                let read = sub.local_predicate_ids();
                sub.properties.extend(read);
            }
        }
        Ok(subs)
    }

    /// Local property ids the user predicate reads.
    fn local_predicate_ids(&self) -> Vec<PropertyId> {
        let Some(predicate) = &self.user_predicate else {
            return Vec::new();
        };
        predicate
            .property_ids()
            .into_iter()
            .filter(|id| self.sub_resource_property(id).is_none())
            .collect()
    }

    /// A copy of this query bound to different key values.
    pub fn bind(&self, key_values: KeyValueMap) -> Query<'s> {
        let mut bound = self.clone();
        bound.key_values = key_values;
        bound
    }

    /// The primary key when minimal, every key otherwise.
    fn response_key_ids(&self) -> Vec<PropertyId> {
        if self.minimal {
            self.schema.key_property_id(self.kind()).cloned().into_iter().collect()
        } else {
            self.schema.key_property_ids().map(|(_, id)| id.clone()).collect()
        }
    }

    /// Requested properties plus the key properties a collection query always returns.
    fn requested_property_ids(&self) -> BTreeSet<PropertyId> {
        let mut ids = self.properties.clone();
        if self.is_collection() {
            ids.extend(self.response_key_ids());
        }
        ids
    }

    pub fn create_request(&self) -> Request {
        let property_ids = if self.all_properties {
            BTreeSet::new()
        } else {
            let mut ids = self.requested_property_ids();
            ids.extend(self.sort.as_ref().map(|s| s.property.clone()));
            // the joined predicate is evaluated on fetched rows
            if !ids.is_empty() && self.has_sub_resource_predicate() {
                ids.extend(self.local_predicate_ids());
            }
            ids
        };
        Request {
            property_ids,
            temporal: self.temporal.clone(),
            default_temporal: self.default_temporal,
        }
    }

    /// Equality predicates on every bound key this resource type knows about.
    pub fn key_predicate(&self, key_values: &KeyValueMap) -> Option<Predicate> {
        Predicate::all(key_values.iter().filter_map(|(kind, value)| {
            let value = value.as_ref()?;
            let id = self.schema.key_property_id(kind)?;
            Some(Predicate::equals(id.clone(), value.as_str()))
        }))
    }

    /// The predicate used at execution time: key identity AND the local part of
    /// the user predicate.
    pub fn predicate(&self) -> Option<Predicate> {
        Predicate::all(
            self.key_predicate(&self.key_values)
                .into_iter()
                .chain(self.local_predicate()),
        )
    }

    pub fn execute<F: ResourceFetch + ?Sized>(&self, fetch: &F) -> Result<TreeNode> {
        QueryExecutor::new(self.registry, fetch).execute(self)
    }
}

fn schema_supports(registry: &SchemaRegistry, schema: &ResourceSchema, id: &PropertyId) -> bool {
    if let Some((head, rest)) = id.path().split_once('/') {
        if let Some(definition) = schema.sub_resource_named(head) {
            return registry
                .schema(&definition.kind)
                .is_ok_and(|sub| schema_supports(registry, sub, &PropertyId::parse(rest)));
        }
    }
    schema.is_supported(id)
}

/// Resolves a resource path such as `Cluster/c1/hosts/h1` into the target type and
/// its key bindings. The first segment names a resource type; after that, ids and
/// sub-resource names alternate.
pub fn resolve_resource_path(
    registry: &SchemaRegistry,
    path: &str,
) -> Result<(ResourceType, KeyValueMap)> {
    let mut segments = path.trim_matches('/').split('/').filter(|s| !s.is_empty());
    let first = segments
        .next()
        .ok_or_else(|| QueryError::invalid("empty resource path"))?;
    let mut kind = ResourceType::from(first);
    let mut schema = registry
        .schema(&kind)
        .map_err(|_| QueryError::invalid(format!("unknown resource type '{}'", first)))?;
    let mut key_values = KeyValueMap::new();
    key_values.insert(kind.clone(), None);

    while let Some(id) = segments.next() {
        key_values.insert(kind.clone(), Some(id.to_string()));
        let Some(name) = segments.next() else { break };
        let definition = schema.sub_resource_named(name).ok_or_else(|| {
            QueryError::invalid(format!("'{}' is not a sub-resource of {}", name, kind))
        })?;
        kind = definition.kind.clone();
        schema = registry.schema(&kind)?;
        key_values.insert(kind.clone(), None);
    }

    Ok((kind, key_values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::cluster_registry;

    fn keys(pairs: &[(&str, Option<&str>)]) -> KeyValueMap {
        pairs
            .iter()
            .map(|(k, v)| (ResourceType::from(*k), v.map(str::to_string)))
            .collect()
    }

    fn new_query<'s>(
        registry: &'s SchemaRegistry,
        kind: &str,
        bound: &[(&str, Option<&str>)],
    ) -> Query<'s> {
        Query::new(registry, &ResourceType::from(kind), keys(bound)).unwrap()
    }

    fn paths(ids: &BTreeSet<PropertyId>) -> Vec<&str> {
        ids.iter().map(PropertyId::path).collect()
    }

    #[test]
    fn test_is_collection() {
        let registry = cluster_registry();

        let q = new_query(&registry, "Host", &[("Cluster", Some("c1")), ("Host", None)]);
        assert!(q.is_collection());

        let q = new_query(&registry, "Host", &[("Cluster", Some("c1")), ("Host", Some("h1"))]);
        assert!(!q.is_collection());
    }

    #[test]
    fn test_collection_request_includes_key_properties() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[("Cluster", Some("c1"))]);
        q.add_property("Hosts/state", None).unwrap();

        let request = q.create_request();
        assert_eq!(
            paths(request.property_ids()),
            vec!["Hosts/cluster_name", "Hosts/host_name", "Hosts/state"]
        );

        q.set_minimal(true);
        let minimal = q.create_request();
        assert_eq!(paths(minimal.property_ids()), vec!["Hosts/host_name", "Hosts/state"]);
    }

    #[test]
    fn test_instance_request_has_only_requested_properties() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[("Cluster", Some("c1")), ("Host", Some("h1"))]);
        q.add_property("Hosts/state", None).unwrap();
        assert_eq!(paths(q.create_request().property_ids()), vec!["Hosts/state"]);
    }

    #[test]
    fn test_category_wildcard() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[("Host", Some("h1"))]);
        q.add_property("metrics/cpu/*", None).unwrap();
        assert_eq!(paths(q.properties()), vec!["metrics/cpu/cpu_system", "metrics/cpu/cpu_user"]);

        assert!(matches!(
            q.add_property("alerts/*", None),
            Err(QueryError::UnsupportedProperty(_))
        ));
    }

    #[test]
    fn test_time_range_needs_temporal_property() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[("Host", Some("h1"))]);
        let range = TemporalInfo::new(100, Some(200), None);
        q.add_property("Hosts/state", Some(range)).unwrap();
        q.add_property("metrics/cpu/*", Some(range)).unwrap();

        let request = q.create_request();
        assert_eq!(request.temporal_info(&PropertyId::parse("Hosts/state")), None);
        assert_eq!(
            request.temporal_info(&PropertyId::parse("metrics/cpu/cpu_system")),
            Some(&range)
        );
    }

    #[test]
    fn test_unsupported_property() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[]);
        assert!(matches!(
            q.add_property("Hosts/rack", None),
            Err(QueryError::UnsupportedProperty(_))
        ));
    }

    #[test]
    fn test_sub_resource_routing() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Cluster", &[("Cluster", Some("c1"))]);
        q.add_property("hosts/Hosts/state", None).unwrap();
        q.add_property("services", None).unwrap();

        let hosts = &q.sub_resources()["hosts"];
        assert_eq!(paths(hosts.properties()), vec!["Hosts/host_name", "Hosts/state"]);
        let services = &q.sub_resources()["services"];
        assert_eq!(paths(services.properties()), vec!["ServiceInfo/service_name"]);
        assert_eq!(paths(q.properties()), vec!["Clusters/cluster_name"]);
    }

    #[test]
    fn test_sub_resource_fields_request_only_parent_keys() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Cluster", &[("Cluster", Some("c1"))]);
        q.add_property("hosts", None).unwrap();
        assert_eq!(paths(q.create_request().property_ids()), vec!["Clusters/cluster_name"]);

        let bound = [("Cluster", Some("c1")), ("Service", Some("HDFS"))];
        let mut q = new_query(&registry, "Service", &bound);
        q.add_property("components/ServiceComponentInfo/state", None).unwrap();
        assert_eq!(
            paths(q.create_request().property_ids()),
            vec!["ServiceInfo/cluster_name", "ServiceInfo/service_name"]
        );

        let mut minimal = new_query(&registry, "Service", &bound);
        minimal.set_minimal(true);
        minimal.add_property("components", None).unwrap();
        let request = minimal.create_request();
        assert_eq!(paths(request.property_ids()), vec!["ServiceInfo/service_name"]);
    }

    #[test]
    fn test_sub_resource_predicate_is_split() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Cluster", &[]);
        let version = Predicate::equals(PropertyId::parse("Clusters/version"), "2.1");
        let host_state = Predicate::equals(PropertyId::parse("hosts/Hosts/state"), "UNHEALTHY");
        q.set_user_predicate(Some(Predicate::and(version.clone(), host_state))).unwrap();

        assert!(q.has_sub_resource_predicate());
        assert_eq!(q.sub_resources().keys().collect::<Vec<_>>(), vec!["hosts"]);
        assert_eq!(q.predicate(), Some(version));
        assert_eq!(
            q.sub_resource_predicate("hosts"),
            Some(Predicate::equals(PropertyId::parse("Hosts/state"), "UNHEALTHY"))
        );
        assert_eq!(q.sub_resource_predicate("services"), None);

        let hosts = &q.effective_sub_resources().unwrap()["hosts"];
        assert!(hosts.create_request().includes("Hosts/state"));
        assert_eq!(
            hosts.user_predicate().map(|p| p.to_string()).as_deref(),
            Some("Hosts/state=UNHEALTHY")
        );
    }

    #[test]
    fn test_supports_sub_resource_properties() {
        let registry = cluster_registry();
        let q = new_query(&registry, "Cluster", &[]);
        assert!(q.supports_property(&PropertyId::parse("Clusters/version")));
        assert!(q.supports_property(&PropertyId::parse("hosts/Hosts/state")));
        assert!(q.supports_property(&PropertyId::parse(
            "services/components/ServiceComponentInfo/state"
        )));
        assert!(!q.supports_property(&PropertyId::parse("hosts/Hosts/rack")));
        assert!(!q.supports_property(&PropertyId::parse("alerts/Alert/state")));
    }

    #[test]
    fn test_sub_resource_template_foreign_keys() {
        let registry = cluster_registry();
        let bound = [("Cluster", Some("c1")), ("Service", Some("HDFS"))];
        let mut q = new_query(&registry, "Service", &bound);
        let components = q.include_sub_resource("components").unwrap();
        assert_eq!(
            paths(components.properties()),
            vec!["ServiceComponentInfo/component_name", "ServiceComponentInfo/service_name"]
        );

        q.set_minimal(true);
        let minimal = q.available_sub_resources().unwrap();
        assert_eq!(
            paths(minimal["components"].properties()),
            vec!["ServiceComponentInfo/component_name"]
        );
    }

    #[test]
    fn test_wildcard_includes_all_sub_resources() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Cluster", &[("Cluster", Some("c1"))]);
        q.add_property("*", None).unwrap();

        assert_eq!(q.sub_resources().keys().collect::<Vec<_>>(), vec!["hosts", "services"]);
        assert!(q.create_request().is_all());
    }

    #[test]
    fn test_default_sub_resources() {
        let registry = cluster_registry();
        let instance = new_query(&registry, "Cluster", &[("Cluster", Some("c1"))]);
        assert_eq!(instance.effective_sub_resources().unwrap().len(), 2);

        // collections always request their keys, so they stay shallow by default
        let collection = new_query(&registry, "Cluster", &[]);
        assert!(collection.effective_sub_resources().unwrap().is_empty());

        let mut explicit = instance.clone();
        explicit.add_property("Clusters/version", None).unwrap();
        assert!(explicit.effective_sub_resources().unwrap().is_empty());
    }

    #[test]
    fn test_temporal_propagation() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[("Host", Some("h1"))]);
        let default = TemporalInfo::new(100, Some(200), Some(15));
        let explicit = TemporalInfo::new(300, None, None);
        q.add_property("*", Some(default)).unwrap();
        q.add_property("metrics/cpu/cpu_user", Some(explicit)).unwrap();

        let request = q.create_request();
        assert!(request.is_all());
        assert_eq!(
            request.temporal_info(&PropertyId::parse("metrics/cpu/cpu_system")),
            Some(&default)
        );
        assert_eq!(
            request.temporal_info(&PropertyId::parse("metrics/cpu/cpu_user")),
            Some(&explicit)
        );

        let mut q = new_query(&registry, "Host", &[("Host", Some("h1"))]);
        q.add_property("metrics/cpu", Some(explicit)).unwrap();
        q.add_property("Hosts/state", None).unwrap();
        let request = q.create_request();
        assert_eq!(
            request.temporal_info(&PropertyId::parse("metrics/cpu/cpu_user")),
            Some(&explicit)
        );
        assert_eq!(request.temporal_info(&PropertyId::parse("Hosts/state")), None);
    }

    #[test]
    fn test_predicate_combines_keys_and_user_predicate() {
        let registry = cluster_registry();
        let mut q = new_query(&registry, "Host", &[("Cluster", Some("c1")), ("Host", None)]);
        assert_eq!(
            q.predicate(),
            Some(Predicate::equals(PropertyId::parse("Hosts/cluster_name"), "c1"))
        );

        let user = Predicate::equals(PropertyId::parse("Hosts/state"), "HEALTHY");
        q.set_user_predicate(Some(user.clone())).unwrap();
        assert_eq!(
            q.predicate(),
            Some(Predicate::And(vec![
                Predicate::equals(PropertyId::parse("Hosts/cluster_name"), "c1"),
                user.clone(),
            ]))
        );

        let mut unbound = new_query(&registry, "Host", &[]);
        assert_eq!(unbound.predicate(), None);
        unbound.set_user_predicate(Some(user.clone())).unwrap();
        assert_eq!(unbound.predicate(), Some(user));
    }

    #[test]
    fn test_resolve_resource_path() {
        let registry = cluster_registry();

        let (kind, bound) = resolve_resource_path(&registry, "Cluster/c1/hosts").unwrap();
        assert_eq!(kind.as_str(), "Host");
        assert_eq!(bound, keys(&[("Cluster", Some("c1")), ("Host", None)]));

        let (kind, bound) = resolve_resource_path(&registry, "/Cluster/c1/services/HDFS/").unwrap();
        assert_eq!(kind.as_str(), "Service");
        assert_eq!(bound, keys(&[("Cluster", Some("c1")), ("Service", Some("HDFS"))]));

        let (kind, bound) = resolve_resource_path(&registry, "Cluster").unwrap();
        assert_eq!(kind.as_str(), "Cluster");
        assert_eq!(bound, keys(&[("Cluster", None)]));

        assert!(resolve_resource_path(&registry, "Cluster/c1/alerts").is_err());
        assert!(resolve_resource_path(&registry, "Alert").is_err());
        assert!(resolve_resource_path(&registry, "").is_err());
    }
}
