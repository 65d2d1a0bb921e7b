//! Query execution: fetch, recurse into sub-resources, assemble the result tree.

use crate::error::{QueryError, Result};
use crate::predicate::Predicate;
use crate::property::{compare_values, value_to_string, PropertyId, Resource, ResourceType};
use crate::query::{KeyValueMap, Query, Request, SortOrder, SortRequest};
use crate::schema::SchemaRegistry;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The collaborator that supplies resource data.
///
/// Implementations filter by `predicate` (or return a superset; results are not
/// re-filtered) and return at least the properties named by `request`.
pub trait ResourceFetch: Send + Sync {
    fn get_resources(
        &self,
        kind: &ResourceType,
        request: &Request,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Resource>>;
}

/// A node of the result tree.
///
/// The root carries no resource; resource nodes are named `Type:n`, and
/// sub-resource nodes are named after the sub-resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TreeNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    pub is_collection: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.name.as_deref() == Some(name))
    }

    /// Resources held directly by this node's children.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.children.iter().filter_map(|c| c.resource.as_ref())
    }
}

pub struct QueryExecutor<'a, F: ?Sized> {
    registry: &'a SchemaRegistry,
    fetch: &'a F,
}

impl<'a, F: ResourceFetch + ?Sized> QueryExecutor<'a, F> {
    pub fn new(registry: &'a SchemaRegistry, fetch: &'a F) -> Self {
        Self { registry, fetch }
    }

    pub fn execute(&self, query: &Query) -> Result<TreeNode> {
        self.verify_parents(query)?;
        self.execute_query(query, true)
    }

    fn execute_query(&self, query: &Query, top_level: bool) -> Result<TreeNode> {
        let kind = query.kind();
        if let Some(user) = query.user_predicate() {
            self.validate_predicate(query, user)?;
        }

        let request = query.create_request();
        let predicate = query.predicate();
        debug!(
            resource_type = %kind,
            request = %request,
            predicate = predicate.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            "fetching resources"
        );

        let mut resources = match self.fetch.get_resources(kind, &request, predicate.as_ref()) {
            Ok(resources) => resources,
            Err(QueryError::NoSuchResource(_)) if !top_level => Vec::new(),
            Err(e) => return Err(e),
        };

        if resources.is_empty() && !query.is_collection() && top_level {
            return Err(QueryError::NoSuchResource(describe_instance(query)));
        }

        // a predicate on sub-resource properties is decided per joined row
        let joined = query.user_predicate().filter(|_| query.has_sub_resource_predicate());
        let joined_ids = joined.map(Predicate::property_ids).unwrap_or_default();

        let page = if top_level { query.page_request() } else { None };
        if top_level {
            if let Some(sort) = query.sort_request() {
                sort_resources(&mut resources, sort);
            }
            if let (Some(page), None) = (page, joined) {
                resources = resources.into_iter().skip(page.offset).take(page.page_size).collect();
            }
        }

        let sub_queries = query.effective_sub_resources()?;
        let mut matched = Vec::with_capacity(resources.len());

        for resource in resources {
            let mut children = Vec::with_capacity(sub_queries.len());
            if !sub_queries.is_empty() {
                let key_values = self.sub_resource_key_values(query, &resource)?;
                for (name, sub) in &sub_queries {
                    let mut child = self.execute_query(&sub.bind(key_values.clone()), false)?;
                    child.name = Some(name.clone());
                    child.is_collection = false;
                    children.push(child);
                }
            }

            if let Some(predicate) = joined {
                let rows = joined_rows(&resource, &children, "", &joined_ids);
                if !rows.iter().any(|row| predicate.evaluate(row)) {
                    continue;
                }
            }
            matched.push((resource, children));
        }

        if let (Some(page), Some(_)) = (page, joined) {
            matched = matched.into_iter().skip(page.offset).take(page.page_size).collect();
        }

        let mut root = TreeNode { is_collection: query.is_collection(), ..Default::default() };
        for (index, (resource, children)) in matched.into_iter().enumerate() {
            let resource = if query.is_minimal() && !request.is_all() {
                resource.project(request.property_ids().iter())
            } else {
                resource
            };
            root.children.push(TreeNode {
                name: Some(format!("{}:{}", kind, index + 1)),
                resource: Some(resource),
                is_collection: false,
                children,
            });
        }

        Ok(root)
    }

    fn validate_predicate(&self, query: &Query, predicate: &Predicate) -> Result<()> {
        let unsupported: Vec<String> = predicate
            .property_ids()
            .into_iter()
            .filter(|id| !query.supports_property(id))
            .map(|id| id.to_string())
            .collect();
        if unsupported.is_empty() {
            Ok(())
        } else {
            Err(QueryError::UnsupportedProperty(format!(
                "{} not supported by resource type {}",
                unsupported.join(", "),
                query.kind()
            )))
        }
    }

    /// Every bound ancestor id must name an existing resource.
    fn verify_parents(&self, query: &Query) -> Result<()> {
        for (kind, id) in query.key_values() {
            let Some(id) = id else { continue };
            if kind == query.kind() {
                continue;
            }
            let Ok(parent) = self.registry.schema(kind) else {
                continue;
            };
            let Some(pk) = parent.key_property_id(kind) else {
                continue;
            };

            let predicate = Predicate::all(query.key_values().iter().filter_map(|(k, v)| {
                let v = v.as_ref()?;
                let key = parent.key_property_id(k)?;
                Some(Predicate::equals(key.clone(), v.as_str()))
            }));
            let request = Request::of([pk.clone()]);
            let found = match self.fetch.get_resources(kind, &request, predicate.as_ref()) {
                Ok(resources) => !resources.is_empty(),
                Err(QueryError::NoSuchResource(_)) => false,
                Err(e) => return Err(e),
            };
            if !found {
                return Err(QueryError::NoSuchParentResource {
                    kind: kind.to_string(),
                    id: id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parent bindings for the sub-resources of `resource`: the query's bindings with
    /// unbound ids filled from the resource's key properties.
    fn sub_resource_key_values(&self, query: &Query, resource: &Resource) -> Result<KeyValueMap> {
        let kind = query.kind();
        let mut key_values = KeyValueMap::new();

        for (key_kind, value) in query.key_values() {
            let value = value.clone().or_else(|| {
                self.registry
                    .key_property_id(kind, key_kind)
                    .and_then(|id| resource.property_string(id))
            });
            if value.is_some() {
                key_values.insert(key_kind.clone(), value);
            }
        }

        if !key_values.contains_key(kind) {
            let own_key = self.registry.key_property_id(kind, kind).ok_or_else(|| {
                QueryError::system(format!("resource type {} has no primary key", kind))
            })?;
            let own_id = resource.property_string(own_key).ok_or_else(|| {
                QueryError::system(format!("{} resource is missing key property {}", kind, own_key))
            })?;
            key_values.insert(kind.clone(), Some(own_id));
        }
        Ok(key_values)
    }
}

/// The resource joined with every combination of its sub-resource rows, as
/// resources whose sub-resource properties carry the sub-resource path as prefix.
///
/// Only sub-resource properties covered by `ids` are joined; rows that end up
/// identical are merged.
fn joined_rows(
    resource: &Resource,
    children: &[TreeNode],
    prefix: &str,
    ids: &BTreeSet<PropertyId>,
) -> Vec<Resource> {
    let own: BTreeMap<String, Value> = resource
        .properties
        .iter()
        .map(|(path, value)| (format!("{}{}", prefix, path), value.clone()))
        .filter(|(path, _)| prefix.is_empty() || ids.iter().any(|id| id.covers(path)))
        .collect();
    let mut rows = vec![own];

    for child in children {
        let Some(name) = child.name.as_deref() else { continue };
        let child_prefix = format!("{}{}/", prefix, name);
        if !ids.iter().any(|id| id.path().starts_with(child_prefix.as_str())) {
            continue;
        }

        let mut sub_rows: Vec<BTreeMap<String, Value>> = Vec::new();
        for node in &child.children {
            let Some(sub) = node.resource.as_ref() else { continue };
            for row in joined_rows(sub, &node.children, &child_prefix, ids) {
                if !sub_rows.contains(&row.properties) {
                    sub_rows.push(row.properties);
                }
            }
        }
        if sub_rows.is_empty() {
            continue;
        }

        rows = rows
            .iter()
            .flat_map(|row| {
                sub_rows.iter().map(move |sub| {
                    let mut joined = row.clone();
                    joined.extend(sub.iter().map(|(k, v)| (k.clone(), v.clone())));
                    joined
                })
            })
            .collect();
    }

    rows.into_iter()
        .map(|properties| Resource { kind: resource.kind.clone(), properties })
        .collect()
}

fn describe_instance(query: &Query) -> String {
    let bound: Vec<String> = query
        .key_values()
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| format!("{}={}", k, v)))
        .collect();
    format!("{} ({})", query.kind(), bound.join(", "))
}

/// Stable sort; resources missing the property go last.
fn sort_resources(resources: &mut [Resource], sort: &SortRequest) {
    resources.sort_by(|a, b| {
        let ordering = compare_property(a, b, &sort.property);
        match sort.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn compare_property(a: &Resource, b: &Resource, id: &PropertyId) -> Ordering {
    match (a.property(id), b.property(id)) {
        (Some(x), Some(y)) => compare_values(x, &value_to_string(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::{parse_expression, Parser};
    use crate::query::PageRequest;
    use crate::schema::fixtures::cluster_registry;
    use crate::store::InMemoryResourceStore;
    use std::sync::Mutex;

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

    fn store() -> InMemoryResourceStore {
        let mut store = InMemoryResourceStore::new();
        store.insert(
            Resource::new("Cluster")
                .with_property("Clusters/cluster_name", "c1")
                .with_property("Clusters/version", "2.1"),
        );
        let hosts = [("h1", 4, "HEALTHY"), ("h2", 16, "UNHEALTHY"), ("h3", 8, "HEALTHY")];
        for (name, cpus, state) in hosts {
            store.insert(
                Resource::new("Host")
                    .with_property("Hosts/cluster_name", "c1")
                    .with_property("Hosts/host_name", name)
                    .with_property("Hosts/cpu_count", cpus)
                    .with_property("Hosts/state", state),
            );
        }
        store.insert(
            Resource::new("Service")
                .with_property("ServiceInfo/cluster_name", "c1")
                .with_property("ServiceInfo/service_name", "HDFS")
                .with_property("ServiceInfo/state", "STARTED"),
        );
        store.insert(
            Resource::new("Component")
                .with_property("ServiceComponentInfo/cluster_name", "c1")
                .with_property("ServiceComponentInfo/service_name", "HDFS")
                .with_property("ServiceComponentInfo/component_name", "NAMENODE"),
        );
        store
    }

    /// A second cluster whose only host is healthy.
    fn two_cluster_store() -> InMemoryResourceStore {
        let mut store = store();
        store.insert(
            Resource::new("Cluster")
                .with_property("Clusters/cluster_name", "c2")
                .with_property("Clusters/version", "2.2"),
        );
        store.insert(
            Resource::new("Host")
                .with_property("Hosts/cluster_name", "c2")
                .with_property("Hosts/host_name", "h4")
                .with_property("Hosts/cpu_count", 2)
                .with_property("Hosts/state", "HEALTHY"),
        );
        store
    }

    fn cluster_query<'s>(registry: &'s SchemaRegistry, expression: &str) -> Query<'s> {
        let mut query = new_query(registry, "Cluster", &[]);
        query.set_user_predicate(parse_expression(expression).unwrap()).unwrap();
        query
    }

    fn cluster_names(node: &TreeNode) -> Vec<String> {
        node.resources()
            .filter_map(|r| r.property_string(&PropertyId::parse("Clusters/cluster_name")))
            .collect()
    }

    fn host_names(node: &TreeNode) -> Vec<String> {
        node.resources()
            .filter_map(|r| r.property_string(&PropertyId::parse("Hosts/host_name")))
            .collect()
    }

    /// Records every fetch so tests can inspect the requests and predicates.
    struct RecordingFetch {
        inner: InMemoryResourceStore,
        calls: Mutex<Vec<(String, Request, Option<String>)>>,
    }

    impl ResourceFetch for RecordingFetch {
        fn get_resources(
            &self,
            kind: &ResourceType,
            request: &Request,
            predicate: Option<&Predicate>,
        ) -> Result<Vec<Resource>> {
            self.calls.lock().unwrap().push((
                kind.to_string(),
                request.clone(),
                predicate.map(|p| p.to_string()),
            ));
            self.inner.get_resources(kind, request, predicate)
        }
    }

    struct FailingFetch;

    impl ResourceFetch for FailingFetch {
        fn get_resources(
            &self,
            _: &ResourceType,
            _: &Request,
            _: Option<&Predicate>,
        ) -> Result<Vec<Resource>> {
            Err(QueryError::system("backend unavailable"))
        }
    }

    #[test]
    fn test_collection_query_with_user_predicate() {
        let registry = cluster_registry();
        let store = store();
        let mut query = new_query(&registry, "Host", &[("Cluster", Some("c1"))]);
        let tokens = tokenize("Hosts/cpu_count>=8").unwrap();
        query.set_user_predicate(Parser::new(&tokens).parse().unwrap()).unwrap();

        let tree = query.execute(&store).unwrap();
        assert!(tree.is_collection);
        assert_eq!(host_names(&tree), vec!["h2", "h3"]);
        assert_eq!(tree.children[0].name.as_deref(), Some("Host:1"));
        assert_eq!(tree.children[1].name.as_deref(), Some("Host:2"));
    }

    #[test]
    fn test_empty_collection_is_empty_tree() {
        let registry = cluster_registry();
        let store = store();
        let mut query = new_query(&registry, "Host", &[("Cluster", Some("c1"))]);
        let unknown = Predicate::equals(PropertyId::parse("Hosts/state"), "UNKNOWN");
        query.set_user_predicate(Some(unknown)).unwrap();

        let tree = query.execute(&store).unwrap();
        assert!(tree.is_collection);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn test_missing_instance_is_no_such_resource() {
        let registry = cluster_registry();
        let store = store();
        let query = new_query(&registry, "Host", &[("Cluster", Some("c1")), ("Host", Some("h9"))]);

        let err = query.execute(&store).unwrap_err();
        assert!(matches!(err, QueryError::NoSuchResource(_)), "{:?}", err);
    }

    #[test]
    fn test_missing_parent_is_no_such_parent_resource() {
        let registry = cluster_registry();
        let store = store();
        let query = new_query(&registry, "Host", &[("Cluster", Some("c9")), ("Host", None)]);

        assert_eq!(
            query.execute(&store).unwrap_err(),
            QueryError::NoSuchParentResource { kind: "Cluster".into(), id: "c9".into() }
        );
    }

    #[test]
    fn test_unsupported_predicate_property() {
        let registry = cluster_registry();
        let store = store();
        let mut query = new_query(&registry, "Host", &[]);
        let rack = Predicate::equals(PropertyId::parse("Hosts/rack"), "r1");
        query.set_user_predicate(Some(rack)).unwrap();

        assert!(matches!(query.execute(&store), Err(QueryError::UnsupportedProperty(_))));

        let mut clusters = new_query(&registry, "Cluster", &[]);
        clusters.set_user_predicate(parse_expression("hosts/Hosts/rack=r1").unwrap()).unwrap();
        assert!(matches!(clusters.execute(&store), Err(QueryError::UnsupportedProperty(_))));
    }

    #[test]
    fn test_fetch_failure_is_system_error() {
        let registry = cluster_registry();
        let query = new_query(&registry, "Cluster", &[]);
        let err = query.execute(&FailingFetch).unwrap_err();
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_wildcard_populates_every_sub_resource() {
        let registry = cluster_registry();
        let store = store();
        let mut query = new_query(&registry, "Cluster", &[("Cluster", Some("c1"))]);
        query.add_property("*", None).unwrap();

        let tree = query.execute(&store).unwrap();
        assert!(!tree.is_collection);
        let cluster = &tree.children[0];
        assert_eq!(cluster.name.as_deref(), Some("Cluster:1"));

        let hosts = cluster.child("hosts").unwrap();
        assert!(!hosts.is_collection);
        assert_eq!(host_names(hosts), vec!["h1", "h2", "h3"]);

        let services = cluster.child("services").unwrap();
        assert_eq!(services.children.len(), 1);
    }

    #[test]
    fn test_nested_sub_resources_bind_parent_ids() {
        let registry = cluster_registry();
        let fetch = RecordingFetch { inner: store(), calls: Mutex::new(Vec::new()) };
        let mut query = new_query(&registry, "Service", &[("Cluster", Some("c1"))]);
        query.add_property("components", None).unwrap();

        let tree = query.execute(&fetch).unwrap();
        let components = tree.children[0].child("components").unwrap();
        assert_eq!(components.children.len(), 1);
        assert_eq!(components.children[0].name.as_deref(), Some("Component:1"));

        let calls = fetch.calls.lock().unwrap();
        let (kind, _, predicate) = calls.iter().find(|(k, _, _)| k == "Component").unwrap();
        assert_eq!(kind, "Component");
        assert_eq!(
            predicate.as_deref(),
            Some("ServiceComponentInfo/cluster_name=c1&ServiceComponentInfo/service_name=HDFS")
        );
    }

    #[test]
    fn test_sort_and_page_top_level() {
        let registry = cluster_registry();
        let store = store();
        let mut query = new_query(&registry, "Host", &[("Cluster", Some("c1"))]);
        query.set_sort_request(Some(SortRequest {
            property: PropertyId::parse("Hosts/cpu_count"),
            order: SortOrder::Desc,
        }));
        query.set_page_request(Some(PageRequest { offset: 1, page_size: 5 }));

        let tree = query.execute(&store).unwrap();
        assert_eq!(host_names(&tree), vec!["h3", "h1"]);
    }

    #[test]
    fn test_minimal_response_projects_requested_properties() {
        let registry = cluster_registry();
        let store = store();
        let mut query = new_query(&registry, "Host", &[("Cluster", Some("c1"))]);
        query.set_minimal(true);
        query.add_property("Hosts/state", None).unwrap();

        let tree = query.execute(&store).unwrap();
        let first = tree.children[0].resource.as_ref().unwrap();
        let paths: Vec<&str> = first.properties.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["Hosts/host_name", "Hosts/state"]);
    }

    #[test]
    fn test_collection_request_logs_key_properties() {
        let registry = cluster_registry();
        let fetch = RecordingFetch { inner: store(), calls: Mutex::new(Vec::new()) };
        let query = new_query(&registry, "Host", &[("Cluster", Some("c1"))]);
        query.execute(&fetch).unwrap();

        let calls = fetch.calls.lock().unwrap();
        // parent verification first, then the host fetch
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "Cluster");
        let (_, request, predicate) = &calls[1];
        assert!(request.includes("Hosts/host_name"));
        assert!(request.includes("Hosts/cluster_name"));
        assert_eq!(predicate.as_deref(), Some("Hosts/cluster_name=c1"));
    }

    #[test]
    fn test_sub_resource_predicate_selects_parents() {
        let registry = cluster_registry();
        let store = two_cluster_store();

        let tree = cluster_query(&registry, "hosts/Hosts/state=UNHEALTHY").execute(&store).unwrap();
        assert!(tree.is_collection);
        assert_eq!(cluster_names(&tree), vec!["c1"]);
        let cluster = &tree.children[0];
        assert_eq!(cluster.name.as_deref(), Some("Cluster:1"));
        assert_eq!(host_names(cluster.child("hosts").unwrap()), vec!["h2"]);

        let query = cluster_query(&registry, "hosts/Hosts/state=DECOMMISSIONED");
        let tree = query.execute(&store).unwrap();
        assert!(tree.is_collection);
        assert!(tree.children.is_empty());

        let tree = cluster_query(&registry, "hosts/Hosts/cpu_count<4").execute(&store).unwrap();
        assert_eq!(cluster_names(&tree), vec!["c2"]);
    }

    #[test]
    fn test_sub_resource_predicate_mixed_with_local_clause() {
        let registry = cluster_registry();
        let store = two_cluster_store();

        let query = cluster_query(&registry, "Clusters/version=2.2|hosts/Hosts/state=UNHEALTHY");
        let tree = query.execute(&store).unwrap();
        assert_eq!(cluster_names(&tree), vec!["c1", "c2"]);
        // the OR leaves nothing to push down, so every host of c1 is listed
        assert_eq!(host_names(tree.children[0].child("hosts").unwrap()), vec!["h1", "h2", "h3"]);

        // a cluster matches when any of its joined host rows does
        let query = cluster_query(&registry, "Clusters/version=2.1&!hosts/Hosts/state=UNHEALTHY");
        let tree = query.execute(&store).unwrap();
        assert_eq!(cluster_names(&tree), vec!["c1"]);
        assert_eq!(host_names(tree.children[0].child("hosts").unwrap()), vec!["h1", "h3"]);
    }

    #[test]
    fn test_page_applies_after_sub_resource_predicate() {
        let registry = cluster_registry();
        let store = two_cluster_store();
        let mut query = cluster_query(&registry, "hosts/Hosts/state=HEALTHY");
        query.set_page_request(Some(PageRequest { offset: 1, page_size: 1 }));

        let tree = query.execute(&store).unwrap();
        assert_eq!(cluster_names(&tree), vec!["c2"]);
        assert_eq!(tree.children[0].name.as_deref(), Some("Cluster:1"));
    }

    #[test]
    fn test_sub_resource_predicate_is_pushed_to_sub_fetch() {
        let registry = cluster_registry();
        let fetch = RecordingFetch { inner: two_cluster_store(), calls: Mutex::new(Vec::new()) };
        cluster_query(&registry, "Clusters/version=2.1&hosts/Hosts/state=UNHEALTHY")
            .execute(&fetch)
            .unwrap();

        let calls = fetch.calls.lock().unwrap();
        let (_, request, predicate) = &calls[0];
        assert_eq!(predicate.as_deref(), Some("Clusters/version=2.1"));
        assert!(request.includes("Clusters/version"));

        let (_, request, predicate) = calls.iter().find(|(k, _, _)| k == "Host").unwrap();
        assert_eq!(predicate.as_deref(), Some("Hosts/cluster_name=c1&Hosts/state=UNHEALTHY"));
        assert!(request.includes("Hosts/state"));
    }
}
