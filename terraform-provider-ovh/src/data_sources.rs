//! Terraform Data Sources for OVH

use crate::client::{kube_path, Kube, KubeApi};
use crate::resources::{ResourceResult, ResourceState};
use crate::schema::{Diagnostic, ResourceSchema, SchemaAttribute, SchemaBlock};
use async_trait::async_trait;
use serde_json::json;

/// Data source trait
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Data source type name
    fn type_name(&self) -> &str;

    /// Get the schema for this data source
    fn schema(&self) -> ResourceSchema;

    /// Resolve the configuration into a full state
    async fn read(&self, client: &dyn KubeApi, config: &ResourceState)
        -> ResourceResult<ResourceState>;
}

// ============================================================================
// Kubernetes Cluster Data Source
// ============================================================================

/// Allowed values of a cluster's `status`
pub const CLUSTER_STATUSES: &[&str] = &[
    "INSTALLING",
    "UPDATING",
    "RESETTING",
    "SUSPENDING",
    "REOPENING",
    "DELETING",
    "SUSPENDED",
    "ERROR",
    "USER_ERROR",
    "USER_QUOTA_ERROR",
    "READY",
];

const STRING_FILTERS: &[&str] = &[
    "url",
    "status",
    "name",
    "nodes_url",
    "created_at",
    "update_policy",
    "version",
    "updated_at",
    "id",
];

pub struct KubeDataSource;

impl KubeDataSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KubeDataSource {
    fn default() -> Self {
        Self::new()
    }
}

fn kube_field<'a>(kube: &'a Kube, attribute: &str) -> Option<&'a str> {
    let value = match attribute {
        "url" => &kube.url,
        "status" => &kube.status,
        "name" => &kube.name,
        "nodes_url" => &kube.nodes_url,
        "created_at" => &kube.created_at,
        "update_policy" => &kube.update_policy,
        "version" => &kube.version,
        "updated_at" => &kube.updated_at,
        "id" => &kube.id,
        _ => return None,
    };
    Some(value.as_str())
}

/// Whether `kube` satisfies every filter set in `config`.
///
/// Null and empty-string attributes are not filters.
fn matches_filters(kube: &Kube, config: &ResourceState) -> bool {
    let strings_match = STRING_FILTERS.iter().all(|attribute| {
        match config.get_string(attribute).filter(|v| !v.is_empty()) {
            Some(wanted) => kube_field(kube, attribute) == Some(wanted.as_str()),
            None => true,
        }
    });

    let up_to_date_matches = config
        .get_bool("is_up_to_date")
        .map_or(true, |wanted| wanted == kube.is_up_to_date);

    strings_match && up_to_date_matches
}

fn kube_to_state(kube: &Kube) -> ResourceState {
    let mut state = ResourceState::new();
    state.set("id", json!(kube.id));
    state.set("url", json!(kube.url));
    state.set("status", json!(kube.status));
    state.set("name", json!(kube.name));
    state.set("nodes_url", json!(kube.nodes_url));
    state.set("created_at", json!(kube.created_at));
    state.set("update_policy", json!(kube.update_policy));
    state.set("version", json!(kube.version));
    state.set("updated_at", json!(kube.updated_at));
    state.set("is_up_to_date", json!(kube.is_up_to_date));
    state.set(
        "control_plane_is_up_to_date",
        json!(kube.control_plane_is_up_to_date),
    );
    state
}

fn call_failed(path: &str, err: impl std::fmt::Display) -> Vec<Diagnostic> {
    vec![Diagnostic::error(&format!("Error calling {}", path)).with_detail(&err.to_string())]
}

#[async_trait]
impl DataSource for KubeDataSource {
    fn type_name(&self) -> &str {
        "ovh_kube"
    }

    fn schema(&self) -> ResourceSchema {
        let filter = |desc: &str| {
            SchemaAttribute::string()
                .with_description(desc)
                .optional()
                .computed()
        };

        let block = SchemaBlock::new()
            .with_attribute("id", filter("Cluster ID"))
            .with_attribute("name", filter("Cluster name"))
            .with_attribute(
                "status",
                filter("Cluster status").one_of(CLUSTER_STATUSES),
            )
            .with_attribute("url", filter("Kubernetes API server URL"))
            .with_attribute("nodes_url", filter("URL the nodes use to reach the control plane"))
            .with_attribute("version", filter("Kubernetes version"))
            .with_attribute("update_policy", filter("Cluster update policy"))
            .with_attribute("created_at", filter("Creation date"))
            .with_attribute("updated_at", filter("Last update date"))
            .with_attribute(
                "is_up_to_date",
                SchemaAttribute::bool()
                    .with_description("Whether the cluster runs the latest patch version")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "control_plane_is_up_to_date",
                SchemaAttribute::bool()
                    .with_description("Whether the control plane runs the latest patch version")
                    .computed(),
            )
            .with_description("Looks up an OVH managed Kubernetes cluster");

        ResourceSchema::new(0, block)
    }

    async fn read(
        &self,
        client: &dyn KubeApi,
        config: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        tracing::debug!("Will list available Kubernetes clusters");

        let services = client
            .list_kube()
            .await
            .map_err(|e| call_failed("/kube", e))?;

        let mut found: Option<Kube> = None;
        let mut matched = 0usize;

        for service_name in &services {
            let kube = client
                .get_kube(service_name)
                .await
                .map_err(|e| call_failed(&kube_path(service_name), e))?;

            if matches_filters(&kube, config) {
                matched += 1;
                found = Some(kube);
            }
        }

        let kube = found.ok_or_else(|| {
            vec![Diagnostic::error("No Kubernetes cluster matches the given filters")
                .with_detail(&format!(
                    "Searched {} cluster(s). Please change your search criteria and try again.",
                    services.len()
                ))]
        })?;

        if matched > 1 {
            tracing::warn!(
                matched,
                selected = %kube.id,
                "Several Kubernetes clusters match, using the last one"
            );
        }

        Ok(kube_to_state(&kube))
    }
}

/// Get all available data sources
pub fn get_all_data_sources() -> Vec<Box<dyn DataSource>> {
    vec![Box::new(KubeDataSource::new())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::FakeApi;
    use serde_json::Value;

    fn cluster(id: &str, name: &str, status: &str, up_to_date: bool) -> Kube {
        Kube {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            url: format!("https://{}.c1.gra.k8s.ovh.net", id),
            nodes_url: format!("{}.nodes.c1.gra.k8s.ovh.net", id),
            version: "1.29".to_string(),
            update_policy: "ALWAYS_UPDATE".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-02-01T00:00:00Z".to_string(),
            is_up_to_date: up_to_date,
            control_plane_is_up_to_date: true,
        }
    }

    fn fleet() -> FakeApi {
        FakeApi::default()
            .with_cluster("a", cluster("a", "prod", "READY", true))
            .with_cluster("b", cluster("b", "staging", "INSTALLING", false))
            .with_cluster("c", cluster("c", "prod", "READY", false))
    }

    fn config(pairs: &[(&str, Value)]) -> ResourceState {
        let mut state = ResourceState::new();
        for (k, v) in pairs {
            state.set(k, v.clone());
        }
        state
    }

    #[test]
    fn test_kube_data_source_schema() {
        let schema = KubeDataSource::new().schema();

        assert!(schema.block.attributes["nodes_url"].optional);
        assert!(schema.block.attributes["nodes_url"].computed);
        assert!(!schema.block.attributes["control_plane_is_up_to_date"].optional);
        assert_eq!(
            schema.block.attributes["status"].allowed_values.len(),
            CLUSTER_STATUSES.len()
        );
    }

    #[tokio::test]
    async fn test_read_maps_every_field() {
        let api = FakeApi::default().with_cluster("a", cluster("a", "prod", "READY", true));
        let state = KubeDataSource::new()
            .read(&api, &ResourceState::new())
            .await
            .unwrap();

        assert_eq!(state, kube_to_state(&cluster("a", "prod", "READY", true)));
        assert_eq!(state.get_string("update_policy").as_deref(), Some("ALWAYS_UPDATE"));
        assert_eq!(state.get_bool("control_plane_is_up_to_date"), Some(true));
    }

    #[tokio::test]
    async fn test_last_match_wins() {
        let state = KubeDataSource::new()
            .read(&fleet(), &config(&[("name", json!("prod"))]))
            .await
            .unwrap();

        assert_eq!(state.get_string("id").as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_non_matching_clusters_are_skipped() {
        let state = KubeDataSource::new()
            .read(
                &fleet(),
                &config(&[
                    ("name", json!("prod")),
                    ("is_up_to_date", json!(true)),
                    ("url", Value::Null),
                    ("version", json!("")),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(state.get_string("id").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_no_match_is_an_error() {
        let diags = KubeDataSource::new()
            .read(&fleet(), &config(&[("status", json!("SUSPENDED"))]))
            .await
            .unwrap_err();

        assert_eq!(diags[0].summary, "No Kubernetes cluster matches the given filters");
    }

    #[tokio::test]
    async fn test_list_failure_names_endpoint() {
        let api = FakeApi {
            fail_list: true,
            ..Default::default()
        };
        let diags = KubeDataSource::new()
            .read(&api, &ResourceState::new())
            .await
            .unwrap_err();

        assert_eq!(diags[0].summary, "Error calling /kube");
        assert!(diags[0].detail.as_deref().unwrap_or("").contains("maintenance"));
    }

    #[tokio::test]
    async fn test_detail_failure_names_service() {
        let mut api = fleet();
        api.services.push("ghost".to_string());

        let diags = KubeDataSource::new()
            .read(&api, &ResourceState::new())
            .await
            .unwrap_err();

        assert_eq!(diags[0].summary, "Error calling /kube/ghost");
    }
}
