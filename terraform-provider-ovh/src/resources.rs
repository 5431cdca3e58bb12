//! Terraform Resources for OVH
//!
//! Defines the resources that can be managed via Terraform.

use crate::client::{kube_node_path, kube_nodes_path, KubeApi, KubeNode, NewKubeNode};
use crate::schema::{Diagnostic, ResourceSchema, SchemaAttribute, SchemaBlock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Result type for resource operations
pub type ResourceResult<T> = Result<T, Vec<Diagnostic>>;

/// Resource state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub values: HashMap<String, Value>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Build a state from a JSON object; anything else is treated as absent.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_object).map(|obj: &Map<String, Value>| Self {
            values: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resource trait
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource type name
    fn type_name(&self) -> &str;

    /// Get the schema for this resource
    fn schema(&self) -> ResourceSchema;

    /// Create a new resource
    async fn create(
        &self,
        client: &dyn KubeApi,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Read an existing resource; an empty state means it is gone
    async fn read(
        &self,
        client: &dyn KubeApi,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Update an existing resource
    async fn update(
        &self,
        client: &dyn KubeApi,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Delete a resource
    async fn delete(&self, client: &dyn KubeApi, current: &ResourceState) -> ResourceResult<()>;

    /// Plan changes
    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let _ = current;
        Ok(proposed.clone())
    }

    /// Attributes whose planned change forces the resource to be replaced
    fn requires_replace(&self, current: &ResourceState, proposed: &ResourceState) -> Vec<String> {
        let schema = self.schema();
        let mut changed: Vec<String> = schema
            .block
            .force_new_attributes()
            .filter(|name| current.get(name) != proposed.get(name))
            .map(String::from)
            .collect();
        changed.sort();
        changed
    }

    /// Seed state for `terraform import`
    fn import_state(&self, id: &str) -> ResourceResult<ResourceState> {
        let mut state = ResourceState::new();
        state.set("id", json!(id));
        Ok(state)
    }
}

// ============================================================================
// Kubernetes Node Resource
// ============================================================================

/// Allowed values of a worker node's `status`
pub const NODE_STATUSES: &[&str] = &[
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
    "USER_NODE_NOT_FOUND_ERROR",
    "USER_NODE_SUSPENDED_SERVICE",
    "READY",
];

const COMPUTED_NODE_ATTRIBUTES: &[&str] = &[
    "id",
    "instance_id",
    "status",
    "version",
    "is_up_to_date",
    "created_at",
    "updated_at",
];

pub struct KubeNodeResource;

impl KubeNodeResource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KubeNodeResource {
    fn default() -> Self {
        Self::new()
    }
}

fn node_to_state(node: &KubeNode) -> ResourceState {
    let mut state = ResourceState::new();
    state.set("id", json!(node.id));
    state.set("project_id", json!(node.project_id));
    state.set("instance_id", json!(node.instance_id));
    state.set("name", json!(node.name));
    state.set("flavor", json!(node.flavor));
    state.set("status", json!(node.status));
    state.set("version", json!(node.version));
    state.set("is_up_to_date", json!(node.is_up_to_date));
    state.set("created_at", json!(node.created_at));
    state.set("updated_at", json!(node.updated_at));
    state
}

fn required_string(state: &ResourceState, key: &str, what: &str) -> ResourceResult<String> {
    state
        .get_string(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            vec![Diagnostic::error(&format!("Kubernetes node {} is required", what))
                .with_attribute(vec![key.to_string()])]
        })
}

#[async_trait]
impl Resource for KubeNodeResource {
    fn type_name(&self) -> &str {
        "ovh_kube_node"
    }

    fn schema(&self) -> ResourceSchema {
        let block = SchemaBlock::new()
            .with_attribute(
                "project_id",
                SchemaAttribute::string()
                    .with_description("Managed Kubernetes service the node belongs to")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Name of the node")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "flavor",
                SchemaAttribute::string()
                    .with_description("Public cloud flavor of the node (e.g., b2-7)")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("Node ID")
                    .computed(),
            )
            .with_attribute(
                "instance_id",
                SchemaAttribute::string()
                    .with_description("Public cloud instance backing the node")
                    .computed(),
            )
            .with_attribute(
                "status",
                SchemaAttribute::string()
                    .with_description("Current node status")
                    .optional()
                    .computed()
                    .one_of(NODE_STATUSES),
            )
            .with_attribute(
                "version",
                SchemaAttribute::string()
                    .with_description("Kubernetes version of the node")
                    .computed(),
            )
            .with_attribute(
                "is_up_to_date",
                SchemaAttribute::bool()
                    .with_description("Whether the node runs the latest patch version")
                    .computed(),
            )
            .with_attribute("created_at", SchemaAttribute::string().computed())
            .with_attribute("updated_at", SchemaAttribute::string().computed())
            .with_description("Manages a worker node of an OVH managed Kubernetes cluster");

        ResourceSchema::new(0, block)
    }

    async fn create(
        &self,
        client: &dyn KubeApi,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let project_id = required_string(planned, "project_id", "project_id")?;
        let request = NewKubeNode {
            project_id: project_id.clone(),
            flavor: planned.get_string("flavor").unwrap_or_default(),
            name: planned.get_string("name").unwrap_or_default(),
        };

        tracing::debug!("OVH Kubernetes node create configuration: {:?}", request);

        let created = client
            .create_kube_node(&project_id, &request)
            .await
            .map_err(|e| {
                vec![Diagnostic::error("Failed to create OVH Kubernetes Node")
                    .with_detail(&format!("POST {}: {}", kube_nodes_path(&project_id), e))]
            })?;

        tracing::info!("OVH Kubernetes Node ID: {}", created.id);

        let mut current = ResourceState::new();
        current.set("project_id", json!(project_id));
        current.set("id", json!(created.id));

        let state = self.read(client, &current).await?;
        if state.is_empty() {
            tracing::warn!(
                node_id = %created.id,
                "Created Kubernetes node could not be read back, using creation response"
            );
            let mut fallback = node_to_state(&created);
            fallback.set("project_id", json!(project_id));
            return Ok(fallback);
        }
        Ok(state)
    }

    async fn read(
        &self,
        client: &dyn KubeApi,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let id = required_string(current, "id", "ID")?;
        let project_id = required_string(current, "project_id", "project_id")?;

        match client.get_kube_node(&project_id, &id).await {
            Ok(node) => {
                let mut state = node_to_state(&node);
                if node.project_id.is_empty() {
                    state.set("project_id", json!(project_id));
                }
                Ok(state)
            }
            Err(e) => {
                tracing::warn!(
                    "Kubernetes node {} vanished upstream, removing from state: {}",
                    kube_node_path(&project_id, &id),
                    e
                );
                Ok(ResourceState::new())
            }
        }
    }

    async fn update(
        &self,
        _client: &dyn KubeApi,
        _current: &ResourceState,
        _planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        Err(vec![Diagnostic::error(
            "Kubernetes nodes cannot be updated in place. Recreate the resource.",
        )])
    }

    async fn delete(&self, client: &dyn KubeApi, current: &ResourceState) -> ResourceResult<()> {
        let id = required_string(current, "id", "ID")?;
        let project_id = required_string(current, "project_id", "project_id")?;

        tracing::info!("Deleting OVH Kubernetes node in: {}, id: {}", project_id, id);

        client
            .delete_kube_node(&project_id, &id)
            .await
            .map_err(|e| {
                vec![Diagnostic::error("Error deleting OVH Kubernetes node")
                    .with_detail(&format!("DELETE {}: {}", kube_node_path(&project_id, &id), e))]
            })
    }

    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let mut planned = proposed.clone();

        // The API owns `status`; a configured value never drives a change.
        let kept = current.filter(|current| self.requires_replace(current, proposed).is_empty());
        match kept {
            Some(current) => {
                planned.set("status", current.get("status").cloned().unwrap_or(Value::Null));
                for key in COMPUTED_NODE_ATTRIBUTES {
                    let unset = planned.get(key).map_or(true, Value::is_null);
                    if let (true, Some(value)) = (unset, current.get(key)) {
                        planned.set(key, value.clone());
                    }
                }
            }
            None => planned.set("status", Value::Null),
        }

        Ok(planned)
    }

    fn import_state(&self, id: &str) -> ResourceResult<ResourceState> {
        match id.split_once('/') {
            Some((project_id, node_id)) if !project_id.is_empty() && !node_id.is_empty() => {
                let mut state = ResourceState::new();
                state.set("project_id", json!(project_id));
                state.set("id", json!(node_id));
                Ok(state)
            }
            _ => Err(vec![Diagnostic::error(&format!(
                "Invalid import ID \"{}\"",
                id
            ))
            .with_detail("Expected the form {project_id}/{node_id}")]),
        }
    }
}

/// Get all available resources
pub fn get_all_resources() -> Vec<Box<dyn Resource>> {
    vec![Box::new(KubeNodeResource::new())]
}
