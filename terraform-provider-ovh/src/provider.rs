//! Terraform Provider Implementation
//!
//! Implements the Terraform Plugin Protocol for OVH managed Kubernetes.

use crate::client::{KubeApi, OvhClient};
use crate::config::ProviderConfig;
use crate::data_sources::{get_all_data_sources, DataSource};
use crate::resources::{get_all_resources, Resource, ResourceState};
use crate::schema::{Diagnostic, ProviderSchema, RpcRequest, RpcResponse, SchemaAttribute, SchemaBlock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::runtime::Runtime;

/// Config or state object from the request; null or missing becomes empty
fn config_state(value: Option<&Value>) -> ResourceState {
    ResourceState::from_value(value).unwrap_or_default()
}

/// OVH Terraform Provider
pub struct OvhProvider {
    client: RwLock<Option<Arc<dyn KubeApi>>>,
    resources: HashMap<String, Box<dyn Resource>>,
    data_sources: HashMap<String, Box<dyn DataSource>>,
    runtime: Runtime,
}

impl OvhProvider {
    /// Create a new provider
    pub fn new() -> std::io::Result<Self> {
        let resources = get_all_resources()
            .into_iter()
            .map(|r| (r.type_name().to_string(), r))
            .collect();

        let data_sources = get_all_data_sources()
            .into_iter()
            .map(|d| (d.type_name().to_string(), d))
            .collect();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client: RwLock::new(None),
            resources,
            data_sources,
            runtime,
        })
    }

    /// Get provider schema
    fn get_schema(&self) -> ProviderSchema {
        let provider_block = SchemaBlock::new()
            .with_attribute(
                "endpoint",
                SchemaAttribute::string()
                    .with_description("OVH API endpoint alias (e.g., ovh-eu) or base URL. Defaults to OVH_ENDPOINT")
                    .optional(),
            )
            .with_attribute(
                "application_key",
                SchemaAttribute::string()
                    .with_description("OVH API application key. Defaults to OVH_APPLICATION_KEY")
                    .optional(),
            )
            .with_attribute(
                "application_secret",
                SchemaAttribute::string()
                    .with_description("OVH API application secret. Defaults to OVH_APPLICATION_SECRET")
                    .optional()
                    .sensitive(),
            )
            .with_attribute(
                "consumer_key",
                SchemaAttribute::string()
                    .with_description("OVH API consumer key. Defaults to OVH_CONSUMER_KEY")
                    .optional()
                    .sensitive(),
            )
            .with_description("OVH managed Kubernetes provider");

        let mut schema = ProviderSchema::new(provider_block);

        for (name, resource) in &self.resources {
            schema = schema.with_resource(name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(name, data_source.schema());
        }

        schema
    }

    /// Configure the provider
    fn configure(&self, config: ProviderConfig) -> Vec<Diagnostic> {
        let credentials = match config.with_env_defaults().resolve() {
            Ok(c) => c,
            Err(diagnostics) => return diagnostics,
        };

        let client = match OvhClient::new(&credentials) {
            Ok(c) => c,
            Err(e) => {
                return vec![Diagnostic::error("Failed to create OVH API client")
                    .with_detail(&e.to_string())]
            }
        };

        tracing::info!(endpoint = %credentials.base_url, "Configured OVH provider");
        self.set_client(Arc::new(client));

        Vec::new()
    }

    fn set_client(&self, client: Arc<dyn KubeApi>) {
        match self.client.write() {
            Ok(mut guard) => *guard = Some(client),
            Err(poisoned) => *poisoned.into_inner() = Some(client),
        }
    }

    /// Get the configured client
    fn get_client(&self) -> Result<Arc<dyn KubeApi>, Diagnostic> {
        let guard = match self.client.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .clone()
            .ok_or_else(|| Diagnostic::error("Provider not configured"))
    }

    fn resource<'a>(
        &'a self,
        params: &'a Value,
    ) -> Result<(&'a str, &'a dyn Resource), Diagnostic> {
        let type_name = params
            .get("type_name")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        self.resources
            .get(type_name)
            .map(|r| (type_name, r.as_ref()))
            .ok_or_else(|| Diagnostic::error(&format!("Unknown resource type: {}", type_name)))
    }

    fn data_source(&self, params: &Value) -> Result<&dyn DataSource, Diagnostic> {
        let type_name = params
            .get("type_name")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| Diagnostic::error(&format!("Unknown data source type: {}", type_name)))
    }

    /// Handle an RPC request
    pub fn handle_request(&self, input: &str) -> String {
        let request: RpcRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => {
                return serde_json::to_string(&RpcResponse::error(
                    0,
                    -32700,
                    &format!("Parse error: {}", e),
                ))
                .unwrap_or_default();
            }
        };

        tracing::debug!(method = %request.method, id = request.id, "Handling request");

        let id = request.id;
        let params = &request.params;
        let response = match request.method.as_str() {
            "GetProviderSchema" => self.handle_get_schema(id),
            "ConfigureProvider" => self.handle_configure(id, params),
            "ValidateResourceConfig" => self.handle_validate_resource(id, params),
            "ValidateDataResourceConfig" => self.handle_validate_data_source(id, params),
            "PlanResourceChange" => self.handle_plan_resource(id, params),
            "ApplyResourceChange" => self.handle_apply_resource(id, params),
            "ReadResource" => self.handle_read_resource(id, params),
            "ImportResourceState" => self.handle_import_resource(id, params),
            "ReadDataSource" => self.handle_read_data_source(id, params),
            "StopProvider" => RpcResponse::success(id, json!({})),
            _ => RpcResponse::error(
                id,
                -32601,
                &format!("Method not found: {}", request.method),
            ),
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::to_string(&RpcResponse::error(
                id,
                -32603,
                &format!("Serialization error: {}", e),
            ))
            .unwrap_or_default()
        })
    }

    /// Handle GetProviderSchema
    fn handle_get_schema(&self, id: i64) -> RpcResponse {
        match serde_json::to_value(self.get_schema()) {
            Ok(schema) => RpcResponse::success(id, schema),
            Err(e) => RpcResponse::error(id, -32603, &format!("Serialization error: {}", e)),
        }
    }

    /// Handle ConfigureProvider
    fn handle_configure(&self, id: i64, params: &Value) -> RpcResponse {
        let config: ProviderConfig = match params.get("config").filter(|c| !c.is_null()) {
            None => ProviderConfig::default(),
            Some(c) => match serde_json::from_value(c.clone()) {
                Ok(config) => config,
                Err(e) => {
                    return RpcResponse::diagnostics(
                        id,
                        vec![Diagnostic::error("Invalid provider configuration")
                            .with_detail(&e.to_string())],
                    )
                }
            },
        };

        RpcResponse::diagnostics(id, self.configure(config))
    }

    /// Handle ValidateResourceConfig
    fn handle_validate_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let (_, resource) = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let config = config_state(params.get("config"));
        RpcResponse::diagnostics(id, resource.schema().block.validate(&config))
    }

    /// Handle ValidateDataResourceConfig
    fn handle_validate_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let data_source = match self.data_source(params) {
            Ok(d) => d,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let config = config_state(params.get("config"));
        RpcResponse::diagnostics(id, data_source.schema().block.validate(&config))
    }

    /// Handle PlanResourceChange
    fn handle_plan_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let (_, resource) = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let prior_state = ResourceState::from_value(params.get("prior_state"));
        let proposed_state = match ResourceState::from_value(params.get("proposed_new_state")) {
            Some(state) => state,
            // Destroy plan
            None => {
                return RpcResponse::success(
                    id,
                    json!({
                        "planned_state": null,
                        "requires_replace": [],
                        "diagnostics": []
                    }),
                )
            }
        };

        let requires_replace = prior_state
            .as_ref()
            .map(|prior| resource.requires_replace(prior, &proposed_state))
            .unwrap_or_default();

        match resource.plan_change(prior_state.as_ref(), &proposed_state) {
            Ok(planned) => RpcResponse::success(
                id,
                json!({
                    "planned_state": planned.values,
                    "requires_replace": requires_replace,
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, diagnostics),
        }
    }

    /// Handle ApplyResourceChange
    fn handle_apply_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let (type_name, resource) = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let planned_state = ResourceState::from_value(params.get("planned_state"));
        let prior_state = ResourceState::from_value(params.get("prior_state"));

        let result = self.runtime.block_on(async {
            match (prior_state, planned_state) {
                (Some(prior), None) => {
                    tracing::info!(resource = type_name, "Destroying resource");
                    resource.delete(client.as_ref(), &prior).await.map(|_| None)
                }
                (None, Some(planned)) => {
                    tracing::info!(resource = type_name, "Creating resource");
                    resource.create(client.as_ref(), &planned).await.map(Some)
                }
                (Some(prior), Some(planned)) => resource
                    .update(client.as_ref(), &prior, &planned)
                    .await
                    .map(Some),
                (None, None) => Ok(None),
            }
        });

        match result {
            Ok(new_state) => RpcResponse::success(
                id,
                json!({
                    "new_state": new_state.map(|s| s.values),
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, diagnostics),
        }
    }

    /// Handle ReadResource
    fn handle_read_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let (_, resource) = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let current_state = config_state(params.get("current_state"));

        let result = self
            .runtime
            .block_on(resource.read(client.as_ref(), &current_state));

        match result {
            Ok(state) => {
                // Empty state: resource no longer exists
                let new_state = if state.is_empty() {
                    Value::Null
                } else {
                    json!(state.values)
                };
                RpcResponse::success(
                    id,
                    json!({
                        "new_state": new_state,
                        "diagnostics": []
                    }),
                )
            }
            Err(diagnostics) => RpcResponse::diagnostics(id, diagnostics),
        }
    }

    /// Handle ImportResourceState
    fn handle_import_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let (type_name, resource) = match self.resource(params) {
            Ok(r) => r,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let resource_id = params.get("id").and_then(|v| v.as_str()).unwrap_or("");

        let import_state = match resource.import_state(resource_id) {
            Ok(state) => state,
            Err(diagnostics) => return RpcResponse::diagnostics(id, diagnostics),
        };

        let result = self
            .runtime
            .block_on(resource.read(client.as_ref(), &import_state));

        match result {
            Ok(state) if state.is_empty() => RpcResponse::diagnostics(
                id,
                vec![Diagnostic::error(&format!("Resource {} not found", resource_id))],
            ),
            Ok(state) => RpcResponse::success(
                id,
                json!({
                    "imported_resources": [{
                        "type_name": type_name,
                        "state": state.values
                    }],
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, diagnostics),
        }
    }

    /// Handle ReadDataSource
    fn handle_read_data_source(&self, id: i64, params: &Value) -> RpcResponse {
        let data_source = match self.data_source(params) {
            Ok(d) => d,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return RpcResponse::diagnostics(id, vec![diag]),
        };

        let config = config_state(params.get("config"));

        match self
            .runtime
            .block_on(data_source.read(client.as_ref(), &config))
        {
            Ok(state) => RpcResponse::success(
                id,
                json!({
                    "state": state.values,
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => RpcResponse::diagnostics(id, diagnostics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Kube, KubeNode};
    use crate::resources::tests::{sample_node, FakeApi};

    fn provider_with(api: FakeApi) -> OvhProvider {
        let provider = OvhProvider::new().unwrap();
        provider.set_client(Arc::new(api));
        provider
    }

    fn call(provider: &OvhProvider, method: &str, params: Value) -> Value {
        let request = json!({"jsonrpc": "2.0", "id": 7, "method": method, "params": params});
        let response = provider.handle_request(&request.to_string());
        serde_json::from_str(&response).unwrap()
    }

    #[test]
    fn test_provider_schema() {
        let provider = OvhProvider::new().unwrap();
        let schema = provider.get_schema();

        assert!(schema.provider.attributes.contains_key("endpoint"));
        assert!(schema.provider.attributes["consumer_key"].sensitive);
        assert!(schema.resource_schemas.contains_key("ovh_kube_node"));
        assert!(schema.data_source_schemas.contains_key("ovh_kube"));
    }

    #[test]
    fn test_handle_unknown_method() {
        let provider = OvhProvider::new().unwrap();
        let response = call(&provider, "UnknownMethod", json!({}));

        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32601);
    }

    #[test]
    fn test_handle_parse_error() {
        let provider = OvhProvider::new().unwrap();
        let response: Value = serde_json::from_str(&provider.handle_request("{not json")).unwrap();

        assert_eq!(response["error"]["code"], -32700);
    }

    #[test]
    fn test_configure_with_explicit_credentials() {
        let provider = OvhProvider::new().unwrap();
        let response = call(
            &provider,
            "ConfigureProvider",
            json!({"config": {
                "endpoint": "ovh-eu",
                "application_key": "ak",
                "application_secret": "as",
                "consumer_key": "ck"
            }}),
        );

        assert_eq!(response["result"]["diagnostics"], json!([]));
        assert!(provider.get_client().is_ok());
    }

    #[test]
    fn test_configure_rejects_unknown_endpoint() {
        let provider = OvhProvider::new().unwrap();
        let response = call(
            &provider,
            "ConfigureProvider",
            json!({"config": {
                "endpoint": "ovh-moon",
                "application_key": "ak",
                "application_secret": "as",
                "consumer_key": "ck"
            }}),
        );

        let diags = response["result"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags.len(), 1);
        assert!(provider.get_client().is_err());
    }

    #[test]
    fn test_apply_without_configuration() {
        let provider = OvhProvider::new().unwrap();
        let response = call(
            &provider,
            "ApplyResourceChange",
            json!({"type_name": "ovh_kube_node", "prior_state": null, "planned_state": {}}),
        );

        assert_eq!(
            response["result"]["diagnostics"][0]["summary"],
            "Provider not configured"
        );
    }

    #[test]
    fn test_validate_resource_config() {
        let provider = OvhProvider::new().unwrap();
        let response = call(
            &provider,
            "ValidateResourceConfig",
            json!({"type_name": "ovh_kube_node", "config": {
                "project_id": "svc",
                "name": "worker-1",
                "flavor": null,
                "status": "NAPPING"
            }}),
        );

        let diags = response["result"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn test_validate_unknown_data_source() {
        let provider = OvhProvider::new().unwrap();
        let response = call(
            &provider,
            "ValidateDataResourceConfig",
            json!({"type_name": "ovh_cloud", "config": {}}),
        );

        assert_eq!(
            response["result"]["diagnostics"][0]["summary"],
            "Unknown data source type: ovh_cloud"
        );
    }

    #[test]
    fn test_plan_flags_replacement() {
        let provider = OvhProvider::new().unwrap();
        let prior = json!({
            "id": "node-1", "project_id": "svc", "name": "worker-1", "flavor": "b2-7"
        });
        let proposed = json!({
            "id": null, "project_id": "svc", "name": "worker-1", "flavor": "b2-15"
        });
        let response = call(
            &provider,
            "PlanResourceChange",
            json!({"type_name": "ovh_kube_node", "prior_state": prior, "proposed_new_state": proposed}),
        );

        assert_eq!(response["result"]["requires_replace"], json!(["flavor"]));
        assert_eq!(response["result"]["planned_state"]["id"], Value::Null);
    }

    #[test]
    fn test_plan_status_change_is_a_no_op() {
        let provider = OvhProvider::new().unwrap();
        let prior = json!({
            "id": "node-1", "project_id": "svc", "name": "worker-1", "flavor": "b2-7",
            "status": "READY"
        });
        let proposed = json!({
            "id": "node-1", "project_id": "svc", "name": "worker-1", "flavor": "b2-7",
            "status": "ERROR"
        });
        let response = call(
            &provider,
            "PlanResourceChange",
            json!({"type_name": "ovh_kube_node", "prior_state": prior, "proposed_new_state": proposed}),
        );

        assert_eq!(response["result"]["requires_replace"], json!([]));
        assert_eq!(response["result"]["planned_state"], prior);
    }

    #[test]
    fn test_apply_create_and_destroy() {
        let provider = provider_with(FakeApi::default());

        let created = call(
            &provider,
            "ApplyResourceChange",
            json!({"type_name": "ovh_kube_node", "prior_state": null, "planned_state": {
                "project_id": "svc", "name": "worker-3", "flavor": "b2-7"
            }}),
        );
        let new_state = created["result"]["new_state"].clone();
        assert_eq!(new_state["id"], "node-worker-3");

        let destroyed = call(
            &provider,
            "ApplyResourceChange",
            json!({"type_name": "ovh_kube_node", "prior_state": new_state, "planned_state": null}),
        );
        assert_eq!(destroyed["result"]["new_state"], Value::Null);
        assert_eq!(destroyed["result"]["diagnostics"], json!([]));
    }

    #[test]
    fn test_read_resource_removed_upstream() {
        let provider = provider_with(FakeApi::default());
        let response = call(
            &provider,
            "ReadResource",
            json!({"type_name": "ovh_kube_node", "current_state": {"project_id": "svc", "id": "node-1"}}),
        );

        assert_eq!(response["result"]["new_state"], Value::Null);
        assert_eq!(response["result"]["diagnostics"], json!([]));
    }

    #[test]
    fn test_import_node() {
        let node: KubeNode = sample_node();
        let provider = provider_with(FakeApi::default().with_node(node));

        let response = call(
            &provider,
            "ImportResourceState",
            json!({"type_name": "ovh_kube_node", "id": "svc/node-1"}),
        );

        let imported = &response["result"]["imported_resources"][0];
        assert_eq!(imported["type_name"], "ovh_kube_node");
        assert_eq!(imported["state"]["instance_id"], "inst-9");
    }

    #[test]
    fn test_read_data_source() {
        let kube = Kube {
            id: "svc".to_string(),
            name: "prod".to_string(),
            status: "READY".to_string(),
            ..Default::default()
        };
        let provider = provider_with(FakeApi::default().with_cluster("svc", kube));

        let response = call(
            &provider,
            "ReadDataSource",
            json!({"type_name": "ovh_kube", "config": {"name": "prod", "status": null}}),
        );

        assert_eq!(response["result"]["state"]["id"], "svc");
        assert_eq!(response["result"]["state"]["status"], "READY");
    }
}
