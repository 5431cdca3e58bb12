//! OVH API Client for Terraform Provider

use crate::config::Credentials;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// OVH API Client
///
/// Every call except `/auth/time` is signed with the application secret and
/// consumer key.
#[derive(Clone)]
pub struct OvhClient {
    client: reqwest::Client,
    base_url: String,
    application_key: String,
    application_secret: String,
    consumer_key: String,
    time_delta: Arc<OnceCell<i64>>,
}

impl OvhClient {
    /// Create a new client
    pub fn new(credentials: &Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            application_key: credentials.application_key.clone(),
            application_secret: credentials.application_secret.clone(),
            consumer_key: credentials.consumer_key.clone(),
            time_delta: Arc::new(OnceCell::new()),
        })
    }

    /// Skip the `/auth/time` round-trip and use a fixed clock delta.
    #[cfg(test)]
    pub fn with_time_delta(mut self, delta: i64) -> Self {
        self.time_delta = Arc::new(OnceCell::new_with(Some(delta)));
        self
    }

    /// Difference between the API clock and the local clock, fetched once
    async fn time_delta(&self) -> Result<i64> {
        let delta = self
            .time_delta
            .get_or_try_init(|| async {
                let url = format!("{}/auth/time", self.base_url);
                let response = self.client.get(&url).header(ACCEPT, "application/json").send().await?;
                let server_time: i64 = handle_response(response).await?;
                let delta = server_time - chrono::Utc::now().timestamp();
                tracing::debug!(delta, "Computed OVH API clock delta");
                Ok::<_, ClientError>(delta)
            })
            .await?;
        Ok(*delta)
    }

    /// Build signed headers for a request
    fn headers(&self, method: &Method, url: &str, body: &str, timestamp: i64) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=utf-8"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-ovh-application",
            HeaderValue::from_str(&self.application_key)?,
        );
        headers.insert("x-ovh-consumer", HeaderValue::from_str(&self.consumer_key)?);
        headers.insert(
            "x-ovh-timestamp",
            HeaderValue::from_str(&timestamp.to_string())?,
        );
        headers.insert(
            "x-ovh-signature",
            HeaderValue::from_str(&sign(
                &self.application_secret,
                &self.consumer_key,
                method.as_str(),
                url,
                body,
                timestamp,
            ))?,
        );
        Ok(headers)
    }

    /// Send a signed request and return the raw response
    async fn send(&self, method: Method, path: &str, body: Option<String>) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let payload = body.unwrap_or_default();
        let timestamp = chrono::Utc::now().timestamp() + self.time_delta().await?;
        let headers = self.headers(&method, &url, &payload, timestamp)?;

        tracing::debug!(method = %method, url = %url, "Calling OVH API");

        let mut request = self.client.request(method, &url).headers(headers);
        if !payload.is_empty() {
            request = request.body(payload);
        }
        Ok(request.send().await?)
    }

    /// GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        handle_response(response).await
    }

    /// POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_string(body)?;
        let response = self.send(Method::POST, path, Some(body)).await?;
        handle_response(response).await
    }

    /// DELETE request
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(Method::DELETE, path, None).await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(error_for_status(status.as_u16(), message))
        }
    }
}

/// Compute the `$1$` request signature expected by the OVH API.
pub fn sign(
    application_secret: &str,
    consumer_key: &str,
    method: &str,
    url: &str,
    body: &str,
    timestamp: i64,
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(
        format!(
            "{}+{}+{}+{}+{}+{}",
            application_secret, consumer_key, method, url, body, timestamp
        )
        .as_bytes(),
    );
    format!("$1${}", hex::encode(hasher.finalize()))
}

/// Handle API response
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        Ok(serde_json::from_str(&body)?)
    } else {
        Err(error_for_status(status.as_u16(), api_message(&body)))
    }
}

fn error_for_status(status: u16, message: String) -> ClientError {
    match status {
        401 | 403 => ClientError::AuthFailed(message),
        404 => ClientError::NotFound(message),
        _ => ClientError::Api { status, message },
    }
}

/// Extract `message` from an OVH error body, falling back to the raw text
fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }

    serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string())
}

// ============================================================================
// API Data Types
// ============================================================================

/// Managed Kubernetes cluster as returned by `GET /kube/{serviceName}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Kube {
    pub id: String,
    pub name: String,
    pub status: String,
    pub url: String,
    pub nodes_url: String,
    pub version: String,
    pub update_policy: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_up_to_date: bool,
    pub control_plane_is_up_to_date: bool,
}

/// Worker node of a managed Kubernetes cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeNode {
    pub id: String,
    pub project_id: String,
    pub instance_id: Option<String>,
    pub name: String,
    pub flavor: String,
    pub status: String,
    pub version: String,
    pub is_up_to_date: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Create node request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKubeNode {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub project_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub flavor: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub name: String,
}

// ============================================================================
// API Methods
// ============================================================================

/// The managed Kubernetes calls the resources and data sources rely on
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// `GET /kube`
    async fn list_kube(&self) -> Result<Vec<String>>;

    /// `GET /kube/{service}`
    async fn get_kube(&self, service_name: &str) -> Result<Kube>;

    /// `POST /kube/{project}/publiccloud/node`
    async fn create_kube_node(&self, project_id: &str, request: &NewKubeNode) -> Result<KubeNode>;

    /// `GET /kube/{project}/publiccloud/node/{id}`
    async fn get_kube_node(&self, project_id: &str, node_id: &str) -> Result<KubeNode>;

    /// `DELETE /kube/{project}/publiccloud/node/{id}`
    async fn delete_kube_node(&self, project_id: &str, node_id: &str) -> Result<()>;
}

// Identifiers come from user configuration; each one stays a single path segment.
pub fn kube_path(service_name: &str) -> String {
    format!("/kube/{}", urlencoding::encode(service_name))
}

pub fn kube_nodes_path(project_id: &str) -> String {
    format!("/kube/{}/publiccloud/node", urlencoding::encode(project_id))
}

pub fn kube_node_path(project_id: &str, node_id: &str) -> String {
    format!(
        "/kube/{}/publiccloud/node/{}",
        urlencoding::encode(project_id),
        urlencoding::encode(node_id)
    )
}

#[async_trait]
impl KubeApi for OvhClient {
    async fn list_kube(&self) -> Result<Vec<String>> {
        self.get("/kube").await
    }

    async fn get_kube(&self, service_name: &str) -> Result<Kube> {
        self.get(&kube_path(service_name)).await
    }

    async fn create_kube_node(&self, project_id: &str, request: &NewKubeNode) -> Result<KubeNode> {
        self.post(&kube_nodes_path(project_id), request).await
    }

    async fn get_kube_node(&self, project_id: &str, node_id: &str) -> Result<KubeNode> {
        self.get(&kube_node_path(project_id, node_id)).await
    }

    async fn delete_kube_node(&self, project_id: &str, node_id: &str) -> Result<()> {
        self.delete(&kube_node_path(project_id, node_id)).await
    }
}
