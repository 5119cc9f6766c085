//! API client for communicating with the dynpool agent

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// API client for the agent HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.client.get(self.url(path)?);
        Self::send(request).await
    }

    /// Make a PUT request with JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let request = self.client.put(self.url(path)?).json(body);
        Self::send(request).await
    }

    /// Fetch health without failing on 503, which still carries a report
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url("healthz")?)
            .send()
            .await
            .context("Failed to send request")?;

        response.json().await.context("Failed to parse response")
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_id: String,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub pool_size: usize,
    pub active_count: usize,
    pub largest_pool_size: usize,
    pub completed_task_count: u64,
    pub queue_kind: String,
    pub queue_size: usize,
    pub queue_capacity: Option<usize>,
    pub overflow_policy: String,
    pub overflow_count: u64,
    pub keep_alive_secs: u64,
    pub allow_core_thread_timeout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    pub pool_id: String,
    pub stats: Option<PoolStats>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolListResponse {
    pub pools: Vec<PoolSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSettings {
    pub enable: bool,
    pub queue_threshold: u32,
    pub active_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    pub receives: Vec<String>,
    pub interval_minutes: u64,
}

/// Declared configuration as stored by the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: String,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub queue_kind: String,
    pub queue_capacity: Option<usize>,
    pub overflow_policy: String,
    pub keep_alive_secs: u64,
    pub allow_core_thread_timeout: bool,
    pub alarm: AlarmSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDetailResponse {
    pub config: PoolConfig,
    pub stats: Option<PoolStats>,
    pub error: Option<String>,
}

/// Partial update; unset fields are left unchanged by the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_core_thread_timeout: Option<bool>,
}

impl PoolConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.core_pool_size.is_none()
            && self.maximum_pool_size.is_none()
            && self.queue_capacity.is_none()
            && self.keep_alive_secs.is_none()
            && self.overflow_policy.is_none()
            && self.allow_core_thread_timeout.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub pool_id: String,
    pub outcome: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_pool_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/pools")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "pools": [{
                        "pool_id": "orders",
                        "stats": {
                            "pool_id": "orders", "core_pool_size": 2, "maximum_pool_size": 4,
                            "pool_size": 1, "active_count": 0, "largest_pool_size": 1,
                            "completed_task_count": 7, "queue_kind": "linked_blocking",
                            "queue_size": 0, "queue_remaining_capacity": null,
                            "queue_capacity": null, "overflow_policy": "AbortPolicy",
                            "overflow_count": 0, "keep_alive_secs": 60,
                            "allow_core_thread_timeout": false, "shutdown": false
                        },
                        "error": null
                    }],
                    "total": 1
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let list: PoolListResponse = client.get("api/v1/pools").await.unwrap();

        mock.assert_async().await;
        assert_eq!(list.total, 1);
        assert_eq!(list.pools[0].stats.as_ref().unwrap().completed_task_count, 7);
    }

    #[tokio::test]
    async fn test_put_sends_only_set_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/v1/pools/orders/config")
            .match_body(mockito::Matcher::Json(serde_json::json!({ "maximum_pool_size": 8 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"pool_id":"orders","outcome":"unchanged","changes":[]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let update = PoolConfigUpdate {
            maximum_pool_size: Some(8),
            ..Default::default()
        };
        let response: RefreshResponse = client
            .put("api/v1/pools/orders/config", &update)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.outcome, "unchanged");
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/pools/ghost")
            .with_status(404)
            .with_body(r#"{"error":"pool ghost not found"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .get::<PoolDetailResponse>("api/v1/pools/ghost")
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("pool ghost not found"));
    }
}
