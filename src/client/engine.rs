//! Engine REST client
//!
//! Speaks the engine API over plain HTTP(S). Unix sockets are not supported;
//! point the client at a TCP endpoint (`DOCKER_HOST=tcp://...`).

use super::{ClientError, OrchestratorClient, TaskFilter};
use crate::model::{Node, Service, Task};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Error body the engine returns with non-2xx responses
#[derive(Deserialize)]
struct EngineErrorBody {
    message: String,
}

pub struct EngineClient {
    base_url: String,
    client: Client,
}

impl EngineClient {
    /// Create a client for `base_url`, e.g. `http://127.0.0.1:2375` or
    /// `http://host:2375/v1.41`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let url = Url::parse_with_params(&url, params)
            .map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))?;

        tracing::debug!(%url, "engine request");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<EngineErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body);
            if status == StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound(message));
            }
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl OrchestratorClient for EngineClient {
    async fn get_service(&self, service_id: &str) -> Result<Service, ClientError> {
        self.get_json(&format!("/services/{service_id}"), &[]).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClientError> {
        self.get_json("/tasks", &[("filters", filter.to_query())])
            .await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        self.get_json("/nodes", &[]).await
    }
}

/// Accept `tcp://` as the CLI does and strip trailing slashes.
fn normalize_base_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = match trimmed.strip_prefix("tcp://") {
        Some(rest) => format!("http://{rest}"),
        None => trimmed.to_string(),
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ClientError::InvalidUrl(raw.to_string()));
    }
    Url::parse(&url).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?;
    Ok(url)
}
