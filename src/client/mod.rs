//! Orchestrator query interface
//!
//! The progress poller only reads from the orchestrator. Anything that can
//! answer these three queries can drive it; [`EngineClient`] talks to the
//! engine REST API.

mod engine;

pub use engine::EngineClient;

use crate::model::{Node, Service, Task};
use async_trait::async_trait;
use thiserror::Error;

/// Orchestrator query errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Engine returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid engine URL: {0}")]
    InvalidUrl(String),
}

/// Which tasks to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub service_id: String,
    /// Only tasks created from the current service spec.
    pub up_to_date: bool,
}

impl TaskFilter {
    /// Current tasks of one service.
    pub fn up_to_date(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            up_to_date: true,
        }
    }

    /// Engine `filters` query parameter.
    pub fn to_query(&self) -> String {
        let mut filters = serde_json::Map::new();
        filters.insert("service".to_string(), serde_json::json!([self.service_id]));
        if self.up_to_date {
            filters.insert("_up-to-date".to_string(), serde_json::json!(["true"]));
        }
        serde_json::Value::Object(filters).to_string()
    }
}

/// Read access to the orchestrator
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn get_service(&self, service_id: &str) -> Result<Service, ClientError>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClientError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError>;
}
