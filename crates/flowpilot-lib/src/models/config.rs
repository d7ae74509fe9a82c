// Configuration models
//
// Plain config structs with sensible defaults; every cap and endpoint can be
// overridden by the embedding application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Assistant backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    /// Base URL of the assistant backend, without a trailing slash
    pub endpoint: String,
    /// Upstream model provider the backend should route to
    pub provider: String,
    /// Provider API key forwarded with each request, if the backend expects
    /// the caller to supply one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/api/v1".to_string(),
            provider: "openai".to_string(),
            api_key: None,
        }
    }
}

/// Remote workflow service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowApiConfig {
    /// Base URL of the workflow host, e.g. `https://acme.app.n8n.cloud`
    pub api_url: String,
    /// API key sent as the `X-N8N-API-KEY` header
    pub api_key: String,
}

/// Session store caps and persistence cadence.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Maximum number of sessions kept across all workflow keys
    pub max_sessions: usize,
    /// Maximum messages retained per session
    pub max_messages: usize,
    /// How often dirty state is flushed to the persistence port
    pub flush_interval: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            max_messages: 100,
            flush_interval: Duration::from_secs(30),
        }
    }
}
