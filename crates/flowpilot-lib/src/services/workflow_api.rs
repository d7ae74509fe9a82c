// Remote workflow service adapter
//
// Port for the workflow host plus the n8n HTTP implementation: fetch a
// document, create an empty workflow, publish an updated document.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use crate::models::config::WorkflowApiConfig;
use crate::models::workflow::WorkflowDocument;
use crate::services::error::{CopilotError, CopilotResult};

/// API key header expected by the n8n public API.
const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// Trait for the remote workflow service.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Fetch the current document for `workflow_id`.
    async fn fetch_workflow(&self, workflow_id: &str) -> CopilotResult<WorkflowDocument>;

    /// Create an empty workflow named `name`; returns the assigned id.
    async fn create_workflow(&self, name: &str) -> CopilotResult<String>;

    /// Replace the document for `workflow_id`.
    async fn update_workflow(
        &self,
        workflow_id: &str,
        document: &WorkflowDocument,
    ) -> CopilotResult<()>;
}

/// n8n workflow API over HTTP.
pub struct N8nWorkflowApi {
    config: WorkflowApiConfig,
    client: Client,
}

impl N8nWorkflowApi {
    pub fn new(config: WorkflowApiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.config.api_url.trim_end_matches('/');
        format!("{}/api/v1{}", base, path)
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(&self.config.api_key)
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn classify_failure(response: reqwest::Response) -> CopilotError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 {
            return CopilotError::AuthFailed(body);
        }
        if status.as_u16() == 429 {
            return CopilotError::RateLimited;
        }
        CopilotError::WorkflowApiError {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl WorkflowApi for N8nWorkflowApi {
    async fn fetch_workflow(&self, workflow_id: &str) -> CopilotResult<WorkflowDocument> {
        let url = self.api_url(&format!("/workflows/{}", workflow_id));
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        Ok(response.json::<WorkflowDocument>().await?)
    }

    async fn create_workflow(&self, name: &str) -> CopilotResult<String> {
        let url = self.api_url("/workflows");
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&WorkflowDocument::empty(name))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let created: serde_json::Value = response.json().await?;
        match &created["id"] {
            serde_json::Value::String(id) => Ok(id.clone()),
            serde_json::Value::Number(id) => Ok(id.to_string()),
            _ => Err(CopilotError::ParseError(
                "workflow create response has no id".to_string(),
            )),
        }
    }

    async fn update_workflow(
        &self,
        workflow_id: &str,
        document: &WorkflowDocument,
    ) -> CopilotResult<()> {
        let url = self.api_url(&format!("/workflows/{}", workflow_id));
        let response = self
            .client
            .put(&url)
            .headers(self.auth_headers())
            .json(document)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        log::info!("published workflow {}", workflow_id);
        Ok(())
    }
}
