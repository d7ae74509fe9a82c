// Assistant backend adapter
//
// Talks to the copilot backend over HTTP: POSTs the conversation to
// /chat/stream and exposes the chunked reply as a stream of raw lines.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;

use crate::models::config::AssistantConfig;
use crate::services::error::{CopilotError, CopilotResult};

use super::{AssistantRequest, AssistantTransport, ChatTurn, LineStream};

/// HTTP assistant backend.
pub struct BackendAssistant {
    config: AssistantConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct StreamRequestBody<'a> {
    /// The user message being answered (the newest history entry)
    message: &'a str,
    system: &'a str,
    messages: &'a [ChatTurn],
    workflow_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    provider: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

impl BackendAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers
    }
}

#[async_trait]
impl AssistantTransport for BackendAssistant {
    async fn stream_chat(&self, request: AssistantRequest) -> CopilotResult<LineStream> {
        let url = self.api_url("/chat/stream");

        let message = request
            .messages
            .last()
            .map(|turn| turn.content.as_str())
            .unwrap_or_default();

        let body = StreamRequestBody {
            message,
            system: &request.system,
            messages: &request.messages,
            workflow_id: &request.workflow_id,
            session_id: request.session_id.as_deref(),
            provider: &self.config.provider,
            api_key: self.config.api_key.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(CopilotError::AuthFailed(body));
            }
            if status.as_u16() == 429 {
                return Err(CopilotError::RateLimited);
            }
            return Err(CopilotError::ApiError(format!(
                "assistant backend error ({}): {}",
                status, body
            )));
        }

        Ok(lines_from_bytes(response.bytes_stream()))
    }
}

/// Re-chunk a byte stream into complete lines.
///
/// Network chunks split lines at arbitrary byte offsets; a partial trailing
/// line is carried over until its newline arrives. A trailing line without a
/// newline is yielded when the source ends.
pub fn lines_from_bytes<S, B, E>(bytes: S) -> LineStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<CopilotError> + Send,
{
    Box::pin(async_stream::stream! {
        futures::pin_mut!(bytes);
        let mut buf = String::new();

        while let Some(item) = bytes.next().await {
            match item {
                Ok(chunk) => {
                    buf.push_str(&String::from_utf8_lossy(chunk.as_ref()));
                    while let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim_end_matches('\r').to_string();
                        buf.drain(..=pos);
                        yield Ok(line);
                    }
                }
                Err(err) => {
                    let err: CopilotError = err.into();
                    yield Err(err);
                    return;
                }
            }
        }

        if !buf.is_empty() {
            yield Ok(buf);
        }
    })
}
