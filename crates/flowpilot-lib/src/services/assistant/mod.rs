// Assistant Transport
//
// Port for the assistant backend. A transport accepts the conversation so far
// and returns the raw line stream of the chunked reply; the stream consumer
// owns the framing on top of those lines.

pub mod backend;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::services::error::CopilotResult;

pub use backend::BackendAssistant;

/// Raw lines of a chunked assistant reply, in arrival order.
pub type LineStream = Pin<Box<dyn Stream<Item = CopilotResult<String>> + Send>>;

/// One turn of conversation history on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A chat request: fixed system preamble, full history (the newest entry is
/// the user message being answered), and the workflow the conversation is
/// scoped to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    pub system: String,
    pub messages: Vec<ChatTurn>,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Fixed system preamble sent with every request.
pub const SYSTEM_PREAMBLE: &str = "\
You are a workflow automation copilot. Help the user build automation \
workflows by explaining the solution and, when they ask for concrete nodes or \
connections, including a JSON code block they can apply directly:

```json
{
  \"nodes\": [
    {
      \"name\": \"Node Name\",
      \"type\": \"n8n-nodes-base.nodeType\",
      \"parameters\": {},
      \"position\": [0, 0]
    }
  ],
  \"connections\": {}
}
```

Ensure the JSON is valid and only includes nodes and connections that were \
explicitly requested.";

/// Trait for assistant backends.
///
/// Implementations resolve endpoints and authentication themselves; callers
/// depend only on the returned line stream.
#[async_trait]
pub trait AssistantTransport: Send + Sync {
    /// Start a chunked reply for `request`.
    async fn stream_chat(&self, request: AssistantRequest) -> CopilotResult<LineStream>;
}
