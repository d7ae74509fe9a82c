// Produced events
//
// Everything the conversation controller reports outward. A rendering adapter
// subscribes to these; the core never touches presentation concerns.

use serde::{Deserialize, Serialize};

use super::chat::ChatSession;
use super::workflow::WorkflowFragment;

/// Event emitted by the conversation controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CopilotEvent {
    /// The active session switched (or its contents were reset).
    SessionChanged { session: ChatSession },
    /// Another chunk of an assistant reply arrived. `text` is the full
    /// accumulated partial text, not the delta.
    #[serde(rename_all = "camelCase")]
    StreamUpdate { stream_id: String, text: String },
    /// An assistant reply finished streaming.
    #[serde(rename_all = "camelCase")]
    StreamDone {
        stream_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The assistant reply failed; `message` is user-facing.
    #[serde(rename_all = "camelCase")]
    StreamFailed { stream_id: String, message: String },
    /// A workflow fragment was found in the final assistant text.
    FragmentDetected { fragment: WorkflowFragment },
    /// An accepted fragment was merged and published.
    #[serde(rename_all = "camelCase")]
    MergeSucceeded { workflow_id: String },
    /// Merging or publishing an accepted fragment failed; `message` is
    /// user-facing.
    MergeFailed { message: String },
}
