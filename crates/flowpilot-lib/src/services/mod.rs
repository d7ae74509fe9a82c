// Service Layer

pub mod assistant;
pub mod copilot;
pub mod error;
pub mod workflow_api;

pub use assistant::{AssistantRequest, AssistantTransport, BackendAssistant, ChatTurn};
pub use copilot::{
    ConversationController, SessionStore, StreamManager, WorkflowMerger, WorkflowSanitizer,
};
pub use error::{CopilotError, CopilotResult};
pub use workflow_api::{N8nWorkflowApi, WorkflowApi};
