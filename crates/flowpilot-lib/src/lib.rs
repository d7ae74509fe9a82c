// Flowpilot shared library
//
// Core of a workflow copilot: per-workflow chat sessions that survive
// navigation, streamed assistant replies, and a merge/sanitize pipeline that
// folds assistant-proposed fragments into a live remote workflow document.
//
// UI rendering, page integration, and credential management live in the
// embedding application; it drives the `ConversationController` and
// subscribes to the `CopilotEvent` channel.

pub mod models;
pub mod repositories;
pub mod services;

pub use models::{
    AssistantConfig, ChatSession, ConnectionSpec, CopilotEvent, Message, MessageKind, MessageRole,
    NodeSpec, SessionStoreConfig, WorkflowApiConfig, WorkflowDocument, WorkflowFragment,
    WorkflowKey,
};
pub use repositories::{
    InMemorySessionRepository, JsonFileSessionRepository, SessionRepository,
};
pub use services::{
    AssistantTransport, BackendAssistant, ConversationController, CopilotError, CopilotResult,
    N8nWorkflowApi, SessionStore, WorkflowApi, WorkflowMerger, WorkflowSanitizer,
};
