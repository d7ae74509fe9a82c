// Data models
//
// Value types shared across the library: chat sessions, workflow documents,
// produced events, and configuration.

pub mod chat;
pub mod config;
pub mod event;
pub mod workflow;

pub use chat::{ChatSession, Message, MessageKind, MessageRole, WorkflowKey};
pub use config::{AssistantConfig, SessionStoreConfig, WorkflowApiConfig};
pub use event::CopilotEvent;
pub use workflow::{ConnectionMap, ConnectionSpec, NodeSpec, WorkflowDocument, WorkflowFragment};
