// Copilot Service Module
//
// Core conversation-and-apply loop:
// - Per-workflow session cache with bounded logs and eviction
// - Streaming reply consumption with cancellation
// - Fragment merge + sanitation against the remote workflow document
// - The controller wiring it all together

pub mod controller;
pub mod merge;
pub mod sanitize;
pub mod session_store;
pub mod stream;

pub use controller::ConversationController;
pub use merge::WorkflowMerger;
pub use sanitize::WorkflowSanitizer;
pub use session_store::SessionStore;
pub use stream::{StreamManager, StreamOutcome};
