// Conversation controller
//
// Composition root for the copilot: tracks the active workflow key, feeds
// user input through the assistant transport and stream consumer, detects
// proposed workflow fragments in replies, and applies accepted fragments to
// the remote workflow via merge + sanitize + publish.
//
// This is the only layer that turns typed errors into user-facing text.
// Everything it reports outward goes through the produced-event channel.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, RwLock};

use crate::models::chat::{MessageKind, MessageRole, WorkflowKey};
use crate::models::event::CopilotEvent;
use crate::models::workflow::WorkflowFragment;
use crate::services::assistant::{AssistantRequest, AssistantTransport, ChatTurn, SYSTEM_PREAMBLE};
use crate::services::error::{CopilotError, CopilotResult};
use crate::services::workflow_api::WorkflowApi;

use super::merge::WorkflowMerger;
use super::sanitize::WorkflowSanitizer;
use super::session_store::SessionStore;
use super::stream::{self, StreamManager};

/// Fenced JSON block in assistant prose. Best-effort: whatever it captures is
/// still untrusted and goes through the sanitizer.
static FENCED_JSON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json pattern is valid")
});

/// Orchestrates one user's conversation-and-apply loop.
pub struct ConversationController {
    store: Arc<SessionStore>,
    assistant: Arc<dyn AssistantTransport>,
    workflow_api: Option<Arc<dyn WorkflowApi>>,
    streams: StreamManager,
    events: mpsc::UnboundedSender<CopilotEvent>,
    active_key: RwLock<WorkflowKey>,
    backend_session_id: RwLock<Option<String>>,
}

impl ConversationController {
    /// Create a controller and the receiving end of its event channel.
    ///
    /// `workflow_api` may be `None` when no credentials are configured;
    /// conversation still works, only applying fragments is refused.
    pub fn new(
        store: Arc<SessionStore>,
        assistant: Arc<dyn AssistantTransport>,
        workflow_api: Option<Arc<dyn WorkflowApi>>,
    ) -> (Self, mpsc::UnboundedReceiver<CopilotEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            store,
            assistant,
            workflow_api,
            streams: StreamManager::new(),
            events,
            active_key: RwLock::new(WorkflowKey::Unknown),
            backend_session_id: RwLock::new(None),
        };
        (controller, events_rx)
    }

    fn emit(&self, event: CopilotEvent) {
        let _ = self.events.send(event);
    }

    /// The key the conversation is currently scoped to.
    pub async fn active_key(&self) -> WorkflowKey {
        self.active_key.read().await.clone()
    }

    /// Switch the conversation to `key`, creating its session if needed.
    pub async fn set_active_workflow(&self, key: WorkflowKey) {
        let session = self.store.get_or_create(&key).await;
        self.store.set_last_active_key(Some(key.clone())).await;
        *self.active_key.write().await = key;
        *self.backend_session_id.write().await = None;
        self.emit(CopilotEvent::SessionChanged { session });
    }

    /// React to an editor navigation. Only a changed key switches sessions.
    pub async fn handle_navigation(&self, url: &str) {
        let key = WorkflowKey::from_url(url);
        if *self.active_key.read().await == key {
            return;
        }
        log::debug!("switching conversation to {}", key);
        self.set_active_workflow(key).await;
    }

    /// Restore the session that was active when the store was last saved.
    pub async fn restore_last_session(&self) {
        if let Some(key) = self.store.last_active_key().await {
            self.set_active_workflow(key).await;
        }
    }

    /// Send a user message and stream the assistant's reply.
    ///
    /// Emits ordered `streamUpdate`s while the reply arrives, then either
    /// `streamDone` (plus `fragmentDetected` when the reply carries a usable
    /// fragment) or `streamFailed` with the failure rendered as an
    /// assistant-role error message. A send while a previous reply is still
    /// streaming cancels that stream first.
    pub async fn send_message(&self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }

        let key = self.active_key().await;
        self.store
            .append(&key, MessageRole::User, content.to_string(), MessageKind::Normal)
            .await;

        let request = self.build_request(&key).await;
        let (stream_id, cancel_rx) = self.streams.begin().await;

        let lines = match self.assistant.stream_chat(request).await {
            Ok(lines) => lines,
            Err(err) => {
                self.streams.finish(&stream_id).await;
                self.report_stream_failure(&key, &stream_id, &err).await;
                return;
            }
        };

        let outcome = stream::consume(&stream_id, lines, cancel_rx, &self.events).await;
        self.streams.finish(&stream_id).await;

        let Some(outcome) = outcome else {
            // Cancelled: nothing is recorded and no completion fires.
            return;
        };

        if let Some(err) = outcome.error {
            self.report_stream_failure(&key, &stream_id, &err).await;
            return;
        }

        if let Some(session_id) = outcome.session_id {
            *self.backend_session_id.write().await = Some(session_id.clone());
        }

        self.store
            .append(
                &key,
                MessageRole::Assistant,
                outcome.text.clone(),
                MessageKind::Normal,
            )
            .await;
        self.emit(CopilotEvent::StreamDone {
            stream_id,
            text: outcome.text.clone(),
            session_id: self.backend_session_id.read().await.clone(),
        });

        if let Some(fragment) = Self::extract_fragment(&outcome.text) {
            self.emit(CopilotEvent::FragmentDetected { fragment });
        }
    }

    /// Cancel the in-flight assistant reply, if any.
    pub async fn cancel_stream(&self) -> bool {
        self.streams.cancel_active().await
    }

    /// Empty the active session's message log.
    pub async fn clear_conversation(&self) {
        let key = self.active_key().await;
        self.store.clear(&key).await;
        if let Some(session) = self.store.get(&key).await {
            self.emit(CopilotEvent::SessionChanged { session });
        }
    }

    /// Apply an accepted fragment to the remote workflow.
    ///
    /// Resolves the target id (creating the workflow remotely first when the
    /// active key is "new"), fetches the current document, merges, sanitizes,
    /// and publishes. Runs to completion or failure; not cancellable.
    pub async fn accept_fragment(&self, fragment: WorkflowFragment) {
        match self.apply_fragment(fragment).await {
            Ok(workflow_id) => {
                let key = self.active_key().await;
                self.store
                    .append(
                        &key,
                        MessageRole::Assistant,
                        "Workflow updated.".to_string(),
                        MessageKind::Notice,
                    )
                    .await;
                self.emit(CopilotEvent::MergeSucceeded { workflow_id });
            }
            Err(err) => {
                log::warn!("fragment apply failed: {}", err);
                self.emit(CopilotEvent::MergeFailed {
                    message: Self::error_text(&err),
                });
            }
        }
    }

    async fn apply_fragment(&self, fragment: WorkflowFragment) -> CopilotResult<String> {
        if fragment.is_empty() {
            return Err(CopilotError::EmptyFragment);
        }
        let api = self
            .workflow_api
            .clone()
            .ok_or(CopilotError::MissingCredentials)?;

        let workflow_id = match self.active_key().await {
            WorkflowKey::Unknown => return Err(CopilotError::MissingWorkflowKey),
            WorkflowKey::Workflow(id) => id,
            WorkflowKey::New => {
                let id = api.create_workflow("New Workflow").await?;
                log::info!("created workflow {} for pending conversation", id);
                self.set_active_workflow(WorkflowKey::Workflow(id.clone()))
                    .await;
                id
            }
        };
        let key = WorkflowKey::Workflow(workflow_id.clone());

        let existing = api.fetch_workflow(&workflow_id).await?;
        if !existing.name.trim().is_empty() {
            self.store.set_display_name(&key, &existing.name).await;
        }

        let merged = WorkflowMerger::merge(&existing, &fragment);
        let cleaned = WorkflowSanitizer::sanitize(&merged);
        api.update_workflow(&workflow_id, &cleaned).await?;

        Ok(workflow_id)
    }

    async fn build_request(&self, key: &WorkflowKey) -> AssistantRequest {
        let session = self.store.get_or_create(key).await;
        let messages = session
            .messages
            .iter()
            .map(|msg| ChatTurn {
                role: msg.role.to_string(),
                content: msg.content.clone(),
            })
            .collect();

        AssistantRequest {
            system: SYSTEM_PREAMBLE.to_string(),
            messages,
            workflow_id: key.storage_key(),
            session_id: self.backend_session_id.read().await.clone(),
        }
    }

    async fn report_stream_failure(&self, key: &WorkflowKey, stream_id: &str, err: &CopilotError) {
        log::warn!("assistant stream failed: {}", err);
        let message = Self::error_text(err);
        self.store
            .append(key, MessageRole::Assistant, message.clone(), MessageKind::Error)
            .await;
        self.emit(CopilotEvent::StreamFailed {
            stream_id: stream_id.to_string(),
            message,
        });
    }

    /// Pull the first fenced JSON block out of `text` and coerce it into a
    /// fragment. `None` when there is no parseable structure at all.
    fn extract_fragment(text: &str) -> Option<WorkflowFragment> {
        for caps in FENCED_JSON_RE.captures_iter(text) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&caps[1]) else {
                continue;
            };
            if let Some(fragment) = WorkflowSanitizer::fragment_from_value(&value) {
                return Some(fragment);
            }
        }
        None
    }

    /// User-facing text for a failure. Remediation differs per case, so the
    /// wording stays specific.
    fn error_text(err: &CopilotError) -> String {
        match err {
            CopilotError::MissingWorkflowKey => {
                "No workflow detected. Open a workflow in the editor before applying changes."
                    .to_string()
            }
            CopilotError::MissingCredentials => {
                "Workflow service is not connected. Set the API URL and key in settings."
                    .to_string()
            }
            CopilotError::EmptyFragment => {
                "The response does not contain an applicable workflow fragment.".to_string()
            }
            CopilotError::AuthFailed(_) => {
                "Authentication failed. Check your API key in settings.".to_string()
            }
            CopilotError::RateLimited => "Rate limit exceeded. Please try again later.".to_string(),
            CopilotError::Timeout => "The service took too long to respond. Please try again."
                .to_string(),
            CopilotError::ConnectionFailed(_) => {
                "Could not reach the service. Check your connection and settings.".to_string()
            }
            other => format!("Error: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::SessionStoreConfig;
    use crate::models::workflow::WorkflowDocument;
    use crate::repositories::session_repo::InMemorySessionRepository;
    use crate::services::assistant::LineStream;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Assistant transport that replays a scripted line stream per call.
    struct ScriptedAssistant {
        scripts: Mutex<Vec<Vec<CopilotResult<String>>>>,
        requests: Mutex<Vec<AssistantRequest>>,
    }

    impl ScriptedAssistant {
        fn new(scripts: Vec<Vec<CopilotResult<String>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AssistantTransport for ScriptedAssistant {
        async fn stream_chat(&self, request: AssistantRequest) -> CopilotResult<LineStream> {
            self.requests.lock().await.push(request);
            let mut scripts = self.scripts.lock().await;
            if scripts.is_empty() {
                return Err(CopilotError::ConnectionFailed("no script".to_string()));
            }
            let lines = scripts.remove(0);
            Ok(Box::pin(futures::stream::iter(lines)))
        }
    }

    /// Workflow API double around one in-memory document.
    struct RecordingWorkflowApi {
        document: Mutex<WorkflowDocument>,
        puts: Mutex<Vec<(String, WorkflowDocument)>>,
        created: Mutex<Vec<String>>,
    }

    impl RecordingWorkflowApi {
        fn new(document: WorkflowDocument) -> Self {
            Self {
                document: Mutex::new(document),
                puts: Mutex::new(Vec::new()),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WorkflowApi for RecordingWorkflowApi {
        async fn fetch_workflow(&self, _workflow_id: &str) -> CopilotResult<WorkflowDocument> {
            Ok(self.document.lock().await.clone())
        }

        async fn create_workflow(&self, name: &str) -> CopilotResult<String> {
            let id = format!("created-{}", self.created.lock().await.len() + 1);
            self.created.lock().await.push(name.to_string());
            Ok(id)
        }

        async fn update_workflow(
            &self,
            workflow_id: &str,
            document: &WorkflowDocument,
        ) -> CopilotResult<()> {
            self.puts
                .lock()
                .await
                .push((workflow_id.to_string(), document.clone()));
            *self.document.lock().await = document.clone();
            Ok(())
        }
    }

    async fn test_store() -> Arc<SessionStore> {
        let repo = Arc::new(InMemorySessionRepository::new());
        SessionStore::open(
            repo,
            SessionStoreConfig {
                flush_interval: Duration::from_secs(3600),
                ..SessionStoreConfig::default()
            },
        )
        .await
    }

    fn data(json: &str) -> CopilotResult<String> {
        Ok(format!("data: {}", json))
    }

    fn done() -> CopilotResult<String> {
        Ok("data: [DONE]".to_string())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CopilotEvent>) -> Vec<CopilotEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_fragment_applied_end_to_end() {
        let reply_head = r#"{"chunk": "Here is a webhook trigger:\n"}"#;
        let reply_tail = r#"{"chunk": "```json\n{\"nodes\":[{\"name\":\"Webhook\",\"type\":\"n8n-nodes-base.webhook\",\"parameters\":{},\"position\":[0,0]}],\"connections\":{}}\n```"}"#;
        let assistant = Arc::new(ScriptedAssistant::new(vec![vec![
            data(reply_head),
            data(reply_tail),
            done(),
        ]]));
        let api = Arc::new(RecordingWorkflowApi::new(WorkflowDocument::empty(
            "My workflow",
        )));

        let store = test_store().await;
        let (controller, mut events_rx) =
            ConversationController::new(store.clone(), assistant, Some(api.clone()));

        controller
            .set_active_workflow(WorkflowKey::Workflow("wf1".to_string()))
            .await;
        let session = store
            .get(&WorkflowKey::Workflow("wf1".to_string()))
            .await
            .unwrap();
        assert_eq!(session.message_count(), 0);

        controller.send_message("add a webhook trigger").await;

        let events = drain(&mut events_rx);
        let fragment = events
            .iter()
            .find_map(|event| match event {
                CopilotEvent::FragmentDetected { fragment } => Some(fragment.clone()),
                _ => None,
            })
            .expect("fragment detected");
        assert_eq!(fragment.nodes.len(), 1);
        assert!(events
            .iter()
            .any(|event| matches!(event, CopilotEvent::StreamDone { .. })));

        controller.accept_fragment(fragment).await;

        let events = drain(&mut events_rx);
        assert!(events.iter().any(|event| matches!(
            event,
            CopilotEvent::MergeSucceeded { workflow_id } if workflow_id == "wf1"
        )));

        let puts = api.puts.lock().await;
        assert_eq!(puts.len(), 1);
        let (put_id, body) = &puts[0];
        assert_eq!(put_id, "wf1");
        assert_eq!(body.nodes.len(), 1);
        assert_eq!(body.nodes[0].position, [100.0, 100.0]);
        assert_eq!(body.nodes[0].name, "Webhook");
        assert!(!body.nodes[0].id.is_empty());
        assert!(body.extra.is_empty());
    }

    #[tokio::test]
    async fn test_stream_updates_arrive_in_order() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![vec![
            data(r#"{"chunk": "He"}"#),
            data(r#"{"chunk": "llo"}"#),
            done(),
        ]]));
        let store = test_store().await;
        let (controller, mut events_rx) =
            ConversationController::new(store.clone(), assistant, None);

        controller
            .set_active_workflow(WorkflowKey::Workflow("wf1".to_string()))
            .await;
        controller.send_message("hi").await;

        let events = drain(&mut events_rx);
        let partials: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                CopilotEvent::StreamUpdate { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(partials, vec!["He".to_string(), "Hello".to_string()]);

        // Both sides of the exchange were recorded, in order.
        let session = store
            .get(&WorkflowKey::Workflow("wf1".to_string()))
            .await
            .unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, MessageRole::User);
        assert_eq!(session.messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_message() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![]));
        let store = test_store().await;
        let (controller, mut events_rx) =
            ConversationController::new(store.clone(), assistant, None);

        controller
            .set_active_workflow(WorkflowKey::Workflow("wf1".to_string()))
            .await;
        controller.send_message("hi").await;

        let events = drain(&mut events_rx);
        assert!(events
            .iter()
            .any(|event| matches!(event, CopilotEvent::StreamFailed { .. })));

        let session = store
            .get(&WorkflowKey::Workflow("wf1".to_string()))
            .await
            .unwrap();
        let last = session.messages.last().unwrap();
        assert_eq!(last.role, MessageRole::Assistant);
        assert_eq!(last.kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn test_accept_without_credentials_is_refused_specifically() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![]));
        let store = test_store().await;
        let (controller, mut events_rx) = ConversationController::new(store, assistant, None);

        controller
            .set_active_workflow(WorkflowKey::Workflow("wf1".to_string()))
            .await;

        let fragment = WorkflowSanitizer::fragment_from_value(&serde_json::json!({
            "nodes": [{"name": "Webhook"}]
        }))
        .unwrap();
        controller.accept_fragment(fragment).await;

        let events = drain(&mut events_rx);
        let message = events
            .iter()
            .find_map(|event| match event {
                CopilotEvent::MergeFailed { message } => Some(message.clone()),
                _ => None,
            })
            .expect("merge failed");
        assert!(message.contains("settings"));
        assert!(message.contains("not connected"));
    }

    #[tokio::test]
    async fn test_accept_with_unknown_key_is_refused_specifically() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![]));
        let api = Arc::new(RecordingWorkflowApi::new(WorkflowDocument::empty("x")));
        let store = test_store().await;
        let (controller, mut events_rx) =
            ConversationController::new(store, assistant, Some(api));

        controller.set_active_workflow(WorkflowKey::Unknown).await;

        let fragment = WorkflowSanitizer::fragment_from_value(&serde_json::json!({
            "nodes": [{"name": "Webhook"}]
        }))
        .unwrap();
        controller.accept_fragment(fragment).await;

        let events = drain(&mut events_rx);
        let message = events
            .iter()
            .find_map(|event| match event {
                CopilotEvent::MergeFailed { message } => Some(message.clone()),
                _ => None,
            })
            .expect("merge failed");
        assert!(message.contains("No workflow detected"));
    }

    #[tokio::test]
    async fn test_accept_on_new_key_creates_workflow_first() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![]));
        let api = Arc::new(RecordingWorkflowApi::new(WorkflowDocument::empty(
            "New Workflow",
        )));
        let store = test_store().await;
        let (controller, mut events_rx) =
            ConversationController::new(store.clone(), assistant, Some(api.clone()));

        controller.set_active_workflow(WorkflowKey::New).await;

        let fragment = WorkflowSanitizer::fragment_from_value(&serde_json::json!({
            "nodes": [{"name": "Webhook"}]
        }))
        .unwrap();
        controller.accept_fragment(fragment).await;

        assert_eq!(api.created.lock().await.as_slice(), ["New Workflow"]);
        let puts = api.puts.lock().await;
        assert_eq!(puts[0].0, "created-1");

        // The conversation followed the assigned id.
        assert_eq!(
            controller.active_key().await,
            WorkflowKey::Workflow("created-1".to_string())
        );
        let events = drain(&mut events_rx);
        assert!(events
            .iter()
            .any(|event| matches!(event, CopilotEvent::MergeSucceeded { .. })));
    }

    #[tokio::test]
    async fn test_navigation_switches_sessions_only_on_change() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![]));
        let store = test_store().await;
        let (controller, mut events_rx) = ConversationController::new(store, assistant, None);

        controller
            .handle_navigation("https://n8n.example.com/workflow/wf1")
            .await;
        controller
            .handle_navigation("https://n8n.example.com/workflow/wf1?tab=settings")
            .await;
        controller
            .handle_navigation("https://n8n.example.com/workflow/wf2")
            .await;

        let events = drain(&mut events_rx);
        let changes = events
            .iter()
            .filter(|event| matches!(event, CopilotEvent::SessionChanged { .. }))
            .count();
        assert_eq!(changes, 2);
    }

    #[tokio::test]
    async fn test_request_carries_history_and_preamble() {
        let assistant = Arc::new(ScriptedAssistant::new(vec![
            vec![data(r#"{"chunk": "one"}"#), done()],
            vec![data(r#"{"chunk": "two"}"#), done()],
        ]));
        let store = test_store().await;
        let (controller, _events_rx) =
            ConversationController::new(store, assistant.clone(), None);

        controller
            .set_active_workflow(WorkflowKey::Workflow("wf1".to_string()))
            .await;
        controller.send_message("first").await;
        controller.send_message("second").await;

        let requests = assistant.requests.lock().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].system, SYSTEM_PREAMBLE);
        assert_eq!(requests[0].workflow_id, "wf1");
        // Second request includes the whole exchange so far, newest last.
        let roles: Vec<&str> = requests[1]
            .messages
            .iter()
            .map(|turn| turn.role.as_str())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(requests[1].messages.last().unwrap().content, "second");
    }

    #[test]
    fn test_extract_fragment_ignores_non_workflow_json() {
        let text = "Some prose\n```json\n{\"foo\": 1}\n```\nand\n```json\n{\"nodes\": [{\"name\": \"A\"}]}\n```";
        let fragment = ConversationController::extract_fragment(text).expect("second block");
        assert_eq!(fragment.nodes[0].name, "A");

        assert!(ConversationController::extract_fragment("no code here").is_none());
        assert!(ConversationController::extract_fragment("```json\n{broken\n```").is_none());
    }
}
