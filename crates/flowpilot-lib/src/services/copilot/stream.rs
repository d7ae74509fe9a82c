// Streaming response consumer
//
// Reads an incrementally delivered assistant reply and turns it into ordered
// update events plus a final accumulated text. Handles:
// - Line framing (`data: ` marker, `[DONE]` terminator)
// - Ordered partial-text updates
// - Cancellation via the stream manager
// - Skipping malformed frames without aborting the stream

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::event::CopilotEvent;
use crate::services::assistant::LineStream;
use crate::services::error::CopilotError;

/// Marker prefixing every event line.
const DATA_PREFIX: &str = "data: ";
/// Reserved payload signalling normal end-of-stream. Never content.
const DONE_MARKER: &str = "[DONE]";

/// One parsed event frame.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    chunk: Option<String>,
    session_id: Option<String>,
}

/// What a finished (non-cancelled) stream produced.
#[derive(Debug)]
pub struct StreamOutcome {
    /// Fully accumulated reply text
    pub text: String,
    /// Conversation id reported by the backend, if any frame carried one
    pub session_id: Option<String>,
    /// Set when the source failed instead of completing
    pub error: Option<CopilotError>,
}

struct ActiveStream {
    id: String,
    cancel_tx: mpsc::Sender<()>,
}

/// Tracks the one stream that may be active at a time.
///
/// Starting a new stream cancels the previous one first; cancelling an
/// already-finished stream is a no-op.
pub struct StreamManager {
    active: Arc<RwLock<Option<ActiveStream>>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a new stream, cancelling any prior one.
    /// Returns (stream_id, cancel_receiver).
    pub async fn begin(&self) -> (String, mpsc::Receiver<()>) {
        let stream_id = format!("stream_{}", Uuid::new_v4().to_string().replace('-', ""));
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let mut active = self.active.write().await;
        if let Some(prior) = active.take() {
            log::debug!("replacing active stream {}", prior.id);
            let _ = prior.cancel_tx.try_send(());
        }
        *active = Some(ActiveStream {
            id: stream_id.clone(),
            cancel_tx,
        });

        (stream_id, cancel_rx)
    }

    /// Cancel the stream with `stream_id`. Returns whether it was still
    /// active; cancelling a finished or unknown stream does nothing.
    pub async fn cancel(&self, stream_id: &str) -> bool {
        let mut active = self.active.write().await;
        let is_current = active.as_ref().map(|s| s.id == stream_id).unwrap_or(false);
        if !is_current {
            return false;
        }
        if let Some(current) = active.take() {
            let _ = current.cancel_tx.try_send(());
        }
        true
    }

    /// Cancel whichever stream is active, if any.
    pub async fn cancel_active(&self) -> bool {
        let id = self.active.read().await.as_ref().map(|s| s.id.clone());
        match id {
            Some(id) => self.cancel(&id).await,
            None => false,
        }
    }

    /// Mark `stream_id` finished, releasing the slot if it still holds it.
    pub async fn finish(&self, stream_id: &str) {
        let mut active = self.active.write().await;
        if active.as_ref().map(|s| s.id.as_str()) == Some(stream_id) {
            *active = None;
        }
    }

    pub async fn has_active(&self) -> bool {
        self.active.read().await.is_some()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume a framed line stream to completion.
///
/// Emits an ordered `StreamUpdate` per content chunk carrying the accumulated
/// partial text. Returns `None` when cancelled (no further events are emitted
/// for the stream), otherwise the final outcome. Malformed frames are skipped;
/// only a failed source ends the stream with an error.
pub async fn consume(
    stream_id: &str,
    mut lines: LineStream,
    mut cancel_rx: mpsc::Receiver<()>,
    events: &mpsc::UnboundedSender<CopilotEvent>,
) -> Option<StreamOutcome> {
    let mut text = String::new();
    let mut session_id: Option<String> = None;

    loop {
        tokio::select! {
            // Prefer the cancel signal when both are ready.
            biased;

            _ = cancel_rx.recv() => {
                log::debug!("stream {} cancelled", stream_id);
                return None;
            }

            item = lines.next() => match item {
                // Source ended without a terminator; treat what arrived as the
                // complete reply.
                None => break,
                Some(Ok(line)) => {
                    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == DONE_MARKER {
                        break;
                    }
                    match serde_json::from_str::<StreamFrame>(payload) {
                        Ok(frame) => {
                            if let Some(sid) = frame.session_id {
                                session_id = Some(sid);
                            }
                            if let Some(chunk) = frame.chunk {
                                text.push_str(&chunk);
                                let _ = events.send(CopilotEvent::StreamUpdate {
                                    stream_id: stream_id.to_string(),
                                    text: text.clone(),
                                });
                            }
                        }
                        Err(err) => {
                            log::debug!("skipping malformed stream frame: {}", err);
                        }
                    }
                }
                Some(Err(err)) => {
                    return Some(StreamOutcome {
                        text,
                        session_id,
                        error: Some(err),
                    });
                }
            }
        }
    }

    Some(StreamOutcome {
        text,
        session_id,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::error::CopilotResult;

    fn line_stream(lines: Vec<CopilotResult<String>>) -> LineStream {
        Box::pin(futures::stream::iter(lines))
    }

    fn data(json: &str) -> CopilotResult<String> {
        Ok(format!("data: {}", json))
    }

    #[tokio::test]
    async fn test_chunks_accumulate_in_order() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let lines = line_stream(vec![
            data(r#"{"chunk": "He"}"#),
            data(r#"{"chunk": "llo"}"#),
            Ok("data: [DONE]".to_string()),
        ]);

        let outcome = consume(&id, lines, cancel_rx, &tx).await.expect("completed");
        assert_eq!(outcome.text, "Hello");
        assert!(outcome.error.is_none());

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(
            first,
            CopilotEvent::StreamUpdate {
                stream_id: id.clone(),
                text: "He".to_string()
            }
        );
        assert_eq!(
            second,
            CopilotEvent::StreamUpdate {
                stream_id: id.clone(),
                text: "Hello".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_done_marker_is_not_content() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let lines = line_stream(vec![
            data(r#"{"chunk": "hi"}"#),
            Ok("data: [DONE]".to_string()),
            // Anything after the terminator must not be read as content.
            data(r#"{"chunk": "ignored"}"#),
        ]);

        let outcome = consume(&id, lines, cancel_rx, &tx).await.expect("completed");
        assert_eq!(outcome.text, "hi");
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let lines = line_stream(vec![
            data(r#"{"chunk": "a"}"#),
            Ok("data: {broken json".to_string()),
            Ok(": keep-alive comment".to_string()),
            data(r#"{"chunk": "b"}"#),
            Ok("data: [DONE]".to_string()),
        ]);

        let outcome = consume(&id, lines, cancel_rx, &tx).await.expect("completed");
        assert_eq!(outcome.text, "ab");

        let mut updates = 0;
        while rx.try_recv().is_ok() {
            updates += 1;
        }
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_session_id_is_captured() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let lines = line_stream(vec![
            data(r#"{"session_id": "conv-1"}"#),
            data(r#"{"chunk": "hi"}"#),
            Ok("data: [DONE]".to_string()),
        ]);

        let outcome = consume(&id, lines, cancel_rx, &tx).await.expect("completed");
        assert_eq!(outcome.session_id.as_deref(), Some("conv-1"));
    }

    #[tokio::test]
    async fn test_source_error_reported_not_thrown() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let lines = line_stream(vec![
            data(r#"{"chunk": "partial"}"#),
            Err(CopilotError::ConnectionFailed("reset".to_string())),
        ]);

        let outcome = consume(&id, lines, cancel_rx, &tx).await.expect("outcome");
        assert_eq!(outcome.text, "partial");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_cancel_suppresses_further_events() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        // A channel-fed source lets the test control pacing.
        let (line_tx, line_rx) = mpsc::unbounded_channel::<CopilotResult<String>>();
        let lines: LineStream = Box::pin(futures::stream::unfold(line_rx, |mut rx| async {
            rx.recv().await.map(|line| (line, rx))
        }));

        let consumer = {
            let id = id.clone();
            tokio::spawn(async move { consume(&id, lines, cancel_rx, &events_tx).await })
        };

        line_tx.send(data(r#"{"chunk": "He"}"#)).unwrap();
        let first = events_rx.recv().await.unwrap();
        assert!(matches!(first, CopilotEvent::StreamUpdate { ref text, .. } if text == "He"));

        assert!(manager.cancel(&id).await);
        line_tx.send(data(r#"{"chunk": "llo"}"#)).unwrap();
        drop(line_tx);

        let outcome = consumer.await.unwrap();
        assert!(outcome.is_none());
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_safe() {
        let manager = StreamManager::new();
        let (id, cancel_rx) = manager.begin().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let lines = line_stream(vec![Ok("data: [DONE]".to_string())]);
        consume(&id, lines, cancel_rx, &tx).await.expect("completed");
        manager.finish(&id).await;

        assert!(!manager.cancel(&id).await);
        assert!(!manager.cancel("stream_nonexistent").await);
    }

    #[tokio::test]
    async fn test_begin_replaces_prior_stream() {
        let manager = StreamManager::new();
        let (first_id, mut first_cancel) = manager.begin().await;
        let (second_id, _second_cancel) = manager.begin().await;

        assert_ne!(first_id, second_id);
        // The first stream received a cancel signal when replaced.
        assert!(first_cancel.try_recv().is_ok());
        assert!(manager.has_active().await);

        manager.finish(&second_id).await;
        assert!(!manager.has_active().await);
    }
}
