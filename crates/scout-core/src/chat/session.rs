//! Single-flight chat sessions.
//!
//! Only one reply streams at a time. Sending a new message cancels the
//! session in flight and finalizes its placeholder before the new one is
//! appended, so frames of two replies never interleave in the transcript.
//! Every placeholder is finalized exactly once: completed, cancelled, or
//! failed.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::history::HistoryStore;
use super::message::{ChatMessage, Conversation, CANCELLED_MARKER, DEFAULT_TITLE};
use crate::api::{ApiError, Backend, ChatFrame, ChatRequest, FrameStream};
use crate::events::{EventSink, Level, Toast, UiEvent};

/// Shown when the backend reports the same request is already being answered.
pub const DUPLICATE_MESSAGE: &str =
    "This request is already being answered. Wait for it to finish or cancel it first.";

/// Which chat transport to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPreference {
    /// Push when the backend supports it, falling back to a plain request.
    #[default]
    Auto,
    Push,
    Request,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overrides the session's default model
    pub model: Option<String>,
    pub transport: TransportPreference,
}

/// How a send ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed(ChatMessage),
    /// Superseded by another send or cancelled by the user.
    Cancelled(ChatMessage),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("{}", DUPLICATE_MESSAGE)]
    Duplicate,

    #[error("{message}")]
    Failed {
        message: String,
        trace_id: Option<String>,
    },
}

/// Why a transport attempt stopped before a clean end.
enum Interrupted {
    Transport { error: ApiError, frames: usize },
    Remote {
        message: String,
        trace_id: Option<String>,
        status: Option<u16>,
    },
}

enum Ended {
    Done,
    /// The body closed without a terminal frame; treated as complete.
    Eof,
    Cancelled,
}

enum Finish {
    Completed,
    Cancelled,
    Failed(String),
}

struct ActiveSession {
    request_id: String,
    message_id: String,
    cancel: CancellationToken,
}

struct SessionState {
    conversation: Conversation,
    active: Option<ActiveSession>,
    /// Replies finalized while their conversation was being replaced.
    detached: Vec<ChatMessage>,
}

/// Owns the transcript and the single active reply stream.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    state: Arc<Mutex<SessionState>>,
    backend: Arc<dyn Backend>,
    history: Arc<dyn HistoryStore>,
    sink: Arc<dyn EventSink>,
    push_supported: bool,
    default_model: Option<String>,
    pending_saves: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        history: Arc<dyn HistoryStore>,
        sink: Arc<dyn EventSink>,
        push_supported: bool,
        default_model: Option<String>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                conversation: Conversation::new(uuid::Uuid::new_v4().to_string()),
                active: None,
                detached: Vec::new(),
            })),
            backend,
            history,
            sink,
            push_supported,
            default_model,
            pending_saves: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Send `text` as the next user message of the current conversation and
    /// stream the reply into the transcript.
    ///
    /// Resolves once the reply is finalized. A send that gets superseded by
    /// a later one resolves with [`SendOutcome::Cancelled`].
    pub async fn send(
        &self,
        text: &str,
        options: SendOptions,
    ) -> Result<SendOutcome, SessionError> {
        let cancel = CancellationToken::new();
        let request_id = uuid::Uuid::new_v4().to_string();

        let (request, message_id) = {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.active.take() {
                previous.cancel.cancel();
                info!(request_id = %previous.request_id, "Cancelled previous chat session");
                self.finalize_locked(&mut state, &previous.message_id, Finish::Cancelled);
            }

            let user = ChatMessage::user(text);
            let placeholder = ChatMessage::placeholder();
            let message_id = placeholder.id.clone();
            let request = ChatRequest {
                messages: {
                    let mut messages = state.conversation.wire_messages();
                    messages.push(user.to_wire());
                    messages
                },
                model: options.model.clone().or_else(|| self.default_model.clone()),
                request_id: request_id.clone(),
            };

            state.conversation.messages.push(user.clone());
            state.conversation.messages.push(placeholder.clone());
            state.conversation.touch();
            state.active = Some(ActiveSession {
                request_id: request_id.clone(),
                message_id: message_id.clone(),
                cancel: cancel.clone(),
            });
            self.sink.emit(UiEvent::MessageUpdated { message: user });
            self.sink.emit(UiEvent::MessageUpdated {
                message: placeholder,
            });
            (request, message_id)
        };

        info!(request_id = %request_id, "Chat request started");
        let result = self
            .stream_reply(&request, &message_id, options.transport, &cancel)
            .await;

        let mut state = self.state.lock().await;
        if state
            .active
            .as_ref()
            .is_some_and(|a| a.request_id == request_id)
        {
            state.active = None;
        }

        match result {
            Ok(Ended::Cancelled) => {
                self.finalize_locked(&mut state, &message_id, Finish::Cancelled);
                Ok(SendOutcome::Cancelled(take_snapshot(&mut state, &message_id)))
            }
            _ if cancel.is_cancelled() => {
                // Finished while being superseded; the supersede already finalized it.
                Ok(SendOutcome::Cancelled(take_snapshot(&mut state, &message_id)))
            }
            Ok(Ended::Done) | Ok(Ended::Eof) => {
                self.finalize_locked(&mut state, &message_id, Finish::Completed);
                let message = take_snapshot(&mut state, &message_id);
                if state.conversation.title == DEFAULT_TITLE {
                    state.conversation.generate_title();
                }
                let conversation = state.conversation.clone();
                drop(state);

                info!(request_id = %request_id, "Chat reply complete");
                self.persist(conversation);
                Ok(SendOutcome::Completed(message))
            }
            Err(interrupted) => {
                let error = session_error(interrupted);
                self.finalize_locked(&mut state, &message_id, Finish::Failed(error.to_string()));
                drop(state);

                let toast = match error {
                    SessionError::Duplicate => {
                        warn!(request_id = %request_id, "Chat request rejected as duplicate");
                        Toast::new(Level::Warning, DUPLICATE_MESSAGE)
                    }
                    SessionError::Failed {
                        ref message,
                        ref trace_id,
                    } => {
                        warn!(request_id = %request_id, trace_id = ?trace_id, error = %message, "Chat request failed");
                        Toast::new(Level::Error, format!("Chat failed: {}", message))
                            .with_trace_id(trace_id.clone())
                    }
                };
                self.sink.emit(UiEvent::Toast(toast));
                Err(error)
            }
        }
    }

    /// Cancel the active session, if any.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        self.cancel_locked(&mut state).is_some()
    }

    /// Cancel and finalize the active reply, returning its message id.
    fn cancel_locked(&self, state: &mut SessionState) -> Option<String> {
        let active = state.active.take()?;
        active.cancel.cancel();
        info!(request_id = %active.request_id, "Chat session cancelled");
        self.finalize_locked(state, &active.message_id, Finish::Cancelled);
        Some(active.message_id)
    }

    /// Swap in another conversation, keeping a cancelled reply reachable for
    /// the `send` that is still waiting on it.
    async fn replace_conversation(&self, conversation: Conversation) {
        let mut state = self.state.lock().await;
        if let Some(message_id) = self.cancel_locked(&mut state) {
            if let Some(message) = state.conversation.message(&message_id).cloned() {
                state.detached.push(message);
            }
        }
        state.conversation = conversation;
    }

    pub async fn is_streaming(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Snapshot of the visible messages.
    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.state.lock().await.conversation.messages.clone()
    }

    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    /// Cancel any active reply and start an empty conversation.
    pub async fn new_conversation(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.replace_conversation(Conversation::new(id.clone())).await;
        id
    }

    /// Cancel any active reply and continue a saved conversation.
    pub async fn resume(&self, conversation: Conversation) {
        self.replace_conversation(conversation).await;
    }

    async fn stream_reply(
        &self,
        request: &ChatRequest,
        message_id: &str,
        preference: TransportPreference,
        cancel: &CancellationToken,
    ) -> Result<Ended, Interrupted> {
        let push = match preference {
            TransportPreference::Request => false,
            TransportPreference::Push => true,
            TransportPreference::Auto => self.push_supported,
        };

        let first = self.attempt(request, message_id, push, cancel).await;
        match first {
            Err(Interrupted::Transport { ref error, frames: 0 })
                if push
                    && preference == TransportPreference::Auto
                    && !error.is_duplicate()
                    && !cancel.is_cancelled() =>
            {
                warn!(request_id = %request.request_id, error = %error, "Push chat stream failed, retrying as a plain request");
                self.attempt(request, message_id, false, cancel).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        request: &ChatRequest,
        message_id: &str,
        push: bool,
        cancel: &CancellationToken,
    ) -> Result<Ended, Interrupted> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Ended::Cancelled),
            opened = async {
                if push {
                    self.backend.stream_chat(request).await
                } else {
                    self.backend.request_chat(request).await
                }
            } => opened,
        };

        let stream = opened.map_err(|error| Interrupted::Transport { error, frames: 0 })?;
        self.pump(stream, message_id, cancel).await
    }

    async fn pump(
        &self,
        mut stream: FrameStream,
        message_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Ended, Interrupted> {
        let mut frames = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Ended::Cancelled),
                next = stream.next() => next,
            };

            let raw = match next {
                None => return Ok(Ended::Eof),
                Some(Err(error)) => return Err(Interrupted::Transport { error, frames }),
                Some(Ok(raw)) => raw,
            };

            let frame: ChatFrame = match serde_json::from_str(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Ignoring unreadable chat frame");
                    continue;
                }
            };
            frames += 1;

            match frame {
                ChatFrame::Done => return Ok(Ended::Done),
                ChatFrame::Error {
                    message,
                    trace_id,
                    status,
                } => {
                    return Err(Interrupted::Remote {
                        message: message.unwrap_or_else(|| "unknown error".to_string()),
                        trace_id,
                        status,
                    });
                }
                frame => {
                    let mut state = self.state.lock().await;
                    if cancel.is_cancelled() {
                        return Ok(Ended::Cancelled);
                    }
                    if let Some(message) = state.conversation.message_mut(message_id) {
                        apply_frame(message, frame);
                        let message = message.clone();
                        self.sink.emit(UiEvent::MessageUpdated { message });
                    }
                }
            }
        }
    }

    /// Move a streaming placeholder into its terminal state. No-op for a
    /// message that is already final.
    fn finalize_locked(&self, state: &mut SessionState, message_id: &str, finish: Finish) {
        let Some(message) = state.conversation.message_mut(message_id) else {
            return;
        };
        if !message.streaming {
            return;
        }

        message.streaming = false;
        match finish {
            Finish::Completed => {}
            Finish::Cancelled => {
                message.cancelled = true;
                if message.content.is_empty() {
                    message.content = CANCELLED_MARKER.to_string();
                }
            }
            Finish::Failed(error) => message.error = Some(error),
        }
        let message = message.clone();
        self.sink.emit(UiEvent::MessageUpdated { message });
    }

    /// Wait for history saves that are still in flight.
    pub async fn flush(&self) {
        let pending = std::mem::take(
            &mut *self
                .pending_saves
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for save in pending {
            let _ = save.await;
        }
    }

    fn persist(&self, conversation: Conversation) {
        let history = self.history.clone();
        let save = tokio::spawn(async move {
            if let Err(e) = history.save(&conversation).await {
                warn!(conversation_id = %conversation.id, "Failed to save conversation: {:#}", e);
            }
        });
        let mut saves = self
            .pending_saves
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        saves.retain(|s| !s.is_finished());
        saves.push(save);
    }
}

fn apply_frame(message: &mut ChatMessage, frame: ChatFrame) {
    match frame {
        ChatFrame::Metadata { model, trace_id } => {
            if model.is_some() {
                message.model = model;
            }
            if trace_id.is_some() {
                message.trace_id = trace_id;
            }
        }
        ChatFrame::Delta {
            answer,
            reasoning,
            citations,
        } => {
            if let Some(answer) = answer {
                message.content.push_str(&answer);
            }
            if let Some(reasoning) = reasoning {
                message.reasoning.push_str(&reasoning);
            }
            for citation in citations {
                if !message.citations.contains(&citation) {
                    message.citations.push(citation);
                }
            }
        }
        ChatFrame::Done | ChatFrame::Error { .. } => {}
    }
}

fn session_error(interrupted: Interrupted) -> SessionError {
    match interrupted {
        Interrupted::Transport { error, .. } if error.is_duplicate() => SessionError::Duplicate,
        Interrupted::Remote {
            status: Some(409), ..
        } => SessionError::Duplicate,
        Interrupted::Transport { error, .. } => SessionError::Failed {
            message: error.to_string(),
            trace_id: None,
        },
        Interrupted::Remote {
            message, trace_id, ..
        } => SessionError::Failed { message, trace_id },
    }
}

fn take_snapshot(state: &mut SessionState, message_id: &str) -> ChatMessage {
    if let Some(message) = state.conversation.message(message_id) {
        return message.clone();
    }
    if let Some(index) = state.detached.iter().position(|m| m.id == message_id) {
        return state.detached.swap_remove(index);
    }
    ChatMessage::cancelled(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiResult;
    use crate::chat::{FileHistoryStore, NoHistory};
    use crate::testing::{ChatCall, ChatScript, FakeBackend, RecordingSink};
    use std::time::Duration;

    fn manager(backend: Arc<FakeBackend>, sink: Arc<RecordingSink>) -> SessionManager {
        SessionManager::new(backend, Arc::new(NoHistory), sink, true, None)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn delta(text: &str) -> ApiResult<String> {
        Ok(serde_json::json!({"type": "delta", "answer": text}).to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_reply_into_transcript() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Frames(vec![
            Ok(r#"{"type":"metadata","model":"m-1","traceId":"t-1"}"#.to_string()),
            delta("Hello"),
            Ok(r#"{"type":"delta","answer":"","reasoning":"thinking"}"#.to_string()),
            Ok("not json".to_string()),
            delta(" world"),
            Ok(r#"{"type":"delta","citations":[{"url":"https://a.test","title":"A"}]}"#.to_string()),
            Ok(r#"{"type":"complete"}"#.to_string()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend.clone(), sink);

        let outcome = manager.send("hi", SendOptions::default()).await.unwrap();
        let SendOutcome::Completed(reply) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(reply.content, "Hello world");
        assert_eq!(reply.reasoning, "thinking");
        assert_eq!(reply.model.as_deref(), Some("m-1"));
        assert_eq!(reply.trace_id.as_deref(), Some("t-1"));
        assert_eq!(reply.citations.len(), 1);
        assert!(!reply.streaming);

        let transcript = manager.transcript().await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "hi");
        assert!(!manager.is_streaming().await);

        let calls = backend.chat_calls();
        assert_eq!(calls, vec![ChatCall::Push]);
        let request = backend.last_chat_request().unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content, "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_send_cancels_previous_before_new_content() {
        let backend = Arc::new(FakeBackend::default());
        let first_tx = backend.chat_channel();
        backend.chat_script(ChatScript::Frames(vec![
            delta("second answer"),
            Ok(r#"{"type":"done"}"#.to_string()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend.clone(), sink.clone());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send("first", SendOptions::default()).await })
        };
        settle().await;
        first_tx.send(delta("partial")).await.unwrap();
        settle().await;

        let second = manager.send("second", SendOptions::default()).await.unwrap();
        assert!(matches!(second, SendOutcome::Completed(ref m) if m.content == "second answer"));

        let first = first.await.unwrap().unwrap();
        let SendOutcome::Cancelled(first_reply) = first else {
            panic!("expected cancellation");
        };
        assert_eq!(first_reply.content, "partial");
        assert!(first_reply.cancelled);

        // Late frames of the superseded stream are dropped.
        let _ = first_tx.send(delta(" more")).await;
        settle().await;

        let transcript = manager.transcript().await;
        let contents: Vec<_> = transcript.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "partial", "second", "second answer"]);
        assert!(transcript.iter().all(|m| !m.streaming));

        // The first reply was finalized before any content of the second arrived.
        let events = sink.message_updates();
        let finalized = events
            .iter()
            .position(|m| m.id == first_reply.id && !m.streaming)
            .unwrap();
        let second_content = events
            .iter()
            .position(|m| m.content == "second answer")
            .unwrap();
        assert!(finalized < second_content);

        // The partial reply is not sent back as context.
        let request = backend.last_chat_request().unwrap();
        let wire: Vec<_> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(wire, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_marks_empty_reply() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Pending);
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend, sink.clone());

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send("hi", SendOptions::default()).await })
        };
        settle().await;
        assert!(manager.is_streaming().await);
        assert!(manager.cancel().await);

        let outcome = task.await.unwrap().unwrap();
        let SendOutcome::Cancelled(reply) = outcome else {
            panic!("expected cancellation");
        };
        assert_eq!(reply.content, CANCELLED_MARKER);
        assert!(reply.error.is_none());
        assert!(sink.toasts().is_empty());
        assert!(!manager.cancel().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_conversation_settles_interrupted_reply() {
        let backend = Arc::new(FakeBackend::default());
        let reply_tx = backend.chat_channel();
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend, sink);

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send("hi", SendOptions::default()).await })
        };
        settle().await;
        reply_tx.send(delta("partial")).await.unwrap();
        settle().await;

        manager.new_conversation().await;

        let outcome = task.await.unwrap().unwrap();
        let SendOutcome::Cancelled(reply) = outcome else {
            panic!("expected cancellation");
        };
        assert!(!reply.streaming);
        assert!(reply.cancelled);
        assert_eq!(reply.content, "partial");
        assert!(manager.transcript().await.is_empty());
        assert!(!manager.is_streaming().await);
    }

    #[tokio::test]
    async fn test_flush_waits_even_after_poisoned_lock() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let manager = manager(
            Arc::new(FakeBackend::default()),
            Arc::new(RecordingSink::default()),
        );
        let saved = Arc::new(AtomicBool::new(false));
        let save = {
            let saved = saved.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                saved.store(true, Ordering::SeqCst);
            })
        };

        let saves = manager.pending_saves.clone();
        let _ = std::thread::spawn(move || {
            let mut saves = saves.lock().unwrap();
            saves.push(save);
            panic!("writer died while holding the lock");
        })
        .join();
        assert!(manager.pending_saves.is_poisoned());

        manager.flush().await;
        assert!(saved.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_request_is_not_retried() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Fail(ApiError::from_status(
            409,
            r#"{"detail":"request in progress"}"#,
        )));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend.clone(), sink.clone());

        let err = manager.send("hi", SendOptions::default()).await.unwrap_err();
        assert_eq!(err, SessionError::Duplicate);
        assert_eq!(backend.chat_calls(), vec![ChatCall::Push]);

        let toasts = sink.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, Level::Warning);
        assert_eq!(toasts[0].message, DUPLICATE_MESSAGE);

        let transcript = manager.transcript().await;
        assert!(!transcript[1].streaming);
        assert!(transcript[1].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_failure_falls_back_to_request() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Fail(ApiError::transport("connection refused")));
        backend.chat_script(ChatScript::Frames(vec![delta("fallback"), delta(" works")]));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend.clone(), sink);

        let outcome = manager.send("hi", SendOptions::default()).await.unwrap();
        // End of body without a terminal frame counts as complete.
        assert!(matches!(outcome, SendOutcome::Completed(ref m) if m.content == "fallback works"));
        assert_eq!(backend.chat_calls(), vec![ChatCall::Push, ChatCall::Request]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fallback_after_frames_or_when_forced() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Frames(vec![
            delta("partial"),
            Err(ApiError::transport("reset")),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend.clone(), sink);

        let err = manager.send("hi", SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::Failed { .. }));

        backend.chat_script(ChatScript::Fail(ApiError::transport("refused")));
        let forced = SendOptions {
            transport: TransportPreference::Push,
            ..Default::default()
        };
        assert!(manager.send("again", forced).await.is_err());
        assert_eq!(backend.chat_calls(), vec![ChatCall::Push, ChatCall::Push]);

        let transcript = manager.transcript().await;
        assert_eq!(transcript[1].content, "partial");
        assert!(transcript.iter().all(|m| !m.streaming));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_transport_when_push_unsupported() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Frames(vec![
            delta("ok"),
            Ok(r#"{"type":"done"}"#.to_string()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let manager = SessionManager::new(
            backend.clone(),
            Arc::new(NoHistory),
            sink,
            false,
            Some("default-model".to_string()),
        );

        manager.send("hi", SendOptions::default()).await.unwrap();
        assert_eq!(backend.chat_calls(), vec![ChatCall::Request]);
        assert_eq!(
            backend.last_chat_request().unwrap().model.as_deref(),
            Some("default-model")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_frame_carries_trace_id() {
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Frames(vec![Ok(
            r#"{"type":"error","message":"model overloaded","trace_id":"t-9"}"#.to_string(),
        )]));
        let sink = Arc::new(RecordingSink::default());
        let manager = manager(backend, sink.clone());

        let err = manager.send("hi", SendOptions::default()).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Failed {
                message: "model overloaded".to_string(),
                trace_id: Some("t-9".to_string()),
            }
        );
        let toasts = sink.toasts();
        assert_eq!(toasts[0].trace_id.as_deref(), Some("t-9"));
        assert_eq!(toasts[0].message, "Chat failed: model overloaded");
    }

    #[tokio::test]
    async fn test_completed_conversation_is_saved() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileHistoryStore::new(temp_dir.path()));
        let backend = Arc::new(FakeBackend::default());
        backend.chat_script(ChatScript::Frames(vec![
            delta("answer"),
            Ok(r#"{"type":"done"}"#.to_string()),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let manager = SessionManager::new(backend, store.clone(), sink, true, None);

        manager.send("Where is the changelog?", SendOptions::default()).await.unwrap();

        manager.flush().await;

        let id = manager.conversation().await.id;
        let saved = store.load(&id).await.unwrap().unwrap();
        assert_eq!(saved.title, "Where is the changelog?");
        assert_eq!(saved.messages.len(), 2);

        let fresh = manager.new_conversation().await;
        assert_ne!(fresh, id);
        assert!(manager.transcript().await.is_empty());
    }
}
