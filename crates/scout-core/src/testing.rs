//! In-memory backend and event sink for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::{
    ApiError, ApiResult, Backend, ChatRequest, CrawlRequest, FrameStream, ShadowIndexRequest,
    ShadowState, ShadowStatus,
};
use crate::chat::ChatMessage;
use crate::events::{EventSink, LogEntry, Toast, UiEvent};
use crate::jobs::JobStatusSummary;

enum PushScript {
    Frames(Vec<ApiResult<String>>),
    Error(ApiError),
    Channel(mpsc::Receiver<ApiResult<String>>),
}

/// Scripted response of one chat call.
pub enum ChatScript {
    Frames(Vec<ApiResult<String>>),
    Channel(mpsc::Receiver<ApiResult<String>>),
    Fail(ApiError),
    /// Opens but never yields a frame.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCall {
    Push,
    Request,
}

#[derive(Default)]
struct FakeState {
    crawl_jobs: VecDeque<ApiResult<Option<String>>>,
    crawl_requests: Vec<CrawlRequest>,
    push: HashMap<String, PushScript>,
    stream_opens: HashMap<String, usize>,
    polls: HashMap<String, VecDeque<ApiResult<Value>>>,
    status_requests: HashMap<String, usize>,
    visits: Vec<String>,
    fail_visits: bool,
    shadow_jobs: HashMap<String, Option<String>>,
    shadow_requests: Vec<ShadowIndexRequest>,
    shadow_statuses: HashMap<String, VecDeque<ApiResult<ShadowStatus>>>,
    shadow_status_requests: HashMap<String, usize>,
    shadow_status_delay: Duration,
    chat: VecDeque<ChatScript>,
    chat_calls: Vec<ChatCall>,
    chat_requests: Vec<ChatRequest>,
}

/// Scripted [`Backend`]. Unscripted calls behave like a healthy backend that
/// never finishes: progress streams stay open, status polls answer `running`.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn crawl_job(&self, job_id: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .crawl_jobs
            .push_back(Ok(job_id.map(str::to_string)));
    }

    pub fn crawl_error(&self, error: ApiError) {
        self.state.lock().unwrap().crawl_jobs.push_back(Err(error));
    }

    pub fn crawl_requests(&self) -> Vec<CrawlRequest> {
        self.state.lock().unwrap().crawl_requests.clone()
    }

    pub fn push_frames(&self, job_id: &str, frames: Vec<ApiResult<String>>) {
        self.state
            .lock()
            .unwrap()
            .push
            .insert(job_id.to_string(), PushScript::Frames(frames));
    }

    pub fn push_error(&self, job_id: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .push
            .insert(job_id.to_string(), PushScript::Error(error));
    }

    /// Push stream fed by the returned sender; closes when it is dropped.
    pub fn push_channel(&self, job_id: &str) -> mpsc::Sender<ApiResult<String>> {
        let (tx, rx) = mpsc::channel(16);
        self.state
            .lock()
            .unwrap()
            .push
            .insert(job_id.to_string(), PushScript::Channel(rx));
        tx
    }

    pub fn stream_opens(&self, job_id: &str) -> usize {
        count(&self.state.lock().unwrap().stream_opens, job_id)
    }

    pub fn poll_responses(&self, job_id: &str, responses: Vec<ApiResult<Value>>) {
        self.state
            .lock()
            .unwrap()
            .polls
            .insert(job_id.to_string(), responses.into());
    }

    pub fn status_requests(&self, job_id: &str) -> usize {
        count(&self.state.lock().unwrap().status_requests, job_id)
    }

    pub fn fail_visits(&self) {
        self.state.lock().unwrap().fail_visits = true;
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    /// Job id returned when `url` is queued for shadow indexing.
    pub fn shadow_job(&self, url: &str, job_id: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .shadow_jobs
            .insert(url.to_string(), job_id.map(str::to_string));
    }

    pub fn shadow_statuses(&self, job_id: &str, statuses: Vec<ApiResult<ShadowStatus>>) {
        self.state
            .lock()
            .unwrap()
            .shadow_statuses
            .insert(job_id.to_string(), statuses.into());
    }

    /// Every shadow status request takes this long to answer.
    pub fn shadow_status_delay(&self, delay: Duration) {
        self.state.lock().unwrap().shadow_status_delay = delay;
    }

    pub fn shadow_status_requests(&self, job_id: &str) -> usize {
        count(&self.state.lock().unwrap().shadow_status_requests, job_id)
    }

    pub fn shadow_queue_requests(&self) -> Vec<ShadowIndexRequest> {
        self.state.lock().unwrap().shadow_requests.clone()
    }

    /// Queue the response of the next chat call, whichever transport it uses.
    pub fn chat_script(&self, script: ChatScript) {
        self.state.lock().unwrap().chat.push_back(script);
    }

    pub fn chat_channel(&self) -> mpsc::Sender<ApiResult<String>> {
        let (tx, rx) = mpsc::channel(16);
        self.chat_script(ChatScript::Channel(rx));
        tx
    }

    pub fn chat_calls(&self) -> Vec<ChatCall> {
        self.state.lock().unwrap().chat_calls.clone()
    }

    pub fn last_chat_request(&self) -> Option<ChatRequest> {
        self.state.lock().unwrap().chat_requests.last().cloned()
    }

    fn chat(&self, call: ChatCall, request: &ChatRequest) -> ApiResult<FrameStream> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.chat_calls.push(call);
            state.chat_requests.push(request.clone());
            state.chat.pop_front().unwrap_or(ChatScript::Pending)
        };
        match script {
            ChatScript::Frames(frames) => Ok(stream::iter(frames).boxed()),
            ChatScript::Channel(rx) => Ok(ReceiverStream::new(rx).boxed()),
            ChatScript::Fail(error) => Err(error),
            ChatScript::Pending => Ok(stream::pending().boxed()),
        }
    }
}

fn count(counts: &HashMap<String, usize>, key: &str) -> usize {
    counts.get(key).copied().unwrap_or(0)
}

fn bump(counts: &mut HashMap<String, usize>, key: &str) {
    *counts.entry(key.to_string()).or_default() += 1;
}

#[async_trait]
impl Backend for FakeBackend {
    async fn enqueue_crawl(&self, request: &CrawlRequest) -> ApiResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.crawl_requests.push(request.clone());
        state.crawl_jobs.pop_front().unwrap_or(Ok(None))
    }

    async fn progress_stream(&self, job_id: &str) -> ApiResult<FrameStream> {
        let mut state = self.state.lock().unwrap();
        bump(&mut state.stream_opens, job_id);
        match state.push.remove(job_id) {
            Some(PushScript::Frames(frames)) => Ok(stream::iter(frames).boxed()),
            Some(PushScript::Error(error)) => Err(error),
            Some(PushScript::Channel(rx)) => Ok(ReceiverStream::new(rx).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn crawl_status(&self, job_id: &str) -> ApiResult<Value> {
        let mut state = self.state.lock().unwrap();
        bump(&mut state.status_requests, job_id);
        state
            .polls
            .get_mut(job_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(json!({"phase": "running"})))
    }

    async fn record_visit(&self, url: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.visits.push(url.to_string());
        if state.fail_visits {
            Err(ApiError::transport("visit endpoint down"))
        } else {
            Ok(())
        }
    }

    async fn queue_shadow_index(
        &self,
        request: &ShadowIndexRequest,
    ) -> ApiResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.shadow_requests.push(request.clone());
        Ok(state.shadow_jobs.get(&request.url).cloned().flatten())
    }

    async fn shadow_status(&self, job_id: &str) -> ApiResult<ShadowStatus> {
        let (response, delay) = {
            let mut state = self.state.lock().unwrap();
            bump(&mut state.shadow_status_requests, job_id);
            let response = state
                .shadow_statuses
                .get_mut(job_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Ok(ShadowStatus {
                        state: ShadowState::Running,
                        title: None,
                        chunks: None,
                        error: None,
                        error_kind: None,
                    })
                });
            (response, state.shadow_status_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }

    async fn stream_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream> {
        self.chat(ChatCall::Push, request)
    }

    async fn request_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream> {
        self.chat(ChatCall::Request, request)
    }
}

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Toast(toast) => Some(toast),
                _ => None,
            })
            .collect()
    }

    pub fn toast_messages(&self) -> Vec<String> {
        self.toasts().into_iter().map(|t| t.message).collect()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Log(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    pub fn job_updates(&self) -> Vec<JobStatusSummary> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::JobUpdated { summary } => Some(summary),
                _ => None,
            })
            .collect()
    }

    pub fn message_updates(&self) -> Vec<ChatMessage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::MessageUpdated { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: UiEvent) {
        self.events.lock().unwrap().push(event);
    }
}
