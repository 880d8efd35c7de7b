//! `AgentSession` — one streaming conversation with one remote model.
//!
//! Drives the `MessageQueue` → `ModelClient` → callbacks pipeline. The
//! callback trait (`SessionCallbacks`) gives every method a no-op async
//! default, so a consumer only overrides what it cares about.

use crate::client::{AssistantContent, ContentBlockStart, ModelClient, ModelEvent, RunOptions, StreamDelta};
use crate::error::{CoreError, Result};
use crate::model::{AgentStatus, ModelTier, Priority};
use crate::queue::{InputItem, MessageQueue};
use crate::smart_queue::{InjectionRule, SmartMessageQueue};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Callback interface emitted by `AgentSession`, one method per stream-event
/// family translation. All methods default to no-ops.
#[async_trait]
pub trait SessionCallbacks: Send + Sync {
    async fn on_text_chunk(&self, _text: &str) {}
    async fn on_thinking_start(&self, _block_index: usize) {}
    async fn on_thinking_chunk(&self, _block_index: usize, _delta: &str) {}
    async fn on_tool_use_start(&self, _id: &str, _name: &str, _input: &Value, _stream_index: usize) {}
    async fn on_tool_input_delta(&self, _tool_use_id: &str, _index: usize, _delta: &str) {}
    async fn on_tool_result_start(&self, _tool_use_id: &str, _content: &str, _is_error: bool) {}
    async fn on_tool_result_complete(&self, _tool_use_id: &str, _content: &str, _is_error: bool) {}
    async fn on_content_block_stop(&self, _index: usize, _tool_id: Option<&str>) {}
    async fn on_message_complete(&self) {}
    async fn on_message_stopped(&self) {}
    async fn on_error(&self, _error: &CoreError) {}
    async fn on_session_init(&self, _session_id: &str, _resumed: bool, _model: &str, _model_display: &str) {}
    async fn on_debug(&self, _message: &str) {}
}

/// Construction options for one `AgentSession`.
pub struct AgentSessionConfig {
    pub model_tier: ModelTier,
    pub model: String,
    pub resume_session_id: Option<String>,
    pub run_options: RunOptions,
}

/// The input side of a session: either the plain single-consumer
/// `MessageQueue`, or a `SmartMessageQueue` for priority bands and
/// auto-injection. Picked at construction; `AgentSession` itself is
/// agnostic to which one feeds it.
enum Queue {
    Plain {
        queue: Arc<MessageQueue<String>>,
        receiver: Mutex<Option<mpsc::UnboundedReceiver<InputItem<String>>>>,
    },
    Smart(Arc<SmartMessageQueue>),
}

impl Queue {
    fn plain() -> Self {
        let mut queue = MessageQueue::new();
        let receiver = queue.take_receiver().expect("freshly constructed queue always has a receiver");
        Queue::Plain { queue: Arc::new(queue), receiver: Mutex::new(Some(receiver)) }
    }

    fn smart(rules: Vec<InjectionRule>) -> Self {
        Queue::Smart(Arc::new(SmartMessageQueue::new(rules)))
    }

    async fn send(&self, payload: String) -> Result<()> {
        match self {
            Queue::Plain { queue, .. } => queue.enqueue(payload).await,
            Queue::Smart(q) => {
                let ack = q.enqueue(Priority::Normal, payload).await?;
                ack.await.map_err(|_| CoreError::Aborted)
            }
        }
    }

    /// Build the lazy `String` stream an `AgentSession`'s stream loop
    /// drives; acknowledges each item as soon as it is handed off.
    async fn build_stream(&self) -> Result<BoxStream<'static, String>> {
        match self {
            Queue::Plain { receiver, .. } => {
                let rx = receiver
                    .lock()
                    .await
                    .take()
                    .ok_or_else(|| CoreError::Internal("stream already consumed".to_string()))?;
                Ok(stream_from_receiver(rx))
            }
            Queue::Smart(q) => {
                let q = q.clone();
                Ok(Box::pin(futures_util::stream::unfold(q, |q| async move {
                    let item = q.next().await?;
                    let payload = item.payload.clone();
                    item.ack();
                    Some((payload, q))
                })))
            }
        }
    }

    async fn abort(&self) {
        match self {
            Queue::Plain { queue, .. } => queue.abort(),
            Queue::Smart(q) => q.abort().await,
        }
    }
}

/// One per-session streaming state machine: IDLE → RUNNING → DONE/ERROR, no
/// resurrection.
pub struct AgentSession {
    id: String,
    status: Arc<RwLock<AgentStatus>>,
    session_id: Arc<RwLock<String>>,
    current_model: Arc<RwLock<String>>,
    queue: Queue,
    client: Arc<dyn ModelClient>,
    callbacks: Arc<dyn SessionCallbacks>,
    cancel: CancellationToken,
    interrupting: Arc<AtomicBool>,
    resume_session_id: Option<String>,
    base_run_options: RunOptions,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentSession {
    pub fn new(
        id: impl Into<String>,
        client: Arc<dyn ModelClient>,
        callbacks: Arc<dyn SessionCallbacks>,
        config: AgentSessionConfig,
    ) -> Self {
        Self::with_queue(id, client, callbacks, config, Queue::plain())
    }

    /// Same as `new`, but fed by a `SmartMessageQueue` (priority bands +
    /// auto-injection) instead of the plain FIFO queue.
    pub fn with_smart_queue(
        id: impl Into<String>,
        client: Arc<dyn ModelClient>,
        callbacks: Arc<dyn SessionCallbacks>,
        config: AgentSessionConfig,
        injection_rules: Vec<InjectionRule>,
    ) -> Self {
        Self::with_queue(id, client, callbacks, config, Queue::smart(injection_rules))
    }

    fn with_queue(
        id: impl Into<String>,
        client: Arc<dyn ModelClient>,
        callbacks: Arc<dyn SessionCallbacks>,
        config: AgentSessionConfig,
        queue: Queue,
    ) -> Self {
        let initial_session_id = config
            .resume_session_id
            .clone()
            .unwrap_or_else(|| format!("sess-{}", uuid::Uuid::new_v4()));
        Self {
            id: id.into(),
            status: Arc::new(RwLock::new(AgentStatus::Idle)),
            session_id: Arc::new(RwLock::new(initial_session_id)),
            current_model: Arc::new(RwLock::new(config.model)),
            queue,
            client,
            callbacks,
            cancel: CancellationToken::new(),
            interrupting: Arc::new(AtomicBool::new(false)),
            resume_session_id: config.resume_session_id,
            base_run_options: config.run_options,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.read().await
    }

    pub async fn session_id(&self) -> String {
        self.session_id.read().await.clone()
    }

    /// Begin the stream loop. Errors if the session isn't IDLE; never
    /// retries or restarts a previously-run session.
    pub async fn start(&self) -> Result<()> {
        {
            let mut status = self.status.write().await;
            if *status != AgentStatus::Idle {
                return Err(CoreError::Internal("session already started".to_string()));
            }
            *status = AgentStatus::Running;
        }

        let input_stream = self.queue.build_stream().await?;

        let client = self.client.clone();
        let callbacks = self.callbacks.clone();
        let status = self.status.clone();
        let session_id_lock = self.session_id.clone();
        let current_model = self.current_model.clone();
        let model_display = self.client.model_display().to_string();
        let resumed = self.resume_session_id.is_some();
        let cancel = self.cancel.clone();

        let mut options = self.base_run_options.clone();
        options.model = self.current_model.read().await.clone();
        options.resume = self.resume_session_id.clone();

        let handle = tokio::spawn(async move {
            let stream_result = tokio::select! {
                r = client.run(options, input_stream) => r,
                _ = cancel.cancelled() => {
                    *status.write().await = AgentStatus::Done;
                    return;
                }
            };

            let mut events = match stream_result {
                Ok(events) => events,
                Err(err) => {
                    callbacks.on_error(&CoreError::ModelTransport(err)).await;
                    *status.write().await = AgentStatus::Error;
                    return;
                }
            };

            let mut index_to_tool_use_id: HashMap<usize, String> = HashMap::new();

            loop {
                let next = tokio::select! {
                    next = events.next() => next,
                    _ = cancel.cancelled() => {
                        *status.write().await = AgentStatus::Done;
                        return;
                    }
                };
                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(err)) => {
                        callbacks.on_error(&CoreError::ModelTransport(err)).await;
                        *status.write().await = AgentStatus::Error;
                        return;
                    }
                    None => {
                        // Stream closed without an explicit `Result` event;
                        // treat as a message-stopped terminal.
                        callbacks.on_message_stopped().await;
                        *status.write().await = AgentStatus::Done;
                        return;
                    }
                };

                match event {
                    ModelEvent::ContentBlockDelta { index, delta } => match delta {
                        StreamDelta::Text(text) => callbacks.on_text_chunk(&text).await,
                        StreamDelta::Thinking(text) => callbacks.on_thinking_chunk(index, &text).await,
                        StreamDelta::PartialJson(fragment) => {
                            let tool_use_id = index_to_tool_use_id.get(&index).cloned().unwrap_or_default();
                            callbacks.on_tool_input_delta(&tool_use_id, index, &fragment).await
                        }
                    },
                    ModelEvent::ContentBlockStart { index, block } => match block {
                        ContentBlockStart::Text => {}
                        ContentBlockStart::Thinking => callbacks.on_thinking_start(index).await,
                        ContentBlockStart::ToolUse { id, name, input } => {
                            index_to_tool_use_id.insert(index, id.clone());
                            callbacks.on_tool_use_start(&id, &name, &input, index).await;
                        }
                        ContentBlockStart::ToolResult { tool_use_id, content, is_error } => {
                            let content_str = stringify_content(&content);
                            callbacks.on_tool_result_start(&tool_use_id, &content_str, is_error).await;
                        }
                    },
                    ModelEvent::ContentBlockStop { index } => {
                        let tool_id = index_to_tool_use_id.get(&index).cloned();
                        callbacks.on_content_block_stop(index, tool_id.as_deref()).await;
                    }
                    ModelEvent::Assistant { content } => {
                        for item in content {
                            if let AssistantContent::ToolResult { tool_use_id, content, is_error } = item {
                                let content_str = stringify_content(&content);
                                callbacks.on_tool_result_complete(&tool_use_id, &content_str, is_error).await;
                            }
                        }
                    }
                    ModelEvent::Result => {
                        index_to_tool_use_id.clear();
                        callbacks.on_message_complete().await;
                        *status.write().await = AgentStatus::Done;
                        return;
                    }
                    ModelEvent::SystemInit { session_id } => {
                        *session_id_lock.write().await = session_id.clone();
                        let model = current_model.read().await.clone();
                        callbacks.on_session_init(&session_id, resumed, &model, &model_display).await;
                    }
                }
            }
        });

        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Enqueue a user message. Fails with `NotActive` unless RUNNING.
    pub async fn send(&self, payload: impl Into<String>) -> Result<()> {
        if *self.status.read().await != AgentStatus::Running {
            return Err(CoreError::NotActive);
        }
        self.queue.send(payload.into()).await
    }

    /// Soft-cancel the current response. Coalesced via `interrupting`: a
    /// second concurrent call while one is in flight still returns `true`
    /// without issuing a second `request_stop`.
    pub async fn interrupt(&self) -> bool {
        if *self.status.read().await != AgentStatus::Running {
            return false;
        }
        if self.interrupting.swap(true, Ordering::SeqCst) {
            return true;
        }
        let result = self.client.request_stop().await;
        self.interrupting.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            self.callbacks.on_debug(&format!("interrupt request failed: {}", err)).await;
        }
        true
    }

    /// Hard-terminate: abort the queue, cancel the stream loop, await its
    /// exit. Idempotent — a second call after the loop has already exited
    /// is a cheap no-op.
    pub async fn stop(&self) -> Result<()> {
        self.queue.abort().await;
        self.cancel.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut status = self.status.write().await;
        if *status == AgentStatus::Running {
            *status = AgentStatus::Done;
        }
        Ok(())
    }

    /// Atomic model change; no-op if equal to the current model string.
    pub async fn set_model(&self, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        {
            let current = self.current_model.read().await;
            if *current == model {
                return Ok(());
            }
        }
        *self.current_model.write().await = model.clone();
        if *self.status.read().await == AgentStatus::Running {
            self.client.switch_model(&model).await.map_err(CoreError::ModelTransport)?;
        }
        Ok(())
    }
}

fn stringify_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| if let Some(s) = v.as_str() { s.to_string() } else { v.to_string() })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Bridge the queue's `InputItem` receiver into the plain `String` stream a
/// `ModelClient` consumes, acknowledging each item as soon as it is handed
/// off — this is the point at which the producer's `enqueue` future
/// resolves, giving the queue its backpressure.
fn stream_from_receiver(receiver: mpsc::UnboundedReceiver<InputItem<String>>) -> BoxStream<'static, String> {
    Box::pin(futures_util::stream::unfold(receiver, |mut receiver| async move {
        let item = receiver.recv().await?;
        let payload = item.payload.clone();
        item.ack();
        Some((payload, receiver))
    }))
}
