//! `ModelClient` — the opaque, consumed interface to a remote model.
//!
//! An `async_trait` with a boxed-future-friendly signature and a
//! model-identity accessor, yielding the typed `stream_event` / `assistant`
//! / `result` / `system` event family the remote transport actually speaks.
//! Reconnection and auth are the client's concern; this crate only consumes
//! the stream it yields.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;

/// How the remote model may act on tool/file-edit requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    AcceptEdits,
    Ask,
    Deny,
}

/// Per-call options, threaded through unchanged from `AgentSession::start`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub max_thinking_tokens: Option<u32>,
    pub permission_mode: PermissionMode,
    pub allowed_tools: Vec<String>,
    pub working_directory: Option<String>,
    pub env: HashMap<String, String>,
    pub system_prompt: Option<String>,
    pub resume: Option<String>,
    pub include_partial_messages: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_thinking_tokens: None,
            permission_mode: PermissionMode::Ask,
            allowed_tools: Vec::new(),
            working_directory: None,
            env: HashMap::new(),
            system_prompt: None,
            resume: None,
            include_partial_messages: true,
        }
    }
}

/// One piece of assistant message content, as surfaced on a terminal
/// `assistant` event.
#[derive(Debug, Clone)]
pub enum AssistantContent {
    Text(String),
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Value, is_error: bool },
}

/// A `stream_event`'s inner delta payload.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
    PartialJson(String),
}

/// A `stream_event`'s inner content-block-start payload.
#[derive(Debug, Clone)]
pub enum ContentBlockStart {
    Text,
    Thinking,
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Value, is_error: bool },
}

/// The tagged event family a `ModelClient` stream yields, matching the
/// external interface's `stream_event | assistant | result | system` shapes.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    ContentBlockDelta { index: usize, delta: StreamDelta },
    ContentBlockStart { index: usize, block: ContentBlockStart },
    ContentBlockStop { index: usize },
    Assistant { content: Vec<AssistantContent> },
    Result,
    SystemInit { session_id: String },
}

/// Boxed error type for anything a `ModelClient` can surface; wrapped
/// opaquely into `CoreError::ModelTransport` by the session.
pub type ClientError = Box<dyn StdError + Send + Sync>;

/// The interface an `AgentSession` drives. Implementors own the actual
/// transport (HTTP/SSE, a local process, a test stub).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Open one streaming conversation. `input_stream` carries the session's
    /// queued user inputs; the returned stream yields the model's response
    /// as a sequence of `ModelEvent`s, terminated by `Result`.
    async fn run(
        &self,
        options: RunOptions,
        input_stream: BoxStream<'static, String>,
    ) -> Result<BoxStream<'static, Result<ModelEvent, ClientError>>, ClientError>;

    /// Stable display name for the model this client addresses, surfaced on
    /// `onSessionInit`.
    fn model_display(&self) -> &str;

    /// Request the live connection to stop generating the current response.
    /// Soft: the stream may still deliver a few trailing events. Default
    /// implementation is a no-op, for clients that don't support it. Errors
    /// are swallowed by the caller (logged via `onDebug`), never propagated
    /// as a session failure.
    async fn request_stop(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Request the live connection switch to a different model. Default is
    /// a no-op; a client that supports in-place model switching overrides
    /// this.
    async fn switch_model(&self, _model: &str) -> Result<(), ClientError> {
        Ok(())
    }

    /// Convenience fallback for a client that can only produce a final
    /// result, built on top of `run`: drains the stream, concatenating text
    /// deltas, and returns the accumulated text once a terminal `Result`
    /// event arrives. A client capable of real streaming has no reason to
    /// override this.
    async fn run_once(&self, options: RunOptions, input_stream: BoxStream<'static, String>) -> Result<String, ClientError> {
        let mut stream = self.run(options, input_stream).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::ContentBlockDelta { delta: StreamDelta::Text(chunk), .. } => text.push_str(&chunk),
                ModelEvent::Result => break,
                _ => {}
            }
        }
        Ok(text)
    }
}
