//! A hand-rolled, scripted `ModelClient` shared by the integration tests in
//! this directory: one struct, constructed with a fixed event script, per
//! scenario shape.

use agentmesh_core::{AssistantContent, ClientError, ContentBlockStart, ModelClient, ModelEvent, RunOptions, StreamDelta};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One scripted step: an event to yield, optionally gated on an external
/// interrupt signal having already been requested, or a transport failure.
pub enum Step {
    Event(ModelEvent),
    /// Only yielded once `interrupted` has been observed `true`.
    AfterInterrupt(ModelEvent),
    Fail(String),
}

enum Outcome {
    Ok(ModelEvent),
    Err(String),
}

pub struct ScriptedModelClient {
    steps: Vec<Step>,
    model_display: String,
    interrupted: Arc<AtomicBool>,
    stop_requests: Arc<AtomicUsize>,
}

impl ScriptedModelClient {
    pub fn new(model_display: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            steps,
            model_display: model_display.into(),
            interrupted: Arc::new(AtomicBool::new(false)),
            stop_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stop_request_count(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn run(
        &self,
        _options: RunOptions,
        _input_stream: BoxStream<'static, String>,
    ) -> Result<BoxStream<'static, Result<ModelEvent, ClientError>>, ClientError> {
        let interrupted = self.interrupted.clone();
        let outcomes: Vec<Outcome> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Event(event) => Outcome::Ok(event.clone()),
                Step::AfterInterrupt(event) => Outcome::Ok(event.clone()),
                Step::Fail(message) => Outcome::Err(message.clone()),
            })
            .collect();
        let gates: Vec<bool> = self.steps.iter().map(|s| matches!(s, Step::AfterInterrupt(_))).collect();

        let stream = async_stream_from(outcomes, gates, interrupted);
        Ok(Box::pin(stream))
    }

    fn model_display(&self) -> &str {
        &self.model_display
    }

    async fn request_stop(&self) -> Result<(), ClientError> {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct ScriptedError(String);

impl std::fmt::Display for ScriptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ScriptedError {}

fn async_stream_from(
    outcomes: Vec<Outcome>,
    gates: Vec<bool>,
    interrupted: Arc<AtomicBool>,
) -> BoxStream<'static, Result<ModelEvent, ClientError>> {
    Box::pin(futures_util::stream::unfold((0usize, outcomes, gates, interrupted), |(i, outcomes, gates, interrupted)| async move {
        if i >= outcomes.len() {
            return None;
        }
        if gates[i] {
            while !interrupted.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        }
        let item = match &outcomes[i] {
            Outcome::Ok(event) => Ok(event.clone()),
            Outcome::Err(message) => Err(Box::new(ScriptedError(message.clone())) as ClientError),
        };
        Some((item, (i + 1, outcomes, gates, interrupted)))
    }))
}

pub fn text_delta(index: usize, text: &str) -> ModelEvent {
    ModelEvent::ContentBlockDelta { index, delta: StreamDelta::Text(text.to_string()) }
}

pub fn tool_start(index: usize, id: &str, name: &str, input: serde_json::Value) -> ModelEvent {
    ModelEvent::ContentBlockStart { index, block: ContentBlockStart::ToolUse { id: id.to_string(), name: name.to_string(), input } }
}

pub fn assistant_tool_result(tool_use_id: &str, content: &str, is_error: bool) -> ModelEvent {
    ModelEvent::Assistant {
        content: vec![AssistantContent::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: serde_json::Value::String(content.to_string()),
            is_error,
        }],
    }
}

pub fn init(session_id: &str) -> ModelEvent {
    ModelEvent::SystemInit { session_id: session_id.to_string() }
}

pub fn result() -> ModelEvent {
    ModelEvent::Result
}
