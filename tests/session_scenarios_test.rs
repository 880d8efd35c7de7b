//! End-to-end scenarios against a single `AgentSession`: a simple turn, a
//! tool call, and an interrupt mid-stream.

mod support;

use agentmesh_core::{init_logger, AgentSessionConfig, AgentSession, AgentStatus, CoreError, ModelTier, SessionCallbacks};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::Arc;
use support::{assistant_tool_result, init, result, text_delta, tool_start, ScriptedModelClient, Step};

#[derive(Default)]
struct RecordingCallbacks {
    events: Mutex<Vec<String>>,
}

impl RecordingCallbacks {
    fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionCallbacks for RecordingCallbacks {
    async fn on_text_chunk(&self, text: &str) {
        self.events.lock().unwrap().push(format!("text:{}", text));
    }
    async fn on_tool_use_start(&self, id: &str, name: &str, _input: &Value, _stream_index: usize) {
        self.events.lock().unwrap().push(format!("tool_start:{}:{}", id, name));
    }
    async fn on_tool_result_complete(&self, tool_use_id: &str, content: &str, is_error: bool) {
        self.events.lock().unwrap().push(format!("tool_result:{}:{}:{}", tool_use_id, content, is_error));
    }
    async fn on_message_complete(&self) {
        self.events.lock().unwrap().push("complete".to_string());
    }
    async fn on_message_stopped(&self) {
        self.events.lock().unwrap().push("stopped".to_string());
    }
    async fn on_error(&self, error: &CoreError) {
        self.events.lock().unwrap().push(format!("error:{}:{}", error.kind(), error));
    }
}

fn session_with(client: ScriptedModelClient) -> (Arc<AgentSession>, Arc<RecordingCallbacks>) {
    let callbacks = Arc::new(RecordingCallbacks::default());
    let session = Arc::new(AgentSession::new(
        "haiku-1",
        Arc::new(client),
        callbacks.clone(),
        AgentSessionConfig {
            model_tier: ModelTier::Fast,
            model: "claude-haiku".to_string(),
            resume_session_id: None,
            run_options: Default::default(),
        },
    ));
    (session, callbacks)
}

async fn wait_until_done(session: &AgentSession) {
    for _ in 0..200 {
        if session.status().await != AgentStatus::Running {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("session never reached a terminal status");
}

#[tokio::test]
async fn single_simple_turn_yields_text_then_completed() {
    init_logger();
    let client = ScriptedModelClient::new(
        "claude-haiku",
        vec![
            Step::Event(init("s1")),
            Step::Event(text_delta(0, "a.txt\nb.txt")),
            Step::Event(result()),
        ],
    );
    let (session, callbacks) = session_with(client);
    session.start().await.unwrap();
    session.send("list files").await.unwrap();
    wait_until_done(&session).await;

    assert_eq!(session.status().await, AgentStatus::Done);
    assert_eq!(callbacks.snapshot(), vec!["text:a.txt\nb.txt".to_string(), "complete".to_string()]);
}

#[tokio::test]
async fn tool_call_yields_tool_start_then_tool_result_then_completed() {
    init_logger();
    let client = ScriptedModelClient::new(
        "claude-haiku",
        vec![
            Step::Event(tool_start(0, "u1", "Grep", serde_json::json!({"q": "x"}))),
            Step::Event(assistant_tool_result("u1", "match", false)),
            Step::Event(result()),
        ],
    );
    let (session, callbacks) = session_with(client);
    session.start().await.unwrap();
    session.send("grep for x").await.unwrap();
    wait_until_done(&session).await;

    assert_eq!(
        callbacks.snapshot(),
        vec!["tool_start:u1:Grep".to_string(), "tool_result:u1:match:false".to_string(), "complete".to_string()]
    );
}

#[tokio::test]
async fn interrupt_mid_stream_still_reaches_a_terminal_event() {
    init_logger();
    let client = ScriptedModelClient::new(
        "claude-haiku",
        vec![
            Step::Event(text_delta(0, "a")),
            Step::Event(text_delta(0, "b")),
            Step::AfterInterrupt(result()),
        ],
    );
    let (session, callbacks) = session_with(client);
    session.start().await.unwrap();
    session.send("keep going").await.unwrap();

    // Give the scripted client a moment to emit the first two deltas before
    // interrupting.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let interrupted = session.interrupt().await;
    assert!(interrupted);

    wait_until_done(&session).await;
    let events = callbacks.snapshot();
    assert_eq!(events[0], "text:a");
    assert_eq!(events[1], "text:b");
    assert_eq!(events.last().unwrap(), "complete");
}

#[tokio::test]
async fn interrupt_before_any_tokens_still_returns_true_and_reaches_terminal() {
    init_logger();
    let client = ScriptedModelClient::new("claude-haiku", vec![Step::AfterInterrupt(result())]);
    let (session, _callbacks) = session_with(client);
    session.start().await.unwrap();
    session.send("go").await.unwrap();

    assert!(session.interrupt().await);
    wait_until_done(&session).await;
    assert_eq!(session.status().await, AgentStatus::Done);
}

#[tokio::test]
async fn stop_is_idempotent() {
    init_logger();
    let client = ScriptedModelClient::new("claude-haiku", vec![Step::Event(text_delta(0, "a")), Step::Event(result())]);
    let (session, _callbacks) = session_with(client);
    session.start().await.unwrap();
    session.send("hi").await.unwrap();
    wait_until_done(&session).await;

    session.stop().await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(session.status().await, AgentStatus::Done);
}
