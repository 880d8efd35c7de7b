//! `SubAgentPool` — spawn / execute / interrupt / terminate / query many
//! concurrent `AgentSession`s, forwarding their callbacks into one
//! `EventCoordinator`.

use crate::client::ModelClient;
use crate::coordinator::EventCoordinator;
use crate::config::RuntimeConfig;
use crate::error::{CoreError, Result};
use crate::ids::AgentNameGenerator;
use crate::model::{AgentState, AgentStatus, EventKind, ModelTier, Progress, UserTask};
use crate::session::{AgentSession, AgentSessionConfig, SessionCallbacks};
use crate::smart_queue::InjectionRule;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock, Semaphore};

/// Constructs the `ModelClient` a freshly spawned agent of a given tier
/// should use. Kept as a trait (rather than a single shared client) so a
/// pool can route tiers to different backing clients/models.
pub trait ModelClientFactory: Send + Sync {
    fn create(&self, tier: ModelTier) -> Arc<dyn ModelClient>;
}

struct PoolEntry {
    state: AgentState,
    session: Arc<AgentSession>,
    pending_completion: Option<oneshot::Sender<Result<String>>>,
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

/// Forwards one `AgentSession`'s callbacks into (1) the shared `AgentState`
/// map, (2) the coordinator, and (3) an optional outer application callback
/// so the unaggregated per-agent stream remains observable.
struct PoolCallbacks {
    agent_id: String,
    entries: Arc<RwLock<HashMap<String, PoolEntry>>>,
    coordinator: EventCoordinator,
    max_live_output_bytes: usize,
    base: Option<Arc<dyn SessionCallbacks>>,
}

#[async_trait]
impl SessionCallbacks for PoolCallbacks {
    async fn on_text_chunk(&self, text: &str) {
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&self.agent_id) {
                entry.state.push_live_output(text, self.max_live_output_bytes);
            }
        }
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::TextDelta { chunk: text.to_string() },
        });
        if let Some(base) = &self.base {
            base.on_text_chunk(text).await;
        }
    }

    async fn on_thinking_start(&self, block_index: usize) {
        if let Some(base) = &self.base {
            base.on_thinking_start(block_index).await;
        }
    }

    async fn on_thinking_chunk(&self, block_index: usize, delta: &str) {
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::ThinkingDelta { block_index, chunk: delta.to_string() },
        });
        if let Some(base) = &self.base {
            base.on_thinking_chunk(block_index, delta).await;
        }
    }

    async fn on_tool_use_start(&self, id: &str, name: &str, input: &Value, stream_index: usize) {
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::ToolStart {
                tool_use_id: id.to_string(),
                tool_name: name.to_string(),
                input: input.clone(),
            },
        });
        if let Some(base) = &self.base {
            base.on_tool_use_start(id, name, input, stream_index).await;
        }
    }

    async fn on_tool_result_start(&self, tool_use_id: &str, content: &str, is_error: bool) {
        // The aggregator's single TOOL_RESULT event is emitted from
        // `on_tool_result_complete` (the assistant-message tool_result, per
        // the worked "tool call" scenario); this earlier content-block-start
        // signal is forwarded to the outer application only.
        if let Some(base) = &self.base {
            base.on_tool_result_start(tool_use_id, content, is_error).await;
        }
    }

    async fn on_tool_result_complete(&self, tool_use_id: &str, content: &str, is_error: bool) {
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                tool_name: String::new(),
                content: content.to_string(),
                is_error,
            },
        });
        if let Some(base) = &self.base {
            base.on_tool_result_complete(tool_use_id, content, is_error).await;
        }
    }

    async fn on_content_block_stop(&self, index: usize, tool_id: Option<&str>) {
        if let Some(base) = &self.base {
            base.on_content_block_stop(index, tool_id).await;
        }
    }

    async fn on_message_complete(&self) {
        let (task_id, result) = self.finish(AgentStatus::Done, None).await;
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::Completed { task_id, result },
        });
        if let Some(base) = &self.base {
            base.on_message_complete().await;
        }
    }

    async fn on_message_stopped(&self) {
        self.finish(AgentStatus::Done, None).await;
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::Stopped,
        });
        if let Some(base) = &self.base {
            base.on_message_stopped().await;
        }
    }

    async fn on_error(&self, error: &CoreError) {
        let message = error.to_string();
        let (task_id, _) = self.finish(AgentStatus::Error, Some(message.clone())).await;
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: self.agent_id.clone(),
            kind: EventKind::Failed {
                task_id,
                error_kind: error.kind().to_string(),
                error_message: message,
            },
        });
        if let Some(base) = &self.base {
            base.on_error(error).await;
        }
    }

    async fn on_session_init(&self, session_id: &str, resumed: bool, model: &str, model_display: &str) {
        if let Some(base) = &self.base {
            base.on_session_init(session_id, resumed, model, model_display).await;
        }
    }

    async fn on_debug(&self, message: &str) {
        log::debug!("agent {}: {}", self.agent_id, message);
        if let Some(base) = &self.base {
            base.on_debug(message).await;
        }
    }
}

impl PoolCallbacks {
    /// Common terminal bookkeeping: update `AgentState`, resolve the pending
    /// `execute()` future, and return `(task_id, live_output)` for the
    /// caller to build its aggregator event with.
    async fn finish(&self, status: AgentStatus, error: Option<String>) -> (String, String) {
        let mut entries = self.entries.write().await;
        let entry = match entries.get_mut(&self.agent_id) {
            Some(entry) => entry,
            None => return (String::new(), String::new()),
        };
        let task_id = entry.state.current_task_id.clone().unwrap_or_default();
        let result = entry.state.live_output.clone();
        entry.state.status = status;
        entry.state.completed_at = Some(Utc::now());
        entry.state.error = error.clone();
        if let Some(sender) = entry.pending_completion.take() {
            let outcome = match error {
                Some(msg) => Err(CoreError::Internal(msg)),
                None => Ok(result.clone()),
            };
            let _ = sender.send(outcome);
        }
        (task_id, result)
    }
}

/// Aggregate counts surfaced by `stats()`.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

pub struct SubAgentPool {
    entries: Arc<RwLock<HashMap<String, PoolEntry>>>,
    coordinator: EventCoordinator,
    config: RuntimeConfig,
    client_factory: Arc<dyn ModelClientFactory>,
    base_callbacks: Option<Arc<dyn SessionCallbacks>>,
    spawn_gate: Option<Arc<Semaphore>>,
    smart_queue_rules: Option<Arc<Vec<InjectionRule>>>,
}

impl SubAgentPool {
    pub fn new(
        config: RuntimeConfig,
        coordinator: EventCoordinator,
        client_factory: Arc<dyn ModelClientFactory>,
        base_callbacks: Option<Arc<dyn SessionCallbacks>>,
    ) -> Self {
        Self::with_smart_queue(config, coordinator, client_factory, base_callbacks, None)
    }

    /// Same as `new`, but every spawned agent is fed by a `SmartMessageQueue`
    /// seeded with `injection_rules` instead of the plain FIFO queue.
    pub fn with_smart_queue(
        config: RuntimeConfig,
        coordinator: EventCoordinator,
        client_factory: Arc<dyn ModelClientFactory>,
        base_callbacks: Option<Arc<dyn SessionCallbacks>>,
        injection_rules: Option<Vec<InjectionRule>>,
    ) -> Self {
        let spawn_gate = config.max_concurrent_agents.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            coordinator,
            config,
            client_factory,
            base_callbacks,
            spawn_gate,
            smart_queue_rules: injection_rules.map(Arc::new),
        }
    }

    /// Allocate `<tierPrefix>-<n>`, construct and start an `AgentSession`.
    /// If `max_concurrent_agents` is configured, this call suspends until a
    /// slot frees up ("excess queues" per the configuration table) rather
    /// than failing.
    pub async fn spawn(&self, tier: ModelTier) -> Result<String> {
        let permit = match &self.spawn_gate {
            Some(gate) => Some(gate.clone().acquire_owned().await.map_err(|_| CoreError::Internal("spawn gate closed".to_string()))?),
            None => None,
        };

        let id = AgentNameGenerator::next(self.config.prefix_for(tier));
        let client = self.client_factory.create(tier);
        let model_display = client.model_display().to_string();

        let callbacks: Arc<dyn SessionCallbacks> = Arc::new(PoolCallbacks {
            agent_id: id.clone(),
            entries: self.entries.clone(),
            coordinator: self.coordinator.clone(),
            max_live_output_bytes: self.config.max_live_output_bytes,
            base: self.base_callbacks.clone(),
        });

        let session_config = AgentSessionConfig {
            model_tier: tier,
            model: model_display,
            resume_session_id: None,
            run_options: Default::default(),
        };
        let session = Arc::new(match &self.smart_queue_rules {
            Some(rules) => AgentSession::with_smart_queue(id.clone(), client, callbacks, session_config, rules.as_ref().clone()),
            None => AgentSession::new(id.clone(), client, callbacks, session_config),
        });

        let mut state = AgentState::new(id.clone(), tier);

        match session.start().await {
            Ok(()) => {
                self.entries.write().await.insert(
                    id.clone(),
                    PoolEntry { state, session, pending_completion: None, _permit: permit },
                );
                Ok(id)
            }
            Err(err) => {
                state.status = AgentStatus::Error;
                state.error = Some(err.to_string());
                self.entries.write().await.insert(
                    id.clone(),
                    PoolEntry { state, session, pending_completion: None, _permit: permit },
                );
                Err(err)
            }
        }
    }

    /// Run `task` on `agent_id`. Valid only when the agent is IDLE or DONE.
    /// Returns once the agent reaches its next terminal event:
    /// `Ok(live_output)` for COMPLETED/STOPPED, `Err` for FAILED.
    pub async fn execute(&self, agent_id: &str, task: UserTask) -> Result<String> {
        let (session, rx) = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(agent_id).ok_or_else(|| CoreError::NotFound(agent_id.to_string()))?;
            if !matches!(entry.state.status, AgentStatus::Idle | AgentStatus::Done) {
                return Err(CoreError::Busy);
            }
            entry.state.status = AgentStatus::Running;
            entry.state.current_task_id = Some(task.id.clone());
            entry.state.live_output.clear();
            entry.state.progress = None;
            let (tx, rx) = oneshot::channel();
            entry.pending_completion = Some(tx);
            (entry.session.clone(), rx)
        };

        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: agent_id.to_string(),
            kind: EventKind::Started {
                task_id: task.id.clone(),
                model_tier: {
                    let entries = self.entries.read().await;
                    entries.get(agent_id).map(|e| e.state.model_tier).unwrap_or(ModelTier::Auto)
                },
            },
        });

        session.send(task.content).await?;

        rx.await.map_err(|_| CoreError::Aborted)?
    }

    /// Forward to the session; `false` if the agent isn't RUNNING.
    pub async fn interrupt(&self, agent_id: &str) -> bool {
        let session = {
            let entries = self.entries.read().await;
            match entries.get(agent_id) {
                Some(entry) if entry.state.status == AgentStatus::Running => entry.session.clone(),
                _ => return false,
            }
        };
        session.interrupt().await
    }

    /// Stop the session (best-effort), mark DONE, remove the entry. Safe to
    /// call repeatedly; a missing id is a no-op.
    pub async fn terminate(&self, agent_id: &str) {
        let session = {
            let mut entries = self.entries.write().await;
            entries.remove(agent_id).map(|entry| entry.session)
        };
        if let Some(session) = session {
            let _ = session.stop().await;
        }
    }

    pub async fn terminate_all(&self) {
        let ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for id in ids {
            self.terminate(&id).await;
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentState> {
        self.entries.read().await.get(agent_id).map(|e| e.state.clone())
    }

    pub async fn all(&self) -> Vec<AgentState> {
        self.entries.read().await.values().map(|e| e.state.clone()).collect()
    }

    pub async fn by_status(&self, status: AgentStatus) -> Vec<AgentState> {
        self.entries.read().await.values().filter(|e| e.state.status == status).map(|e| e.state.clone()).collect()
    }

    pub async fn by_tier(&self, tier: ModelTier) -> Vec<AgentState> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| std::mem::discriminant(&e.state.model_tier) == std::mem::discriminant(&tier))
            .map(|e| e.state.clone())
            .collect()
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.read().await;
        let mut stats = PoolStats { total: entries.len(), ..Default::default() };
        for entry in entries.values() {
            match entry.state.status {
                AgentStatus::Idle | AgentStatus::Waiting => stats.idle += 1,
                AgentStatus::Running => stats.running += 1,
                AgentStatus::Done => stats.done += 1,
                AgentStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    pub async fn report_progress(&self, agent_id: &str, percent: u8, message: impl Into<String>) {
        let message = message.into();
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(agent_id) {
                entry.state.progress = Some(Progress { percent, message: message.clone() });
            }
        }
        self.coordinator.emit(crate::model::AgentEvent {
            agent_id: agent_id.to_string(),
            kind: EventKind::Progress { percent, message },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, ModelEvent, RunOptions};
    use futures_util::stream::BoxStream;

    struct NoopClient;

    #[async_trait]
    impl ModelClient for NoopClient {
        async fn run(
            &self,
            _options: RunOptions,
            _input_stream: BoxStream<'static, String>,
        ) -> std::result::Result<BoxStream<'static, std::result::Result<ModelEvent, ClientError>>, ClientError> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        fn model_display(&self) -> &str {
            "noop"
        }
    }

    struct NoopFactory;

    impl ModelClientFactory for NoopFactory {
        fn create(&self, _tier: ModelTier) -> Arc<dyn ModelClient> {
            Arc::new(NoopClient)
        }
    }

    #[tokio::test]
    async fn spawn_beyond_max_concurrent_agents_suspends_until_a_slot_frees() {
        let mut config = RuntimeConfig::default();
        config.max_concurrent_agents = Some(1);
        let coordinator = EventCoordinator::new(16);
        let pool = Arc::new(SubAgentPool::new(config, coordinator, Arc::new(NoopFactory), None));

        let first = pool.spawn(ModelTier::Fast).await.unwrap();

        let pool_for_second = pool.clone();
        let second_spawn = tokio::spawn(async move { pool_for_second.spawn(ModelTier::Fast).await });

        // The second spawn should not complete while the first agent still
        // holds the only permit.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!second_spawn.is_finished());

        pool.terminate(&first).await;
        let second = tokio::time::timeout(std::time::Duration::from_millis(200), second_spawn)
            .await
            .expect("second spawn should unblock once the first agent is terminated")
            .unwrap()
            .unwrap();
        assert_ne!(first, second);
    }

    /// Echoes every input it receives back out as a text delta, then yields
    /// `Result` once it has seen `expected_inputs` of them.
    struct EchoClient {
        expected_inputs: usize,
    }

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn run(
            &self,
            _options: RunOptions,
            mut input_stream: BoxStream<'static, String>,
        ) -> std::result::Result<BoxStream<'static, std::result::Result<ModelEvent, ClientError>>, ClientError> {
            use futures_util::StreamExt;
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let expected_inputs = self.expected_inputs;
            tokio::spawn(async move {
                for _ in 0..expected_inputs {
                    match input_stream.next().await {
                        Some(payload) => {
                            let delta = crate::client::StreamDelta::Text(payload);
                            let _ = tx.send(Ok(ModelEvent::ContentBlockDelta { index: 0, delta }));
                        }
                        None => break,
                    }
                }
                let _ = tx.send(Ok(ModelEvent::Result));
            });
            Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
        }

        fn model_display(&self) -> &str {
            "echo"
        }
    }

    struct EchoFactory;

    impl ModelClientFactory for EchoFactory {
        fn create(&self, _tier: ModelTier) -> Arc<dyn ModelClient> {
            Arc::new(EchoClient { expected_inputs: 2 })
        }
    }

    #[tokio::test]
    async fn smart_queue_injection_reaches_a_live_session() {
        let rule = InjectionRule::new("remember to check tests", |p: &str| p.contains("trigger"));
        let pool = Arc::new(SubAgentPool::with_smart_queue(
            RuntimeConfig::default(),
            EventCoordinator::new(16),
            Arc::new(EchoFactory),
            None,
            Some(vec![rule]),
        ));

        let agent_id = pool.spawn(ModelTier::Fast).await.unwrap();
        let task = UserTask::new("t1", "please trigger this", crate::model::Priority::Normal);
        let output = pool.execute(&agent_id, task).await.unwrap();

        assert_eq!(output, "remember to check testsplease trigger this");
    }

    #[tokio::test]
    async fn stats_reflect_idle_running_and_done_counts() {
        let pool = Arc::new(SubAgentPool::new(RuntimeConfig::default(), EventCoordinator::new(16), Arc::new(NoopFactory), None));
        let id = pool.spawn(ModelTier::Fast).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.running, 0);
    }
}
