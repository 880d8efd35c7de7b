//! `CoreRuntime` — the operational surface a harness or CLI wrapper drives
//! directly: submit a task, watch the aggregated event stream, interrupt or
//! cancel in-flight work, and read a point-in-time status snapshot.

use crate::coordinator::{AggregateStream, EventCoordinator};
use crate::ids::TaskIdGenerator;
use crate::model::{AgentState, Priority, UserTask};
use crate::orchestrator::FastModeOrchestrator;
use crate::pool::SubAgentPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

struct TaskHandle {
    status: TaskStatus,
    cancel: CancellationToken,
}

/// Point-in-time snapshot returned by `CoreRuntime::status`.
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub agents: Vec<AgentState>,
    /// Submitted tasks not yet in a terminal (done/failed) state.
    pub queue_depth: usize,
    /// Agents currently RUNNING — the in-flight work `queue_depth` is
    /// waiting behind.
    pub buffered: usize,
}

/// Ties `SubAgentPool`, `EventCoordinator`, and `FastModeOrchestrator`
/// together behind the `submit` / `events` / `interrupt` / `cancel` /
/// `shutdown` / `status` surface.
pub struct CoreRuntime {
    pool: Arc<SubAgentPool>,
    coordinator: EventCoordinator,
    orchestrator: Arc<FastModeOrchestrator>,
    tasks: Arc<RwLock<HashMap<String, TaskHandle>>>,
    task_ids: TaskIdGenerator,
}

impl CoreRuntime {
    pub fn new(
        pool: Arc<SubAgentPool>,
        coordinator: EventCoordinator,
        orchestrator: Arc<FastModeOrchestrator>,
        session_id_seed: Option<u64>,
    ) -> Self {
        Self {
            pool,
            coordinator,
            orchestrator,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            task_ids: TaskIdGenerator::new(session_id_seed),
        }
    }

    /// Submit one task; returns its id immediately. Classification,
    /// planning, and execution all happen on a spawned background task, so
    /// `submit` never blocks on a model call.
    pub async fn submit(&self, task_text: impl Into<String>, priority: Priority) -> String {
        let task_id = self.task_ids.next();
        let task = UserTask::new(task_id.clone(), task_text, priority);
        let cancel = CancellationToken::new();

        self.tasks
            .write()
            .await
            .insert(task_id.clone(), TaskHandle { status: TaskStatus::Pending, cancel: cancel.clone() });

        let orchestrator = self.orchestrator.clone();
        let tasks = self.tasks.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            if let Some(handle) = tasks.write().await.get_mut(&id) {
                handle.status = TaskStatus::Running;
            }
            let outcome = orchestrator.run(task, cancel).await;
            if let Some(handle) = tasks.write().await.get_mut(&id) {
                handle.status = if outcome.is_ok() { TaskStatus::Done } else { TaskStatus::Failed };
            }
        });

        task_id
    }

    /// Every published aggregator event from this point on, replaying the
    /// ring buffer's current backlog first.
    pub async fn events(&self) -> AggregateStream {
        self.coordinator.aggregate().await
    }

    /// Soft-interrupt a specific agent's current response.
    pub async fn interrupt(&self, agent_id: &str) -> bool {
        self.pool.interrupt(agent_id).await
    }

    /// Cancel a submitted task's orchestration. `false` if the task id is
    /// unknown or already terminal.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(task_id) {
            Some(handle) if matches!(handle.status, TaskStatus::Pending | TaskStatus::Running) => {
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Hard-stop every live agent and cancel every still-pending task.
    pub async fn shutdown(&self) {
        for handle in self.tasks.read().await.values() {
            handle.cancel.cancel();
        }
        self.pool.terminate_all().await;
    }

    pub async fn status(&self) -> RuntimeStatus {
        let agents = self.pool.all().await;
        let queue_depth = self
            .tasks
            .read()
            .await
            .values()
            .filter(|h| matches!(h.status, TaskStatus::Pending | TaskStatus::Running))
            .count();
        let buffered = self.pool.stats().await.running;
        RuntimeStatus { agents, queue_depth, buffered }
    }
}
