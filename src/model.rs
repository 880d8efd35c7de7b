//! Core data model: tiers, tasks, agent state, and the aggregator's event
//! schema.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;

/// Abstract capability class of a model. `Auto` defers tier selection to the
/// orchestrator (via [`crate::RuntimeConfig::default_tier`] or the analyzer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelTier {
    Fast,
    SmartMid,
    SmartHigh,
    Auto,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelTier::Fast => "fast",
            ModelTier::SmartMid => "smart_mid",
            ModelTier::SmartHigh => "smart_high",
            ModelTier::Auto => "auto",
        };
        write!(f, "{}", s)
    }
}

/// Priority band a [`UserTask`] is queued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Priority {
    /// Lowest numeric value sorts first: URGENT must be drained before NORMAL
    /// before TODO, so the band order here doubles as the drain order.
    Urgent,
    Normal,
    Todo,
}

/// A user- or orchestrator-submitted unit of work. Immutable once queued.
#[derive(Debug, Clone)]
pub struct UserTask {
    pub id: String,
    pub content: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub parent_task_id: Option<String>,
}

impl UserTask {
    pub fn new(id: impl Into<String>, content: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            priority,
            created_at: Utc::now(),
            parent_task_id: None,
        }
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }
}

/// Lifecycle status of one [`crate::session::AgentSession`], as tracked by
/// the pool entry that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Running,
    Waiting,
    Done,
    Error,
}

/// Progress hint surfaced by an agent while RUNNING.
#[derive(Debug, Clone)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

/// The pool's read/write view of one agent. Owned exclusively by the pool
/// entry for that agent; other components only ever see cloned snapshots.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: String,
    pub model_tier: ModelTier,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    /// Bounded tail buffer, capped at `RuntimeConfig::max_live_output_bytes`.
    pub live_output: String,
    pub progress: Option<Progress>,
    pub spawned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl AgentState {
    pub fn new(id: impl Into<String>, model_tier: ModelTier) -> Self {
        Self {
            id: id.into(),
            model_tier,
            status: AgentStatus::Idle,
            current_task_id: None,
            live_output: String::new(),
            progress: None,
            spawned_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Append a text chunk to `live_output`. When the cap would be
    /// exceeded, the oldest bytes are dropped so that the newest 80% of the
    /// cap remains.
    pub fn push_live_output(&mut self, chunk: &str, cap: usize) {
        self.live_output.push_str(chunk);
        if self.live_output.len() > cap {
            let keep = (cap * 8) / 10;
            let excess = self.live_output.len() - keep;
            let mut boundary = excess;
            while boundary < self.live_output.len() && !self.live_output.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.live_output.drain(..boundary);
        }
    }
}

/// A DAG node produced by planning; each node carries its own model tier.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlanStep {
    pub task_id: String,
    pub prompt: String,
    pub model_tier: ModelTier,
    #[serde(default)]
    pub depends_on: HashSet<String>,
}

/// A DAG of tasks produced by planning; read-only once produced.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OrchestrationPlan {
    pub root_task_id: String,
    pub steps: Vec<PlanStep>,
}

impl OrchestrationPlan {
    /// The trivial one-step plan used whenever planning is skipped or plan
    /// parsing fails.
    pub fn single_step(task: &UserTask, tier: ModelTier) -> Self {
        Self {
            root_task_id: task.id.clone(),
            steps: vec![PlanStep {
                task_id: task.id.clone(),
                prompt: task.content.clone(),
                model_tier: tier,
                depends_on: HashSet::new(),
            }],
        }
    }
}

/// The payload shared by both the pre-aggregation [`AgentEvent`] and the
/// published [`SessionEvent`] — everything one tagged event variant
/// carries, minus the fields the coordinator adds (`seq`) or the session
/// already knows about itself (`agent_id`).
#[derive(Debug, Clone)]
pub enum EventKind {
    Started { task_id: String, model_tier: ModelTier },
    TextDelta { chunk: String },
    ThinkingDelta { block_index: usize, chunk: String },
    ToolStart { tool_use_id: String, tool_name: String, input: serde_json::Value },
    /// `tool_name` is resolved by the coordinator from the matching
    /// `ToolStart`; an unseen `tool_use_id` resolves to itself.
    ToolResult { tool_use_id: String, tool_name: String, content: String, is_error: bool },
    Progress { percent: u8, message: String },
    Completed { task_id: String, result: String },
    Failed { task_id: String, error_kind: String, error_message: String },
    /// Treated equivalently to `Completed` by reducers; kept as a distinct
    /// wire variant rather than collapsed into `Completed`, so a consumer
    /// that does care about the distinction still can.
    Stopped,
}

impl EventKind {
    /// A terminal event is one of `Completed`, `Failed`, or `Stopped` —
    /// exactly one is emitted per `(agentId, taskId)`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed { .. } | EventKind::Failed { .. } | EventKind::Stopped)
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            EventKind::Started { task_id, .. }
            | EventKind::Completed { task_id, .. }
            | EventKind::Failed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// One agent's event, as emitted by a session/pool entry before the
/// coordinator has assigned it a `seq`.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub agent_id: String,
    pub kind: EventKind,
}

/// A uniform, timestamped, sequence-numbered record describing activity of
/// one agent — the stable public interface for aggregator consumers.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    /// Monotonically increasing, assigned by the `EventCoordinator` at
    /// publish time.
    pub seq: u64,
    pub agent_id: String,
    pub kind: EventKind,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
