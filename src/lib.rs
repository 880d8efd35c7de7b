//! The coordination core of a multi-agent coding assistant runtime:
//! streaming agent sessions, a sub-agent pool, an event aggregator, a task
//! analyzer/model router, and a fast-mode orchestrator.
//!
//! # Example
//!
//! ```rust
//! use agentmesh_core::{init_logger, RuntimeConfig};
//!
//! init_logger();
//! let config = RuntimeConfig::default();
//! assert_eq!(config.default_tier, agentmesh_core::ModelTier::Fast);
//! ```

pub mod analyzer;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ids;
pub mod model;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod runtime;
pub mod session;
pub mod smart_queue;

pub use analyzer::{AnalysisContext, EstimatedTime, TaskAnalysis, TaskAnalyzer, TaskIntent};
pub use client::{
    AssistantContent, ClientError, ContentBlockStart, ModelClient, ModelEvent, PermissionMode, RunOptions, StreamDelta,
};
pub use config::RuntimeConfig;
pub use coordinator::{AggregateStream, EventCoordinator};
pub use error::{CoreError, Result};
pub use ids::{AgentNameGenerator, TaskIdGenerator};
pub use model::{
    AgentEvent, AgentState, AgentStatus, EventKind, ModelTier, OrchestrationPlan, PlanStep, Priority, Progress, SessionEvent,
    UserTask,
};
pub use orchestrator::{DefaultPlanParser, FastModeOrchestrator, PlanParser};
pub use pool::{ModelClientFactory, PoolStats, SubAgentPool};
pub use queue::{Ack, InputItem, MessageQueue};
pub use runtime::{CoreRuntime, RuntimeStatus};
pub use session::{AgentSession, AgentSessionConfig, SessionCallbacks};
pub use smart_queue::{InjectionRule, QueuedItem, SmartMessageQueue};

use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

/// Idempotent `env_logger` initializer. Safe to call from many tests in the
/// same binary; only the first call has any effect.
pub fn init_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::Builder::from_default_env().try_init();
    });
}
