//! `FastModeOrchestrator` — classify a task, plan it into a DAG of steps if
//! warranted, and execute that DAG across the pool with dependency-aware
//! cancellation.

use crate::analyzer::{AnalysisContext, TaskAnalyzer};
use crate::coordinator::EventCoordinator;
use crate::config::RuntimeConfig;
use crate::error::{CoreError, Result};
use crate::ids::TaskIdGenerator;
use crate::model::{AgentEvent, AgentStatus, EventKind, ModelTier, OrchestrationPlan, Priority, UserTask};
use crate::pool::SubAgentPool;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parses a remote model's plan-description text into an `OrchestrationPlan`.
/// Kept as a trait object so the deploying harness can swap in whatever JSON
/// (or other) grammar its planning model actually produces.
pub trait PlanParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<OrchestrationPlan>;
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(rename = "taskId")]
    task_id: String,
    prompt: String,
    #[serde(rename = "modelTier")]
    model_tier: String,
    #[serde(default, rename = "dependsOn")]
    depends_on: HashSet<String>,
}

/// Understands one conservative, documented JSON shape:
/// `{"steps":[{"taskId","prompt","modelTier","dependsOn"}]}`. Any parse
/// failure is the caller's signal to fall back to a single-step plan.
pub struct DefaultPlanParser;

impl PlanParser for DefaultPlanParser {
    fn parse(&self, text: &str) -> Result<OrchestrationPlan> {
        let raw: RawPlan = serde_json::from_str(text).map_err(|e| CoreError::Parse(e.to_string()))?;
        if raw.steps.is_empty() {
            return Err(CoreError::Parse("plan has no steps".to_string()));
        }
        let steps = raw
            .steps
            .into_iter()
            .map(|s| {
                let model_tier = match s.model_tier.as_str() {
                    "fast" => ModelTier::Fast,
                    "smart_mid" => ModelTier::SmartMid,
                    "smart_high" => ModelTier::SmartHigh,
                    _ => ModelTier::Auto,
                };
                crate::model::PlanStep { task_id: s.task_id, prompt: s.prompt, model_tier, depends_on: s.depends_on }
            })
            .collect::<Vec<_>>();
        let root_task_id = steps[0].task_id.clone();
        Ok(OrchestrationPlan { root_task_id, steps })
    }
}

pub struct FastModeOrchestrator {
    pool: Arc<SubAgentPool>,
    coordinator: EventCoordinator,
    config: RuntimeConfig,
    plan_parser: Arc<dyn PlanParser>,
    task_ids: TaskIdGenerator,
}

impl FastModeOrchestrator {
    pub fn new(pool: Arc<SubAgentPool>, coordinator: EventCoordinator, config: RuntimeConfig, plan_parser: Arc<dyn PlanParser>) -> Self {
        let task_ids = TaskIdGenerator::new(config.session_id_seed);
        Self { pool, coordinator, config, plan_parser, task_ids }
    }

    /// Classify, plan, and execute `task` to completion (or cancellation).
    /// Returns each step's result keyed by `taskId`; the first failure's
    /// error is also returned separately so callers don't have to scan the
    /// map for it.
    pub async fn run(&self, task: UserTask, cancel: CancellationToken) -> Result<HashMap<String, String>> {
        let analysis = TaskAnalyzer::analyze(&task.content, &AnalysisContext::default(), self.config.default_tier);

        let plan = if analysis.needs_planning {
            self.request_plan(&task).await.unwrap_or_else(|_| OrchestrationPlan::single_step(&task, analysis.suggested_tier))
        } else {
            OrchestrationPlan::single_step(&task, analysis.suggested_tier)
        };

        self.execute_plan(plan, analysis.can_parallelize, cancel).await
    }

    async fn request_plan(&self, task: &UserTask) -> Result<OrchestrationPlan> {
        let agent_id = self.pool.spawn(ModelTier::SmartHigh).await?;
        let planning_task = UserTask::new(
            self.task_ids.next(),
            format!(
                "Produce an OrchestrationPlan as JSON ({{\"steps\":[{{\"taskId\",\"prompt\",\"modelTier\",\"dependsOn\"}}]}}) for: {}",
                task.content
            ),
            Priority::Urgent,
        );
        let result = self.pool.execute(&agent_id, planning_task).await;
        self.pool.terminate(&agent_id).await;
        let text = result?;
        self.plan_parser.parse(&text)
    }

    /// Execute an already-built plan's DAG across the pool. Exposed
    /// separately from `run` so a caller that already has a plan (e.g. from
    /// a cached or externally-authored source) can skip classification.
    pub async fn execute_plan(
        &self,
        plan: OrchestrationPlan,
        can_parallelize: bool,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, String>> {
        let order: Vec<String> = plan.steps.iter().map(|s| s.task_id.clone()).collect();
        let mut steps: HashMap<String, crate::model::PlanStep> = plan.steps.into_iter().map(|s| (s.task_id.clone(), s)).collect();

        let mut remaining_deps: HashMap<String, HashSet<String>> =
            steps.iter().map(|(id, s)| (id.clone(), s.depends_on.clone())).collect();
        let mut results: HashMap<String, String> = HashMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut spawned_agents: Vec<String> = Vec::new();
        let mut first_error: Option<CoreError> = None;

        while results.len() + failed.len() < order.len() {
            if cancel.is_cancelled() {
                for id in &order {
                    if !results.contains_key(id) && !failed.contains(id) {
                        failed.insert(id.clone());
                        self.emit_cancelled(id, "orchestration cancelled");
                    }
                }
                break;
            }

            let ready: Vec<String> = order
                .iter()
                .filter(|id| !results.contains_key(*id) && !failed.contains(*id))
                .filter(|id| remaining_deps.get(*id).map(|d| d.is_empty()).unwrap_or(true))
                .cloned()
                .collect();

            if ready.is_empty() {
                // Nothing left is runnable: every remaining step depends,
                // transitively, on something that already failed.
                for id in &order {
                    if !results.contains_key(id) && !failed.contains(id) {
                        failed.insert(id.clone());
                        self.emit_cancelled(id, "dependency failed");
                    }
                }
                break;
            }

            if can_parallelize {
                let futures: Vec<_> = ready
                    .iter()
                    .map(|id| {
                        let step = steps.get(id).unwrap().clone();
                        self.run_step(step, cancel.clone())
                    })
                    .collect();
                let outcomes = futures_util::future::join_all(futures).await;
                for (id, (agent_id, outcome)) in ready.iter().zip(outcomes) {
                    spawned_agents.push(agent_id);
                    self.settle(id, outcome, &mut results, &mut failed, &mut remaining_deps, &steps, &mut first_error);
                }
            } else {
                for id in &ready {
                    let step = steps.get(id).unwrap().clone();
                    let (agent_id, outcome) = self.run_step(step, cancel.clone()).await;
                    spawned_agents.push(agent_id);
                    self.settle(id, outcome, &mut results, &mut failed, &mut remaining_deps, &steps, &mut first_error);
                }
            }
        }

        if cancel.is_cancelled() {
            for agent_id in &spawned_agents {
                self.pool.interrupt(agent_id).await;
                self.pool.terminate(agent_id).await;
            }
        }
        let _ = &mut steps;

        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    async fn run_step(&self, step: crate::model::PlanStep, cancel: CancellationToken) -> (String, Result<String>) {
        if cancel.is_cancelled() {
            return (String::new(), Err(CoreError::Aborted));
        }
        let agent_id = match self.pool.spawn(step.model_tier).await {
            Ok(id) => id,
            Err(err) => return (String::new(), Err(err)),
        };
        let task = UserTask::new(step.task_id.clone(), step.prompt.clone(), Priority::Normal);

        let outcome = tokio::select! {
            outcome = self.pool.execute(&agent_id, task) => outcome,
            _ = cancel.cancelled() => self.escalate(&agent_id).await,
        };
        (agent_id, outcome)
    }

    /// Cancellation fired while this step's agent was mid-flight: soft
    /// `interrupt()` it, then wait up to `interrupt_grace_ms` for it to
    /// reach a terminal status on its own before hard `terminate()`. Either
    /// way the agent is terminated before this returns, per the
    /// cancellation contract; the returned error distinguishes a clean
    /// interrupt (`Aborted`) from one that had to be forced (`Timeout`).
    async fn escalate(&self, agent_id: &str) -> Result<String> {
        self.pool.interrupt(agent_id).await;
        let grace = tokio::time::sleep(std::time::Duration::from_millis(self.config.interrupt_grace_ms));
        tokio::pin!(grace);
        tokio::select! {
            _ = &mut grace => {
                self.pool.terminate(agent_id).await;
                Err(CoreError::Timeout)
            }
            _ = self.wait_for_terminal(agent_id) => {
                self.pool.terminate(agent_id).await;
                Err(CoreError::Aborted)
            }
        }
    }

    /// Poll until `agent_id` leaves RUNNING or disappears from the pool.
    async fn wait_for_terminal(&self, agent_id: &str) {
        loop {
            match self.pool.get(agent_id).await {
                Some(state) if state.status == AgentStatus::Running => {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
                _ => return,
            }
        }
    }

    fn settle(
        &self,
        id: &str,
        outcome: Result<String>,
        results: &mut HashMap<String, String>,
        failed: &mut HashSet<String>,
        remaining_deps: &mut HashMap<String, HashSet<String>>,
        steps: &HashMap<String, crate::model::PlanStep>,
        first_error: &mut Option<CoreError>,
    ) {
        match outcome {
            Ok(value) => {
                results.insert(id.to_string(), value);
                for (other_id, deps) in remaining_deps.iter_mut() {
                    if other_id != id {
                        deps.remove(id);
                    }
                }
            }
            Err(err) => {
                log::warn!("orchestration step {} failed: {}", id, err);
                if first_error.is_none() {
                    *first_error = Some(err);
                }
                failed.insert(id.to_string());
                self.cascade_cancel(id, steps, remaining_deps, failed);
            }
        }
    }

    /// Mark every transitive dependent of `failed_id` as failed with
    /// `errorKind = Aborted`, without ever starting an agent for it.
    fn cascade_cancel(
        &self,
        failed_id: &str,
        steps: &HashMap<String, crate::model::PlanStep>,
        remaining_deps: &mut HashMap<String, HashSet<String>>,
        failed: &mut HashSet<String>,
    ) {
        let dependents: Vec<String> = steps
            .values()
            .filter(|s| s.depends_on.contains(failed_id))
            .map(|s| s.task_id.clone())
            .filter(|id| !failed.contains(id))
            .collect();
        for dependent in dependents {
            failed.insert(dependent.clone());
            remaining_deps.remove(&dependent);
            self.emit_cancelled(&dependent, "dependency failed");
            self.cascade_cancel(&dependent, steps, remaining_deps, failed);
        }
    }

    fn emit_cancelled(&self, task_id: &str, reason: &str) {
        self.coordinator.emit(AgentEvent {
            agent_id: format!("orchestrator:{}", task_id),
            kind: EventKind::Failed {
                task_id: task_id.to_string(),
                error_kind: CoreError::Aborted.kind().to_string(),
                error_message: reason.to_string(),
            },
        });
    }
}
