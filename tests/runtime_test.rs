//! End-to-end scenarios against `CoreRuntime`: submit-to-completion, status
//! accounting, and cancelling a task before it settles.

mod support;

use agentmesh_core::{
    init_logger, CoreRuntime, DefaultPlanParser, EventCoordinator, EventKind, FastModeOrchestrator, ModelClient,
    ModelClientFactory, ModelTier, Priority, RuntimeConfig, SubAgentPool,
};
use std::sync::Arc;
use support::{result, text_delta, ScriptedModelClient, Step};

struct AlwaysSucceedFactory;

impl ModelClientFactory for AlwaysSucceedFactory {
    fn create(&self, _tier: ModelTier) -> Arc<dyn ModelClient> {
        Arc::new(ScriptedModelClient::new("stub", vec![Step::Event(text_delta(0, "done")), Step::Event(result())]))
    }
}

struct HangingFactory;

impl ModelClientFactory for HangingFactory {
    fn create(&self, _tier: ModelTier) -> Arc<dyn ModelClient> {
        Arc::new(ScriptedModelClient::new("stub", vec![Step::AfterInterrupt(result())]))
    }
}

fn new_runtime(factory: impl ModelClientFactory + 'static) -> CoreRuntime {
    let coordinator = EventCoordinator::new(1000);
    let pool = Arc::new(SubAgentPool::new(RuntimeConfig::default(), coordinator.clone(), Arc::new(factory), None));
    let orchestrator =
        Arc::new(FastModeOrchestrator::new(pool.clone(), coordinator.clone(), RuntimeConfig::default(), Arc::new(DefaultPlanParser)));
    CoreRuntime::new(pool, coordinator, orchestrator, Some(1))
}

#[tokio::test]
async fn submit_runs_to_completion_and_is_observable_via_events() {
    init_logger();
    let runtime = new_runtime(AlwaysSucceedFactory);
    let mut stream = runtime.events().await;

    let task_id = runtime.submit("fix a typo", Priority::Normal).await;
    assert!(!task_id.is_empty());

    let mut saw_completed = false;
    for _ in 0..50 {
        if let Ok(Some(event)) = tokio::time::timeout(std::time::Duration::from_millis(100), stream.next()).await {
            if matches!(event.kind, EventKind::Completed { .. }) {
                saw_completed = true;
                break;
            }
        } else {
            break;
        }
    }
    assert!(saw_completed, "expected a Completed event for the submitted task");

    let mut status = runtime.status().await;
    for _ in 0..50 {
        if status.queue_depth == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        status = runtime.status().await;
    }
    assert_eq!(status.queue_depth, 0);
}

#[tokio::test]
async fn cancel_requests_stop_for_an_in_flight_task() {
    init_logger();
    let runtime = new_runtime(HangingFactory);
    let task_id = runtime.submit("say hi", Priority::Normal).await;

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(runtime.cancel(&task_id).await);
    assert!(!runtime.cancel("no-such-task").await);

    // Cancelling alone unsticks a step already blocked inside a single
    // in-flight `pool.execute()`: the orchestrator interrupts the agent and,
    // since it reaches a terminal event within the grace window here, no
    // `shutdown()` is needed to keep this test from hanging.
    let mut status = runtime.status().await;
    for _ in 0..50 {
        if status.queue_depth == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        status = runtime.status().await;
    }
    assert_eq!(status.queue_depth, 0, "cancellation should settle the task without a shutdown()");
}
