//! Behaviour of the execution queue: coalescing, flush triggers, failure
//! fan-out, and draining.
//!
//! Every test runs on a paused clock, so debounce windows elapse exactly
//! when the runtime has nothing else to do.

use crate::{
    Action, ActionExecutor, Command, ExecutionMode, ExecutionQueue, QueueError, QueueSettings,
    WaiterState,
};
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Test executor
// ============================================================================

#[derive(Debug, Clone)]
struct Call {
    actions: Vec<Action>,
    mode: Option<ExecutionMode>,
    label: Option<String>,
    at: Instant,
}

#[derive(Clone, Default)]
struct TestExecutor {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_with: Option<String>,
    latency: Option<Duration>,
}

impl TestExecutor {
    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ActionExecutor for TestExecutor {
    async fn execute(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<String> {
        let number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                actions,
                mode,
                label,
                at: Instant::now(),
            });
            calls.len()
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match &self.fail_with {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(format!("exec-{number}")),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn settings(delay_ms: u64, max_actions: usize) -> QueueSettings {
    QueueSettings::new(Duration::from_millis(delay_ms), max_actions).unwrap()
}

fn action(device: &str, commands: &[&str]) -> Action {
    Action::new(device, commands.iter().map(|name| Command::new(*name)).collect())
}

fn devices(call: &Call) -> Vec<&str> {
    call.actions.iter().map(|a| a.device_url.as_str()).collect()
}

fn command_names(action: &Action) -> Vec<&str> {
    action.commands.iter().map(|c| c.name.as_str()).collect()
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_same_device_commands_merge_within_window() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let first = queue.add(vec![action("dev1", &["close"])], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();

    assert_eq!(executor.call_count(), 0);
    assert_eq!(queue.pending_count(), 1);

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_eq!(first, second);

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(devices(&calls[0]), ["dev1"]);
    assert_eq!(command_names(&calls[0].actions[0]), ["close", "open"]);
}

#[tokio::test(start_paused = true)]
async fn test_single_call_duplicates_are_merged_before_batching() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 2));

    // Two entries for one device count as one toward max_actions.
    let waiter = queue
        .add(
            vec![action("dev1", &["up"]), action("dev1", &["stop"])],
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(queue.pending_count(), 1);
    assert_eq!(executor.call_count(), 0);

    waiter.await.unwrap();
    let calls = executor.calls();
    assert_eq!(command_names(&calls[0].actions[0]), ["up", "stop"]);
}

#[tokio::test(start_paused = true)]
async fn test_device_order_is_insertion_order() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let a = queue.add(vec![action("dev2", &["x"])], None, None).await.unwrap();
    let b = queue
        .add(vec![action("dev1", &["y"]), action("dev2", &["z"])], None, None)
        .await
        .unwrap();

    assert_eq!(a.await.unwrap(), b.await.unwrap());
    let calls = executor.calls();
    assert_eq!(devices(&calls[0]), ["dev2", "dev1"]);
    assert_eq!(command_names(&calls[0].actions[0]), ["x", "z"]);
}

#[tokio::test(start_paused = true)]
async fn test_timer_is_not_restarted_by_later_admissions() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));
    let start = Instant::now();

    let first = queue.add(vec![action("dev1", &["a"])], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = queue.add(vec![action("dev2", &["b"])], None, None).await.unwrap();

    first.await.unwrap();
    second.await.unwrap();

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    let elapsed = calls[0].at - start;
    assert!(elapsed >= Duration::from_millis(500), "flushed early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "flushed late: {elapsed:?}");
}

// ============================================================================
// Flush triggers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_max_actions_flushes_before_delay() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 2));

    let w1 = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    let w2 = queue.add(vec![action("dev2", &["open"])], None, None).await.unwrap();

    // Executed inline by the second add.
    assert_eq!(executor.call_count(), 1);
    assert!(w1.is_resolved());
    assert!(w2.is_resolved());
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(devices(&executor.calls()[0]), ["dev1", "dev2"]);

    let w3 = queue.add(vec![action("dev3", &["open"])], None, None).await.unwrap();
    assert_eq!(executor.call_count(), 1);

    let id3 = w3.await.unwrap();
    assert_ne!(id3, w1.await.unwrap());
    assert_eq!(w2.await.unwrap(), "exec-1");

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(devices(&calls[1]), ["dev3"]);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_admission_flushes_whole_batch() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 2));

    let waiter = queue
        .add(
            vec![action("a", &["x"]), action("b", &["x"]), action("c", &["x"])],
            None,
            None,
        )
        .await
        .unwrap();

    assert!(waiter.is_resolved());
    assert_eq!(devices(&executor.calls()[0]), ["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_mode_change_flushes_previous_batch_first() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let normal = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    let priority = queue
        .add(
            vec![action("dev1", &["close"])],
            Some(ExecutionMode::HighPriority),
            None,
        )
        .await
        .unwrap();

    assert_eq!(executor.call_count(), 1);
    assert!(normal.is_resolved());
    assert!(!priority.is_resolved());

    let normal_id = normal.await.unwrap();
    let priority_id = priority.await.unwrap();
    assert_ne!(normal_id, priority_id);

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].mode, None);
    assert_eq!(command_names(&calls[0].actions[0]), ["open"]);
    assert_eq!(calls[1].mode, Some(ExecutionMode::HighPriority));
    assert_eq!(command_names(&calls[1].actions[0]), ["close"]);
}

#[tokio::test(start_paused = true)]
async fn test_label_change_flushes_previous_batch_first() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let morning = queue
        .add(vec![action("dev1", &["open"])], None, Some("morning".into()))
        .await
        .unwrap();
    let evening = queue
        .add(vec![action("dev2", &["close"])], None, Some("evening".into()))
        .await
        .unwrap();

    assert_ne!(morning.await.unwrap(), evening.await.unwrap());

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].label.as_deref(), Some("morning"));
    assert_eq!(calls[1].label.as_deref(), Some("evening"));
}

#[tokio::test(start_paused = true)]
async fn test_partition_change_and_size_cap_in_one_admission() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 1));

    let first = queue.add(vec![action("dev1", &["a"])], None, None).await.unwrap();
    let second = queue
        .add(vec![action("dev2", &["b"])], Some(ExecutionMode::Geolocated), None)
        .await
        .unwrap();

    assert!(first.is_resolved());
    assert!(second.is_resolved());

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(devices(&calls[0]), ["dev1"]);
    assert_eq!(calls[1].mode, Some(ExecutionMode::Geolocated));
}

#[tokio::test(start_paused = true)]
async fn test_manual_flush_supersedes_timer() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let waiter = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    queue.flush().await;

    assert_eq!(executor.call_count(), 1);
    assert_eq!(waiter.await.unwrap(), "exec-1");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_on_empty_queue_is_noop() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    queue.flush().await;
    assert_eq!(executor.call_count(), 0);
}

// ============================================================================
// Failures and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_executor_error_reaches_every_waiter() {
    let executor = TestExecutor::failing("gateway offline");
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let a = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    let b = queue.add(vec![action("dev2", &["open"])], None, None).await.unwrap();

    for waiter in [a, b] {
        let err = waiter.await.unwrap_err();
        let source = err.execution_error().expect("executor error");
        assert_eq!(source.to_string(), "gateway offline");
    }
    assert_eq!(executor.call_count(), 1);
    assert_eq!(queue.stats().batches_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_admission_is_rejected() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let err = queue.add(Vec::new(), None, None).await.unwrap_err();
    assert!(matches!(err, QueueError::EmptyActions));
    assert_eq!(queue.pending_count(), 0);

    queue.shutdown().await;
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_flush_cancels_its_waiters() {
    let executor = TestExecutor::slow(Duration::from_secs(3600));
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let waiter = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    let observer = waiter.clone();

    let flusher = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush().await })
    };
    while executor.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    flusher.abort();

    assert!(waiter.await.unwrap_err().is_cancelled());
    assert!(matches!(observer.state(), WaiterState::Failed(QueueError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_add_cancels_the_batch_it_closed() {
    let executor = TestExecutor::slow(Duration::from_secs(3600));
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let first = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();

    // The mode change closes the first batch inside this call.
    let closing = queue.add(
        vec![action("dev2", &["open"])],
        Some(ExecutionMode::HighPriority),
        None,
    );
    let result = tokio::time::timeout(Duration::from_millis(100), closing).await;
    assert!(result.is_err());

    assert_eq!(executor.call_count(), 1);
    assert!(matches!(first.state(), WaiterState::Failed(QueueError::Cancelled)));

    let stats = queue.stats();
    assert_eq!(stats.batches_cancelled, 1);
    assert_eq!(stats.batches_flushed, 0);
    assert_eq!(stats.waiters_resolved, 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_pending_batch() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    let waiters = vec![
        queue.add(vec![action("dev1", &["a"])], None, None).await.unwrap(),
        queue.add(vec![action("dev2", &["b"])], None, None).await.unwrap(),
        queue.add(vec![action("dev1", &["c"])], None, None).await.unwrap(),
    ];
    assert_eq!(queue.pending_count(), 2);

    queue.shutdown().await;

    assert!(waiters.iter().all(|w| w.is_resolved()));
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(executor.call_count(), 1);

    queue.shutdown().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(executor.call_count(), 1);

    let stats = queue.stats();
    assert_eq!(stats.batches_flushed, 1);
    assert_eq!(stats.actions_flushed, 2);
    assert_eq!(stats.waiters_resolved, 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_timer_batch_in_flight() {
    let executor = TestExecutor::slow(Duration::from_secs(3600));
    let queue = ExecutionQueue::new(executor.clone(), settings(10, 20));

    let waiter = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(executor.call_count(), 1);
    assert!(!waiter.is_resolved());

    queue.shutdown().await;

    assert!(waiter.is_resolved());
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(executor.call_count(), 1);

    let stats = queue.stats();
    assert_eq!(stats.batches_cancelled, 1);
    assert_eq!(stats.batches_flushed + stats.batches_failed, 0);
    assert_eq!(stats.waiters_resolved, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_batch_completes_without_shutdown() {
    let executor = TestExecutor::slow(Duration::from_millis(50));
    let queue = ExecutionQueue::new(executor.clone(), settings(10, 20));

    let waiter = queue.add(vec![action("dev1", &["open"])], None, None).await.unwrap();
    assert_eq!(waiter.await.unwrap(), "exec-1");

    // The finished timer no longer counts as in flight.
    queue.shutdown().await;
    let stats = queue.stats();
    assert_eq!(stats.batches_flushed, 1);
    assert_eq!(stats.batches_cancelled, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_without_admissions_is_noop() {
    let executor = TestExecutor::default();
    let queue = ExecutionQueue::new(executor.clone(), settings(500, 20));

    queue.shutdown().await;
    queue.shutdown().await;

    assert_eq!(executor.call_count(), 0);
    assert_eq!(queue.stats().batches_flushed, 0);
}
