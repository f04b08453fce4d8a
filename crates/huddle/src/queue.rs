//! Debounced execution queue.
//!
//! Admissions accumulate into one batch per partition. A batch is flushed
//! when its debounce timer fires, when it reaches `max_actions` devices,
//! when an admission arrives for a different partition, or on an explicit
//! [`flush`](ExecutionQueue::flush) / [`shutdown`](ExecutionQueue::shutdown).
//!
//! All batch and timer bookkeeping happens under one async mutex. The
//! executor call and waiter resolution always run after the lock is
//! released, so a slow upstream never blocks admission of the next batch.

use crate::batch::{merge_actions, Batch};
use crate::core::{Action, ExecutionMode, Partition};
use crate::error::QueueError;
use crate::executor::ActionExecutor;
use crate::settings::QueueSettings;
use crate::stats::{QueueStats, StatsRecorder};
use crate::waiter::{self, QueuedExecution, Resolver};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coalesces independent action submissions into as few executor calls as possible.
///
/// Cheap to clone; clones share the same pending batch.
#[derive(Clone)]
pub struct ExecutionQueue {
    shared: Arc<Shared>,
}

struct Shared {
    executor: Arc<dyn ActionExecutor>,
    settings: QueueSettings,
    state: Mutex<QueueState>,
    /// Mirror of the accumulating batch size, readable without the lock.
    pending_actions: AtomicUsize,
    stats: StatsRecorder,
}

#[derive(Default)]
struct QueueState {
    batch: Option<Batch>,
    timer: Option<FlushTimer>,
    /// Timers that fired and are still executing the batch they detached.
    firing: Vec<FlushTimer>,
    next_timer_id: u64,
}

/// A debounce timer task. At most one is waiting to fire per queue.
struct FlushTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl ExecutionQueue {
    pub fn new(executor: impl ActionExecutor, settings: QueueSettings) -> Self {
        Self::with_shared_executor(Arc::new(executor), settings)
    }

    /// Build a queue around an executor that is also used elsewhere.
    pub fn with_shared_executor(executor: Arc<dyn ActionExecutor>, settings: QueueSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                settings,
                state: Mutex::new(QueueState::default()),
                pending_actions: AtomicUsize::new(0),
                stats: StatsRecorder::default(),
            }),
        }
    }

    pub fn settings(&self) -> QueueSettings {
        self.shared.settings
    }

    /// Admit actions and return a handle to their eventual execution id.
    ///
    /// Actions for the same device are merged, both within this call and
    /// with whatever the accumulating batch already holds. If this admission
    /// closes one or two batches (partition change, size cap), they are
    /// executed before this method returns; otherwise the returned waiter
    /// resolves when the debounce timer flushes the batch.
    ///
    /// Batches closed by this call run inside the returned future. Dropping
    /// the future before it completes (a `timeout`, a `select!`) cancels
    /// them: their waiters fail with [`QueueError::Cancelled`] even if the
    /// upstream call was already sent, and a second closed batch is never
    /// sent at all.
    pub async fn add(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<QueuedExecution, QueueError> {
        if actions.is_empty() {
            return Err(QueueError::EmptyActions);
        }

        let partition = Partition::new(mode, label);
        let actions = merge_actions(actions);
        let (resolver, execution) = waiter::pending();
        let mut detached = Vec::with_capacity(2);

        {
            let mut state = self.shared.state.lock().await;

            let partition_changed = state
                .batch
                .as_ref()
                .is_some_and(|batch| batch.partition() != &partition);
            if partition_changed {
                debug!(?partition, "partition changed, closing accumulating batch");
                detached.extend(self.shared.detach(&mut state));
            }

            let batch = state
                .batch
                .get_or_insert_with(|| Batch::new(partition.clone()));
            batch.extend(actions);
            batch.register(resolver, partition);
            let count = batch.action_count();
            self.shared.pending_actions.store(count, Ordering::Release);

            if count >= self.shared.settings.max_actions() {
                debug!(count, "batch reached max_actions");
                detached.extend(self.shared.detach(&mut state));
            } else if state.timer.is_none() {
                self.schedule_flush(&mut state);
            }
        }

        for batch in detached {
            self.shared.execute(batch).await;
        }

        Ok(execution)
    }

    /// Flush the accumulating batch now, if there is one.
    ///
    /// Results are delivered through the waiters returned by `add()`.
    /// Dropping the future mid-flush cancels the detached batch, as for `add()`.
    pub async fn flush(&self) {
        let batch = {
            let mut state = self.shared.state.lock().await;
            self.shared.detach(&mut state)
        };

        if let Some(batch) = batch {
            self.shared.execute(batch).await;
        }
    }

    /// Stop the debounce timer and drain the accumulating batch.
    ///
    /// Timer tasks are aborted and awaited before the final flush so they
    /// cannot race it. A timer that already detached its batch and is still
    /// waiting on the executor is cancelled too: that batch's waiters fail
    /// with [`QueueError::Cancelled`]. Calling this on an empty queue does
    /// nothing.
    pub async fn shutdown(&self) {
        let timers = {
            let mut state = self.shared.state.lock().await;
            let mut timers = std::mem::take(&mut state.firing);
            timers.extend(state.timer.take());
            timers
        };

        for FlushTimer { id, handle } in timers {
            handle.abort();
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!(timer = id, "flush timer panicked before shutdown");
                }
            }
        }

        self.flush().await;
        debug!("execution queue drained");
    }

    /// Number of devices in the accumulating batch.
    ///
    /// Read without the lock, so it may be momentarily stale. Use it for
    /// metrics and backpressure hints, never for correctness decisions.
    pub fn pending_count(&self) -> usize {
        self.shared.pending_actions.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats.snapshot()
    }

    fn schedule_flush(&self, state: &mut QueueState) {
        state.next_timer_id += 1;
        let id = state.next_timer_id;
        let delay = self.shared.settings.delay();
        let shared = Arc::clone(&self.shared);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_timer(id).await;
        });

        debug!(timer = id, ?delay, "scheduled batch flush");
        state.timer = Some(FlushTimer { id, handle });
    }
}

impl Shared {
    /// Cancel the pending timer and take the batch, leaving the queue empty.
    fn detach(&self, state: &mut QueueState) -> Option<Batch> {
        if let Some(timer) = state.timer.take() {
            timer.handle.abort();
        }
        self.take_batch(state)
    }

    fn take_batch(&self, state: &mut QueueState) -> Option<Batch> {
        self.pending_actions.store(0, Ordering::Release);
        state.batch.take()
    }

    async fn fire_timer(&self, id: u64) {
        let batch = {
            let mut state = self.state.lock().await;

            // Superseded by a size, partition or manual flush.
            let timer = match state.timer.take() {
                Some(timer) if timer.id == id => timer,
                other => {
                    state.timer = other;
                    return;
                }
            };
            let batch = self.take_batch(&mut state);
            if batch.is_some() {
                state.firing.push(timer);
            }
            batch
        };

        let Some(batch) = batch else {
            return;
        };
        self.execute(batch).await;

        self.state
            .lock()
            .await
            .firing
            .retain(|timer| timer.id != id);
    }

    async fn execute(&self, batch: Batch) {
        let (actions, partition, resolvers) = batch.into_parts();
        let action_count = actions.len();
        let mut in_flight = InFlight::new(resolvers, &self.stats);

        info!(
            devices = action_count,
            waiters = in_flight.len(),
            mode = ?partition.mode,
            label = ?partition.label,
            "executing batch"
        );

        let result = self
            .executor
            .execute(actions, partition.mode, partition.label)
            .await;

        let succeeded = result.is_ok();
        match result {
            Ok(execution_id) => {
                debug!(%execution_id, "batch executed");
                in_flight.fulfill(&execution_id);
            }
            Err(err) => {
                warn!(error = %err, devices = action_count, "batch execution failed");
                in_flight.fail(QueueError::from(err));
            }
        }

        self.stats.record(succeeded, action_count, in_flight.len());
    }
}

impl fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("settings", &self.shared.settings)
            .field("pending_actions", &self.pending_count())
            .finish()
    }
}

/// Waiters of a batch whose executor call is in progress.
///
/// If the owning task is dropped before the call returns, the resolvers are
/// dropped with it and every waiter fails with [`QueueError::Cancelled`].
struct InFlight<'a> {
    resolvers: Vec<Resolver>,
    stats: &'a StatsRecorder,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(resolvers: Vec<Resolver>, stats: &'a StatsRecorder) -> Self {
        Self {
            resolvers,
            stats,
            settled: false,
        }
    }

    fn len(&self) -> usize {
        self.resolvers.len()
    }

    fn fulfill(&mut self, execution_id: &str) {
        for resolver in &self.resolvers {
            resolver.fulfill(execution_id.to_string());
        }
        self.settled = true;
    }

    fn fail(&mut self, err: QueueError) {
        for resolver in &self.resolvers {
            resolver.fail(err.clone());
        }
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.stats.record_cancelled(self.resolvers.len());
            warn!(
                waiters = self.resolvers.len(),
                "batch dropped before the executor returned, cancelling its waiters"
            );
        }
    }
}
