//! Front door for callers that may or may not want batching.

use crate::batch::merge_actions;
use crate::core::{Action, ExecutionMode};
use crate::error::QueueError;
use crate::executor::ActionExecutor;
use crate::queue::ExecutionQueue;
use crate::settings::QueueSettings;
use crate::waiter::QueuedExecution;
use std::sync::Arc;
use tracing::debug;

/// Executes action groups either directly or through an [`ExecutionQueue`].
///
/// ```ignore
/// let client = ActionClient::with_queue(executor, QueueSettings::default());
///
/// // Both calls end up in one upstream execution.
/// let (a, b) = tokio::join!(
///     client.execute(vec![close_living_room], None, None),
///     client.execute(vec![close_kitchen], None, None),
/// );
/// assert_eq!(a?, b?);
///
/// client.close().await;
/// ```
#[derive(Clone)]
pub struct ActionClient {
    executor: Arc<dyn ActionExecutor>,
    queue: Option<ExecutionQueue>,
}

impl ActionClient {
    /// Client that sends every request upstream immediately.
    pub fn new(executor: impl ActionExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            queue: None,
        }
    }

    /// Client that batches requests with the given settings.
    pub fn with_queue(executor: impl ActionExecutor, settings: QueueSettings) -> Self {
        let executor: Arc<dyn ActionExecutor> = Arc::new(executor);
        let queue = ExecutionQueue::with_shared_executor(Arc::clone(&executor), settings);
        Self {
            executor,
            queue: Some(queue),
        }
    }

    pub fn queue(&self) -> Option<&ExecutionQueue> {
        self.queue.as_ref()
    }

    /// Execute actions and wait for the execution id.
    pub async fn execute(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<String, QueueError> {
        match &self.queue {
            Some(queue) => queue.add(actions, mode, label).await?.wait().await,
            None => self.execute_direct(actions, mode, label).await,
        }
    }

    /// Submit actions and return a handle instead of waiting.
    ///
    /// Without a queue the request is executed before returning and the
    /// handle is already resolved.
    pub async fn submit(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<QueuedExecution, QueueError> {
        match &self.queue {
            Some(queue) => queue.add(actions, mode, label).await,
            None => {
                if actions.is_empty() {
                    return Err(QueueError::EmptyActions);
                }
                let result = self.execute_direct(actions, mode, label).await;
                Ok(QueuedExecution::resolved(result))
            }
        }
    }

    pub async fn flush(&self) {
        if let Some(queue) = &self.queue {
            queue.flush().await;
        }
    }

    /// Pending devices in the queue, 0 when batching is disabled.
    pub fn pending_count(&self) -> usize {
        self.queue.as_ref().map_or(0, ExecutionQueue::pending_count)
    }

    /// Drain the queue. Safe to call more than once.
    pub async fn close(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown().await;
        }
    }

    async fn execute_direct(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<String, QueueError> {
        if actions.is_empty() {
            return Err(QueueError::EmptyActions);
        }
        let actions = merge_actions(actions);
        debug!(devices = actions.len(), ?mode, ?label, "executing without queue");
        Ok(self.executor.execute(actions, mode, label).await?)
    }
}
