//! Testing utilities for Huddle.
//!
//! [`RecordingExecutor`] stands in for the upstream transport: it records
//! every batch it is handed, can be slowed down or made to fail, and hands
//! out unique execution ids.
//!
//! ```ignore
//! let executor = RecordingExecutor::new();
//! let queue = ExecutionQueue::new(executor.clone(), settings);
//!
//! let waiter = queue.add(vec![action("dev1", &["open"])], None, None).await?;
//! waiter.await?;
//!
//! assert_eq!(executor.call_count(), 1);
//! ```

use anyhow::Result;
use async_trait::async_trait;
use huddle_core::{Action, ActionExecutor, Command, ExecutionMode};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

/// Error raised by a failing [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upstream error: {0}")]
pub struct UpstreamError(pub String);

/// One executor invocation as seen by the transport.
#[derive(Debug, Clone)]
pub struct ExecutionCall {
    pub actions: Vec<Action>,
    pub mode: Option<ExecutionMode>,
    pub label: Option<String>,
    /// Id returned for this call, `None` when it failed.
    pub execution_id: Option<String>,
}

impl ExecutionCall {
    pub fn devices(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.device_url.as_str()).collect()
    }

    /// Command names sent to `device`, in order. Empty if the device is absent.
    pub fn commands_for(&self, device: &str) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| a.device_url == device)
            .flat_map(|a| a.commands.iter().map(|c| c.name.as_str()))
            .collect()
    }
}

/// Executor that records calls instead of talking to a remote API.
///
/// Clones share the same call log, so keep one clone for assertions and
/// hand another to the queue.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    calls: Arc<Mutex<Vec<ExecutionCall>>>,
    recorded: Arc<Notify>,
    latency: Option<Duration>,
    failure: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call with `UpstreamError(message)`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<ExecutionCall> {
        self.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().len()
    }

    pub fn last_call(&self) -> Option<ExecutionCall> {
        self.lock().last().cloned()
    }

    /// Wait until at least `count` calls have started.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.recorded.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExecutionCall>> {
        // Poisoned by a panicking test thread; the log itself is intact.
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<String> {
        let execution_id = match self.failure {
            Some(_) => None,
            None => Some(Uuid::new_v4().to_string()),
        };

        self.lock().push(ExecutionCall {
            actions,
            mode,
            label,
            execution_id: execution_id.clone(),
        });
        self.recorded.notify_waiters();

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(message) = &self.failure {
            return Err(UpstreamError(message.clone()).into());
        }
        Ok(execution_id.unwrap_or_default())
    }
}

/// Build an action from command names.
pub fn action(device: &str, commands: &[&str]) -> Action {
    Action::new(device, commands.iter().map(|name| Command::new(*name)).collect())
}
