//! Single-assignment result cell handed to each caller at admission.
//!
//! The queue keeps the [`Resolver`] half inside the batch and gives the
//! caller a [`QueuedExecution`]. Only the first resolution is observed;
//! later ones are ignored. A resolver dropped while still pending fails its
//! waiter with [`QueueError::Cancelled`], so a batch that is dropped
//! mid-flush (task aborted, runtime shut down) never strands a caller.

use crate::error::QueueError;
use futures::future::{BoxFuture, FutureExt};
use std::future::IntoFuture;
use tokio::sync::watch;

/// Observable state of a queued execution.
#[derive(Debug, Clone)]
pub enum WaiterState {
    Pending,
    Fulfilled(String),
    Failed(QueueError),
}

impl WaiterState {
    pub fn is_pending(&self) -> bool {
        matches!(self, WaiterState::Pending)
    }

    fn into_result(self) -> Result<String, QueueError> {
        match self {
            WaiterState::Fulfilled(execution_id) => Ok(execution_id),
            WaiterState::Failed(err) => Err(err),
            WaiterState::Pending => Err(QueueError::Cancelled),
        }
    }
}

/// Create a pending waiter and the handle that resolves it.
pub(crate) fn pending() -> (Resolver, QueuedExecution) {
    let (tx, rx) = watch::channel(WaiterState::Pending);
    (Resolver { tx }, QueuedExecution { rx })
}

/// Producer half of a waiter. Owned by the batch the waiter was admitted into.
#[derive(Debug)]
pub(crate) struct Resolver {
    tx: watch::Sender<WaiterState>,
}

impl Resolver {
    /// Returns `false` when the waiter was already resolved.
    pub(crate) fn fulfill(&self, execution_id: String) -> bool {
        self.resolve(WaiterState::Fulfilled(execution_id))
    }

    /// Returns `false` when the waiter was already resolved.
    pub(crate) fn fail(&self, err: QueueError) -> bool {
        self.resolve(WaiterState::Failed(err))
    }

    fn resolve(&self, state: WaiterState) -> bool {
        self.tx.send_if_modified(move |current| {
            if !current.is_pending() {
                return false;
            }
            *current = state;
            true
        })
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.fail(QueueError::Cancelled);
    }
}

/// Handle to the result of a queued execution.
///
/// Await it directly, or call [`wait`](Self::wait). Every caller coalesced
/// into the same batch observes the same execution id or the same error.
/// Clones observe the same result.
#[derive(Debug, Clone)]
pub struct QueuedExecution {
    rx: watch::Receiver<WaiterState>,
}

impl QueuedExecution {
    /// A waiter that is already resolved.
    pub(crate) fn resolved(result: Result<String, QueueError>) -> Self {
        let state = match result {
            Ok(execution_id) => WaiterState::Fulfilled(execution_id),
            Err(err) => WaiterState::Failed(err),
        };
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> WaiterState {
        self.rx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        !self.rx.borrow().is_pending()
    }

    /// Suspend until the batch this waiter belongs to has been executed.
    pub async fn wait(mut self) -> Result<String, QueueError> {
        let resolved = self
            .rx
            .wait_for(|state| !state.is_pending())
            .await
            .map(|state| state.clone());

        match resolved {
            Ok(state) => state.into_result(),
            Err(_) => Err(QueueError::Cancelled),
        }
    }
}

impl IntoFuture for QueuedExecution {
    type Output = Result<String, QueueError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}
