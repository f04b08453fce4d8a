use crate::core::{Action, ExecutionMode};
use async_trait::async_trait;

/// Performs one upstream execution for a batch of merged actions.
///
/// This is the transport boundary: implementations post the actions to the
/// remote API and return its execution id. The queue never interprets the
/// error and never retries; retry and timeout policy belong here.
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> anyhow::Result<String>;
}
