//! # Blinds Demo
//!
//! Every room closes its blinds independently at dusk. Without batching that
//! is one upstream execution per room; with an execution queue the requests
//! landing inside the debounce window share a single execution.
//!
//! Queue settings can be overridden with a JSON document:
//!
//! ```text
//! HUDDLE_QUEUE='{"delay_ms": 250, "max_actions": 4}' cargo run -p blinds-demo
//! ```

use anyhow::Result;
use async_trait::async_trait;
use huddle_core::{
    Action, ActionClient, ActionExecutor, Command, ExecutionMode, QueueSettings,
};
use std::env;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

// ============================================================================
// Simulated gateway (stands in for the HTTP transport)
// ============================================================================

struct SimulatedGateway {
    latency: Duration,
}

#[async_trait]
impl ActionExecutor for SimulatedGateway {
    async fn execute(
        &self,
        actions: Vec<Action>,
        mode: Option<ExecutionMode>,
        label: Option<String>,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "label": label,
            "actions": actions,
        });
        info!(?mode, "POST /exec/apply {}", payload);

        tokio::time::sleep(self.latency).await;
        Ok(Uuid::new_v4().to_string())
    }
}

// ============================================================================
// Main
// ============================================================================

fn load_settings() -> Result<QueueSettings> {
    match env::var("HUDDLE_QUEUE") {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(_) => Ok(QueueSettings::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let settings = load_settings()?;
    info!(
        delay_ms = settings.delay().as_millis() as u64,
        max_actions = settings.max_actions(),
        "starting blinds demo"
    );

    let gateway = SimulatedGateway {
        latency: Duration::from_millis(150),
    };
    let client = ActionClient::with_queue(gateway, settings);

    let rooms = ["kitchen", "living-room", "office", "bedroom", "bathroom", "hall"];
    let mut tasks = Vec::new();

    for (i, room) in rooms.iter().enumerate() {
        let client = client.clone();
        let device = format!("io://1234-5678-9012/{}", i + 1);
        let room = room.to_string();

        tasks.push(tokio::spawn(async move {
            // Rooms react a little out of step with each other.
            tokio::time::sleep(Duration::from_millis(20 * i as u64)).await;

            let actions = vec![Action::new(
                device,
                vec![Command::with_parameters("setClosure", [100])],
            )];
            let result = client.execute(actions, None, Some("dusk".into())).await;
            (room, result)
        }));
    }

    // The office also wants its slats tilted; same device, same window.
    let tilt = client
        .submit(
            vec![Action::new(
                "io://1234-5678-9012/3",
                vec![Command::with_parameters("setOrientation", [45])],
            )],
            None,
            Some("dusk".into()),
        )
        .await?;

    for task in tasks {
        let (room, result) = task.await?;
        match result {
            Ok(execution_id) => info!(%room, %execution_id, "blinds closed"),
            Err(err) => warn!(%room, error = %err, "blinds did not close"),
        }
    }
    info!(execution_id = %tilt.await?, "office slats tilted");

    // A high-priority request never shares an execution with the dusk batch.
    let stop = client
        .execute(
            vec![Action::new("io://1234-5678-9012/1", vec![Command::new("stop")])],
            Some(ExecutionMode::HighPriority),
            None,
        )
        .await?;
    info!(execution_id = %stop, "kitchen stopped");

    client.close().await;
    if let Some(queue) = client.queue() {
        info!(stats = ?queue.stats(), "queue drained");
    }

    Ok(())
}
