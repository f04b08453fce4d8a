//! Queue configuration.

use crate::error::QueueError;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_DELAY_MS: u64 = 500;
const DEFAULT_MAX_ACTIONS: usize = 20;

/// Debounce window and size cap of an [`ExecutionQueue`](crate::ExecutionQueue).
///
/// Settings are validated when built, so a queue never runs with a zero
/// delay or a zero size cap. Deserializing goes through the same checks:
///
/// ```ignore
/// let settings: QueueSettings = serde_json::from_str(r#"{"delay_ms": 250, "max_actions": 10}"#)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawQueueSettings")]
pub struct QueueSettings {
    delay: Duration,
    max_actions: usize,
}

impl QueueSettings {
    /// Validate and build settings.
    ///
    /// `delay` must be greater than zero and `max_actions` at least one.
    pub fn new(delay: Duration, max_actions: usize) -> Result<Self, QueueError> {
        if delay.is_zero() {
            return Err(QueueError::invalid_settings("delay must be greater than zero"));
        }
        if max_actions == 0 {
            return Err(QueueError::invalid_settings("max_actions must be at least 1"));
        }
        Ok(Self { delay, max_actions })
    }

    /// Time between the first admission into an empty batch and its automatic flush.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of distinct devices that forces an immediate flush.
    pub fn max_actions(&self) -> usize {
        self.max_actions
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            max_actions: DEFAULT_MAX_ACTIONS,
        }
    }
}

/// Serialized form of [`QueueSettings`].
#[derive(Debug, Deserialize)]
struct RawQueueSettings {
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
    #[serde(default = "default_max_actions")]
    max_actions: usize,
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

fn default_max_actions() -> usize {
    DEFAULT_MAX_ACTIONS
}

impl TryFrom<RawQueueSettings> for QueueSettings {
    type Error = QueueError;

    fn try_from(raw: RawQueueSettings) -> Result<Self, Self::Error> {
        QueueSettings::new(Duration::from_millis(raw.delay_ms), raw.max_actions)
    }
}
