//! Configuration types.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default broadcast channel capacity for task events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default queue-wide concurrency limit.
pub const DEFAULT_MAX_CONCURRENCY: NonZeroUsize = NonZeroUsize::new(3).unwrap();

/// Default gate capacity.
pub const DEFAULT_GATE_CAPACITY: NonZeroUsize = NonZeroUsize::new(2).unwrap();

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name, used in logs only.
    pub name: String,
    /// Maximum number of tasks in the `Running` state at once.
    pub max_concurrency: NonZeroUsize,
    /// Capacity of the shared gate, i.e. how many task bodies may execute at
    /// once. Independent from `max_concurrency`.
    pub gate_capacity: NonZeroUsize,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
    /// Timeout applied to submitted tasks that do not carry their own.
    pub default_timeout: Option<Duration>,
}

impl QueueConfig {
    /// Create a configuration with the given name and defaults elsewhere.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the queue-wide concurrency limit.
    pub fn with_max_concurrency(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the capacity of the shared gate.
    pub fn with_gate_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.gate_capacity = capacity;
        self
    }

    /// Set the default task timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Build a configuration from `TASK_QUEUE_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let name = lookup("TASK_QUEUE_NAME").unwrap_or(defaults.name);
        let max_concurrency = parse_var(&lookup, "TASK_QUEUE_MAX_CONCURRENCY")?
            .unwrap_or(defaults.max_concurrency);
        let gate_capacity =
            parse_var(&lookup, "TASK_QUEUE_GATE_CAPACITY")?.unwrap_or(defaults.gate_capacity);
        let event_capacity = parse_var::<NonZeroUsize>(&lookup, "TASK_QUEUE_EVENT_CAPACITY")?
            .map_or(defaults.event_capacity, NonZeroUsize::get);
        let default_timeout = parse_var::<u64>(&lookup, "TASK_QUEUE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .or(defaults.default_timeout);

        Ok(Self {
            name,
            max_concurrency,
            gate_capacity,
            event_capacity,
            default_timeout,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "task-queue".to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            gate_capacity: DEFAULT_GATE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            default_timeout: None,
        }
    }
}
