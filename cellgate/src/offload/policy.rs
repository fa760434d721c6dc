//! Background refresh policies and configuration.

use std::time::Duration;

/// What to do with a refresh that runs too long.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Let the task run to completion.
    #[default]
    None,
    /// Abort the task after the duration.
    ///
    /// Aborting only stops waiting: a fetch already started through the
    /// single-flight manager still completes and is stored.
    Cancel(Duration),
    /// Let the task run, but log a warning once it exceeds the duration.
    Warn(Duration),
}

/// Configuration of the [`OffloadManager`](super::OffloadManager).
#[derive(Debug, Clone)]
pub struct OffloadConfig {
    /// Timeout policy applied to every task.
    pub timeout_policy: TimeoutPolicy,
    /// Skip spawning when a task for the same key is already running.
    pub deduplicate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            timeout_policy: TimeoutPolicy::None,
            deduplicate: true,
        }
    }
}

impl OffloadConfig {
    /// Creates a builder with default values.
    pub fn builder() -> OffloadConfigBuilder {
        OffloadConfigBuilder::default()
    }
}

/// Builder for [`OffloadConfig`].
#[derive(Debug, Clone)]
pub struct OffloadConfigBuilder {
    timeout_policy: TimeoutPolicy,
    deduplicate: bool,
}

impl Default for OffloadConfigBuilder {
    fn default() -> Self {
        let config = OffloadConfig::default();
        Self {
            timeout_policy: config.timeout_policy,
            deduplicate: config.deduplicate,
        }
    }
}

impl OffloadConfigBuilder {
    /// Sets the timeout policy.
    pub fn timeout_policy(self, policy: TimeoutPolicy) -> Self {
        Self {
            timeout_policy: policy,
            ..self
        }
    }

    /// Shorthand for [`TimeoutPolicy::Cancel`].
    pub fn timeout(self, duration: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(duration))
    }

    /// Enables or disables per-key deduplication.
    pub fn deduplicate(self, enabled: bool) -> Self {
        Self {
            deduplicate: enabled,
            ..self
        }
    }

    /// Builds the configuration.
    pub fn build(self) -> OffloadConfig {
        OffloadConfig {
            timeout_policy: self.timeout_policy,
            deduplicate: self.deduplicate,
        }
    }
}
