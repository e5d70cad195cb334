//! Runtime Jobs
//!
//! A job is one pending value-application unit: the target observer, the
//! value to apply, the per-call options and the bookkeeping the scheduler
//! needs (whether the job should cause a rerender, whether it already ran,
//! and which subscription containers have not been notified yet).
//!
//! Jobs are created by `ingest`, performed exactly once, and then either
//! discarded or parked for not-ready container replay.

use indexmap::IndexSet;
use serde_json::Value;

use super::observer::ObserverId;
use super::subscription::ContainerId;
use crate::context::Prism;

/// Per-call options for one mutation.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Apply the value but suppress any visible notification.
    pub background: bool,

    /// Run the observer's registered side effects during perform.
    pub side_effects: bool,

    /// Skip the deep-equality short-circuit and submit a job even for an
    /// unchanged value.
    pub force: bool,

    /// Allow the persistence side effect to write the committed value.
    pub storage: bool,

    /// Drain the queue synchronously after appending the job. Dependent
    /// re-ingestion passes `false` so the already running drain loop picks
    /// the job up in order.
    pub perform: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            background: false,
            side_effects: true,
            force: false,
            storage: true,
            perform: true,
        }
    }
}

impl UpdateConfig {
    /// Convenience: default options with `background` set.
    pub fn background() -> Self {
        Self {
            background: true,
            ..Self::default()
        }
    }

    /// Convenience: default options with `force` set.
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// One pending value-application unit submitted to the scheduler.
#[derive(Debug)]
pub struct Job {
    /// Diagnostic key, copied from the target observer.
    pub key: Option<String>,

    /// The observer this job applies to.
    pub observer: ObserverId,

    /// The value to apply.
    pub value: Value,

    /// Per-call options the job was created with.
    pub config: UpdateConfig,

    /// Whether this job may cause a rerender. Fixed at creation from
    /// "is any render integration registered".
    pub rerender: bool,

    /// Flips to true exactly once, when the scheduler performs the job.
    pub performed: bool,

    /// Containers subscribed to the observer that have not been notified
    /// yet. Snapshotted at creation; drained by the notification pass.
    pub(crate) pending: IndexSet<ContainerId>,
}

impl Job {
    /// Create a job targeting `observer` with the given value and options.
    pub fn new(ctx: &Prism, observer: ObserverId, value: Value, config: UpdateConfig) -> Self {
        Self {
            key: ctx.graph().key_of(observer),
            observer,
            value,
            config,
            rerender: ctx.has_integration(),
            performed: false,
            pending: ctx.graph().subscribed_containers(observer),
        }
    }

    /// Containers still waiting for this job's notification.
    pub fn pending_containers(&self) -> usize {
        self.pending.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_config_defaults() {
        let config = UpdateConfig::default();

        assert!(!config.background);
        assert!(config.side_effects);
        assert!(!config.force);
        assert!(config.storage);
        assert!(config.perform);
    }

    #[test]
    fn update_config_helpers() {
        assert!(UpdateConfig::background().background);
        assert!(UpdateConfig::forced().force);
        assert!(UpdateConfig::forced().side_effects);
    }
}
