use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle notifications pushed to the host while a queue drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum StatusEvent {
    /// Episodes still waiting for a worker slot.
    Left(usize),
    Current(u32),
    Progress { episode: u32, fraction: f32 },
    Completed(u32),
    /// `episode: None` is the aggregate report at the end of a drain cycle.
    Error { episode: Option<u32>, message: String },
    End,
}

/// Receiver of [`StatusEvent`]s. Called inline from the pipeline, so it must return quickly.
pub trait StatusSink: Send + Sync {
    fn update(&self, event: StatusEvent);
}

impl<F> StatusSink for F
where
    F: Fn(StatusEvent) + Send + Sync,
{
    fn update(&self, event: StatusEvent) {
        self(event)
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl StatusSink for NullSink {
    fn update(&self, _event: StatusEvent) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub episode: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Snapshot of the current drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub remaining: usize,
    pub currently_processing: BTreeSet<u32>,
    pub failures: Vec<FailureRecord>,
}
