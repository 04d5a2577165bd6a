//! Background job records.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use iot_monitor_core::JobId;

/// A live background job in the supervisor's registry.
///
/// The supervisor holds the exclusive handle to the child's I/O streams;
/// this record is the observable part. Entries are removed when the job
/// reaches a terminal event.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Script the runtime is executing.
    pub script: PathBuf,
    /// OS process id, if the child reported one.
    pub pid: Option<u32>,
    /// Spawn timestamp (Unix epoch seconds).
    pub started_at: i64,
}

pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
