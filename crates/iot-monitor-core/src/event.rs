//! Device-to-cloud event surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Background job identifier.
pub type JobId = Uuid;

/// Event sent to the hub as a device-to-cloud message.
///
/// Every notification the agent emits goes through this enum; the
/// transport decides how to frame it on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// One-shot notification sent right after a successful connect.
    Connected,
    /// A background job is about to be spawned.
    JobStarting { script: String },
    /// Stdout chunk from a background job.
    JobOutput {
        job_id: JobId,
        script: String,
        chunk: String,
    },
    /// Stderr chunk or runtime failure from a background job.
    ///
    /// `job_id` is absent when the failure happened before the job
    /// entered the registry (spawn failure).
    JobError {
        job_id: Option<JobId>,
        script: String,
        detail: String,
    },
    /// A background job terminated.
    JobEnded {
        job_id: JobId,
        script: String,
        code: Option<i32>,
    },
    /// Log line relayed from an inline method handler.
    MethodLog { method: String, message: String },
    /// An inline method handler failed.
    MethodError { method: String, detail: String },
}

impl HubEvent {
    /// Event announcing a job spawn attempt.
    #[must_use]
    pub fn job_starting(script: impl Into<String>) -> Self {
        Self::JobStarting {
            script: script.into(),
        }
    }

    /// Event carrying a stdout chunk.
    #[must_use]
    pub fn job_output(job_id: JobId, script: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self::JobOutput {
            job_id,
            script: script.into(),
            chunk: chunk.into(),
        }
    }

    /// Event carrying a stderr chunk or runtime failure.
    #[must_use]
    pub fn job_error(
        job_id: Option<JobId>,
        script: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::JobError {
            job_id,
            script: script.into(),
            detail: detail.into(),
        }
    }

    /// Event announcing a job's termination.
    #[must_use]
    pub fn job_ended(job_id: JobId, script: impl Into<String>, code: Option<i32>) -> Self {
        Self::JobEnded {
            job_id,
            script: script.into(),
            code,
        }
    }

    /// Event relaying an inline handler's log line.
    #[must_use]
    pub fn method_log(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MethodLog {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Event reporting an inline handler failure.
    #[must_use]
    pub fn method_error(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MethodError {
            method: method.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for HubEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected!"),
            Self::JobStarting { script } => write!(f, "Starting {script}"),
            Self::JobOutput { script, chunk, .. } => {
                write!(f, "Message from {script}: {chunk}")
            }
            Self::JobError { script, detail, .. } => write!(f, "Error in {script}: {detail}"),
            Self::JobEnded { script, code, .. } => match code {
                Some(code) => write!(f, "{script} ended on code {code}"),
                None => write!(f, "{script} ended on signal"),
            },
            Self::MethodLog { method, message } => write!(f, "Log from {method}: {message}"),
            Self::MethodError { method, detail } => write!(f, "Error in {method}: {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let job_id = Uuid::new_v4();
        let event = HubEvent::job_ended(job_id, "repeater.js", Some(1));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("job_ended"));

        let parsed: HubEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_ended_display_carries_exit_code() {
        let event = HubEvent::job_ended(Uuid::new_v4(), "repeater.js", Some(1));
        assert_eq!(event.to_string(), "repeater.js ended on code 1");

        let signalled = HubEvent::job_ended(Uuid::new_v4(), "repeater.js", None);
        assert_eq!(signalled.to_string(), "repeater.js ended on signal");
    }

    #[test]
    fn test_method_log_display() {
        let event = HubEvent::method_log("ping", "pong");
        assert_eq!(event.to_string(), "Log from ping: pong");
    }
}
