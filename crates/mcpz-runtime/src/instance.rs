use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a launched server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Spawned, handshake not yet complete.
    Starting,
    /// Handshake done, serving tools.
    Running,
    /// The process is known to have terminated.
    Exited,
    /// The process may still exist but does not respond, or its state could
    /// not be confirmed. Needs forced termination, not passive reclamation.
    Unreachable,
}

impl InstanceStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Exited)
                | (Starting, Unreachable)
                | (Running, Exited)
                | (Running, Unreachable)
                | (Unreachable, Exited)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// One launched server process, as persisted in the instance registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    /// Fresh per launch.
    pub id: String,
    /// Resolved server this instance runs.
    pub server_name: String,
    /// OS pid, absent when the process could not report one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Pid of the controller that spawned the process.
    pub owner_pid: u32,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: InstanceStatus,
    /// When `status` last changed.
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// A new `starting` record owned by `owner_pid`.
    pub fn starting(server_name: impl Into<String>, pid: Option<u32>, owner_pid: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            server_name: server_name.into(),
            pid,
            owner_pid,
            started_at: now,
            status: InstanceStatus::Starting,
            updated_at: now,
        }
    }

    /// Apply a status change if it is legal. Returns whether the record
    /// changed.
    pub fn transition(&mut self, next: InstanceStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}
