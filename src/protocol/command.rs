//! Command and response definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApplyError;
use crate::sim::SimTime;

use super::value::SignalValue;

/// One decoded unit of work received from the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Correlation id, echoed in the response.
    pub request_id: Uuid,

    /// The operation to apply.
    #[serde(flatten)]
    pub op: Operation,
}

impl Command {
    /// Creates a command with a fresh request id.
    #[must_use]
    pub fn new(op: Operation) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            op,
        }
    }

    /// Sets a custom request ID (useful for correlation).
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// All supported operations.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// Liveness check.
    Ping,

    /// Checks that an object exists.
    Lookup { path: String },

    /// Reads an object's current value.
    Read { path: String },

    /// Deposits a value without delay.
    Write { path: String, value: SignalValue },

    /// Forces a value until released.
    Force { path: String, value: SignalValue },

    /// Releases a previous force.
    Release { path: String },

    /// Queries the current simulation time.
    Time,

    /// Returns control to the simulator for `ticks` time units.
    Advance { ticks: u64 },

    /// Prints a line on the simulator's output.
    Print { message: String },

    /// Asks the simulator to end the run.
    Finish,
}

impl Operation {
    /// Operation name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Lookup { .. } => "lookup",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Force { .. } => "force",
            Self::Release { .. } => "release",
            Self::Time => "time",
            Self::Advance { .. } => "advance",
            Self::Print { .. } => "print",
            Self::Finish => "finish",
        }
    }

    /// Object path the operation targets, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Lookup { path }
            | Self::Read { path }
            | Self::Write { path, .. }
            | Self::Force { path, .. }
            | Self::Release { path } => Some(path),
            Self::Ping | Self::Time | Self::Advance { .. } | Self::Print { .. } | Self::Finish => None,
        }
    }
}

/// Result of applying a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Request id of the command this answers.
    pub request_id: Uuid,

    /// Outcome.
    #[serde(flatten)]
    pub status: Status,
}

/// Response status.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    /// The command was applied.
    Ok { result: Reply },
    /// The simulation rejected the command. The session is still open.
    Error { kind: String, message: String },
}

/// Payload of a successful response.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ack,
    Pong { time: SimTime },
    Found { path: String },
    Value { path: String, value: SignalValue },
    Time { time: SimTime },
}

impl Response {
    /// Builds a successful response.
    #[must_use]
    pub const fn ok(request_id: Uuid, result: Reply) -> Self {
        Self {
            request_id,
            status: Status::Ok { result },
        }
    }

    /// Builds a failed response from an apply error.
    #[must_use]
    pub fn failed(request_id: Uuid, err: &ApplyError) -> Self {
        Self {
            request_id,
            status: Status::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }

    /// Returns true if the command succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok { .. })
    }

    /// Returns the reply payload of a successful response.
    #[must_use]
    pub const fn reply(&self) -> Option<&Reply> {
        match &self.status {
            Status::Ok { result } => Some(result),
            Status::Error { .. } => None,
        }
    }
}
