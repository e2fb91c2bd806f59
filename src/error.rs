//! Crate error type.
//!
//! One enum for the whole run. Transport, decode and status errors are
//! absorbed inside the control-plane polling loops; everything else aborts
//! the migration.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrateError>;

#[derive(Debug, Error)]
pub enum MigrateError {
    /// Required endpoints missing or unusable. Raised before any
    /// orchestration begins.
    #[error("configuration error: {0}")]
    Config(String),

    /// The mongosync binary could not be acquired.
    #[error("failed to provision mongosync binary: {0}")]
    Provision(String),

    /// The engine executable could not be spawned.
    #[error("failed to launch mongosync: {0}")]
    ProcessLaunch(#[source] std::io::Error),

    /// The engine terminated non-zero or was killed by a signal.
    #[error("mongosync exited abnormally ({0})")]
    ProcessExit(String),

    /// A lifecycle call arrived before the engine was ever started.
    #[error("mongosync was never started")]
    NotStarted,

    /// The control plane could not be reached.
    #[error("control plane request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The control plane answered with a body that does not parse.
    #[error("control plane response was not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    /// The progress endpoint answered with a non-success status.
    #[error("control plane returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The engine refused the start request. Carries the response body
    /// verbatim for diagnosis.
    #[error("start request rejected with status {status}: {body}")]
    StartRejected { status: u16, body: String },

    /// The engine refused the commit, either by status or by a logical
    /// `success: false` inside an otherwise fine response.
    #[error("commit rejected with status {status}: {body}")]
    CommitRejected { status: u16, body: String },

    /// User data on the destination could not be enumerated or dropped.
    #[error("destination cleanup failed: {0}")]
    DestinationClean(String),

    /// The read-only destination inspection failed. Advisory only; the
    /// workflow logs this and moves on.
    #[error("destination diagnosis failed: {0}")]
    DestinationDiagnose(String),

    /// A bounded control-plane wait ran out of time.
    #[error("gave up waiting on the control plane after {0:?}")]
    DeadlineExceeded(Duration),
}
