//! Control-plane client for the sync engine's local HTTP API.
//!
//! The engine only exposes pull-based status, so progress is polled on a
//! fixed interval. Transient transport, decode and status failures inside
//! the wait loops are retried on the same cadence: the engine can be briefly
//! unreachable while it shuffles internal state, and there is nothing to
//! roll back to, so waiting beats failing fast.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MigrateError, Result};

/// State reported before `start` has been issued.
pub const IDLE_STATE: &str = "IDLE";

/// Terminal state reported after a successful commit.
pub const COMMITTED_STATE: &str = "COMMITTED";

/// How user writes are blocked while the migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteBlocking {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "sourceAndDestination")]
    SourceAndDestination,
}

/// Fixed per-run options the client is constructed with.
#[derive(Debug, Clone)]
pub struct ControlOptions {
    pub base_url: String,
    /// Role name the engine expects for the source cluster.
    pub source_role: String,
    /// Role name the engine expects for the destination cluster.
    pub destination_role: String,
    pub verification_enabled: bool,
    pub write_blocking: WriteBlocking,
    pub poll_interval: Duration,
}

impl From<&Config> for ControlOptions {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            source_role: "cluster0".to_string(),
            destination_role: "cluster1".to_string(),
            verification_enabled: false,
            write_blocking: WriteBlocking::SourceAndDestination,
            poll_interval: config.poll_interval,
        }
    }
}

#[derive(Debug, Serialize)]
struct Verification {
    enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    source: &'a str,
    destination: &'a str,
    verification: Verification,
    enable_user_write_blocking: WriteBlocking,
}

/// Point-in-time progress as reported by the engine. Fetched, consumed,
/// discarded; never cached across polls.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(rename = "canCommit")]
    pub can_commit: bool,
    /// Engine-defined label, opaque except [`IDLE_STATE`] and
    /// [`COMMITTED_STATE`].
    pub state: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressResponse {
    pub progress: ProgressSnapshot,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    success: bool,
}

/// Operations the workflow needs from the engine's control surface.
#[async_trait]
pub trait ControlPlane: Send {
    async fn start_sync(&self) -> Result<()>;

    /// Wait until the engine has left `IDLE` after a start request.
    async fn wait_for_active(&self, deadline: Option<Duration>) -> Result<()>;

    /// Wait until the engine judges itself caught up enough to commit.
    async fn wait_for_can_commit(&self, deadline: Option<Duration>) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    /// Wait until the engine reports the terminal `COMMITTED` state.
    async fn verify_committed(&self, deadline: Option<Duration>) -> Result<()>;
}

/// Failures worth retrying inside a wait loop.
fn is_transient(err: &MigrateError) -> bool {
    matches!(
        err,
        MigrateError::Transport(_)
            | MigrateError::Decode(_)
            | MigrateError::UnexpectedStatus { .. }
    )
}

/// HTTP client for a live engine.
pub struct ControlPlaneClient {
    options: ControlOptions,
    http: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(options: ControlOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(MigrateError::Transport)?;
        Ok(Self { options, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.options.base_url.trim_end_matches('/'), path)
    }

    /// One fetch-and-decode of the progress endpoint.
    ///
    /// A snapshot that is not ready yet is a normal return, not an error.
    pub async fn poll_progress(&self) -> Result<ProgressResponse> {
        let resp = self
            .http
            .get(self.endpoint("progress"))
            .send()
            .await
            .map_err(MigrateError::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(MigrateError::Transport)?;

        if !status.is_success() {
            return Err(MigrateError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(MigrateError::Decode)
    }

    /// Poll until `ready` accepts a snapshot, absorbing transient failures.
    async fn wait_until<F>(
        &self,
        waiting_for: &str,
        deadline: Option<Duration>,
        mut ready: F,
    ) -> Result<()>
    where
        F: FnMut(&ProgressResponse) -> bool + Send,
    {
        let started = Instant::now();
        loop {
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    return Err(MigrateError::DeadlineExceeded(limit));
                }
            }

            match self.poll_progress().await {
                Ok(report) => {
                    info!(
                        state = %report.progress.state,
                        can_commit = report.progress.can_commit,
                        info = %report.progress.info,
                        "progress"
                    );
                    if ready(&report) {
                        return Ok(());
                    }
                    debug!(waiting_for, "not there yet");
                }
                Err(err) if is_transient(&err) => {
                    warn!(error = %err, waiting_for, "progress poll failed, will retry");
                }
                Err(err) => return Err(err),
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn start_sync(&self) -> Result<()> {
        let payload = StartRequest {
            source: &self.options.source_role,
            destination: &self.options.destination_role,
            verification: Verification {
                enabled: self.options.verification_enabled,
            },
            enable_user_write_blocking: self.options.write_blocking,
        };

        info!("requesting sync start");
        let resp = self
            .http
            .post(self.endpoint("start"))
            .json(&payload)
            .send()
            .await
            .map_err(MigrateError::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(MigrateError::Transport)?;

        if !status.is_success() {
            return Err(MigrateError::StartRejected {
                status: status.as_u16(),
                body,
            });
        }
        info!("sync started");
        Ok(())
    }

    async fn wait_for_active(&self, deadline: Option<Duration>) -> Result<()> {
        info!("waiting for the engine to leave IDLE");
        self.wait_until("a non-IDLE state", deadline, |report| {
            report.progress.state != IDLE_STATE
        })
        .await
    }

    async fn wait_for_can_commit(&self, deadline: Option<Duration>) -> Result<()> {
        info!("waiting until the engine can commit");
        // canCommit alone decides readiness; the state label does not matter.
        self.wait_until("canCommit", deadline, |report| report.progress.can_commit)
            .await
    }

    async fn commit(&self) -> Result<()> {
        info!("committing sync");
        let resp = self
            .http
            .post(self.endpoint("commit"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(MigrateError::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(MigrateError::Transport)?;

        if !status.is_success() {
            return Err(MigrateError::CommitRejected {
                status: status.as_u16(),
                body,
            });
        }

        // A 200 can still carry a logical failure; both checks are required.
        let commit: CommitResponse = serde_json::from_str(&body).map_err(MigrateError::Decode)?;
        if !commit.success {
            return Err(MigrateError::CommitRejected {
                status: status.as_u16(),
                body,
            });
        }
        info!("commit accepted");
        Ok(())
    }

    async fn verify_committed(&self, deadline: Option<Duration>) -> Result<()> {
        info!("verifying the sync reached COMMITTED");
        self.wait_until(COMMITTED_STATE, deadline, |report| {
            report.progress.state == COMMITTED_STATE
        })
        .await
    }
}
