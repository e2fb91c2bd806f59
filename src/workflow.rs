//! The run state machine.
//!
//! Stages execute strictly in sequence and there is no retry across them; a
//! stage failure is terminal for the run. Whenever a failure lands after the
//! engine process was started, the subprocess is stopped best-effort before
//! the original error propagates.

use std::time::Duration;

use tracing::{info, warn};

use crate::control::ControlPlane;
use crate::error::Result;
use crate::sanitize::{CleanupMode, DestinationStore, Sanitizer};
use crate::supervisor::SyncProcess;

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Started,
    Sanitized,
    SyncStarted,
    CommitReady,
    Committed,
    Verified,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Verified | Stage::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            Stage::NotStarted => "not-started",
            Stage::Started => "started",
            Stage::Sanitized => "sanitized",
            Stage::SyncStarted => "sync-started",
            Stage::CommitReady => "commit-ready",
            Stage::Committed => "committed",
            Stage::Verified => "verified",
            Stage::Failed => "failed",
        }
    }
}

/// Drives one migration from engine launch to verified commit.
pub struct Workflow<P, C, S> {
    process: P,
    control: C,
    sanitizer: Option<Sanitizer<S>>,
    cleanup: CleanupMode,
    deadline: Option<Duration>,
    stage: Stage,
}

impl<P, C, S> Workflow<P, C, S>
where
    P: SyncProcess,
    C: ControlPlane,
    S: DestinationStore,
{
    pub fn new(
        process: P,
        control: C,
        sanitizer: Option<Sanitizer<S>>,
        cleanup: CleanupMode,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            process,
            control,
            sanitizer,
            cleanup,
            deadline,
            stage: Stage::NotStarted,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Advance the run by one stage. A no-op on terminal stages.
    pub async fn step(&mut self) -> Result<()> {
        let next = match self.stage {
            Stage::NotStarted => {
                self.process.start().await?;
                Stage::Started
            }
            Stage::Started => {
                self.sanitize().await?;
                Stage::Sanitized
            }
            Stage::Sanitized => {
                self.control.start_sync().await?;
                self.control.wait_for_active(self.deadline).await?;
                Stage::SyncStarted
            }
            Stage::SyncStarted => {
                self.control.wait_for_can_commit(self.deadline).await?;
                Stage::CommitReady
            }
            Stage::CommitReady => {
                self.control.commit().await?;
                Stage::Committed
            }
            Stage::Committed => {
                self.control.verify_committed(self.deadline).await?;
                Stage::Verified
            }
            Stage::Verified | Stage::Failed => self.stage,
        };

        if next != self.stage {
            info!(stage = next.as_str(), "stage complete");
            self.stage = next;
        }
        Ok(())
    }

    /// Run to completion, unwinding the subprocess on failure.
    pub async fn run(&mut self) -> Result<()> {
        while !self.stage.is_terminal() {
            if let Err(err) = self.step().await {
                self.fail().await;
                return Err(err);
            }
        }

        // Once the commit is verified the engine has nothing left to do.
        self.process.stop().await?;
        info!("migration verified and complete");
        Ok(())
    }

    async fn fail(&mut self) {
        // A launch failure leaves nothing to unwind.
        let engine_started = self.stage != Stage::NotStarted;
        self.stage = Stage::Failed;

        if engine_started {
            if let Err(stop_err) = self.process.stop().await {
                // Never mask the original failure with a teardown error.
                warn!(error = %stop_err, "failed to stop mongosync during unwind");
            }
        }
    }

    async fn sanitize(&mut self) -> Result<()> {
        if self.cleanup == CleanupMode::Off {
            return Ok(());
        }
        let Some(sanitizer) = &self.sanitizer else {
            return Ok(());
        };

        // Diagnosis is advisory; a failed pass never blocks the run.
        match sanitizer.diagnose().await {
            Ok(report) => {
                for warning in &report.warnings {
                    warn!("{warning}");
                }
            }
            Err(err) => warn!(error = %err, "destination diagnosis failed"),
        }

        let report = match self.cleanup {
            CleanupMode::Off => return Ok(()),
            CleanupMode::Standard => sanitizer.clean().await?,
            CleanupMode::Thorough => sanitizer.thorough_clean().await?,
        };
        info!(
            databases = report.dropped_databases.len(),
            collections = report.dropped_collections.len(),
            warnings = report.warnings.len(),
            "destination cleanup complete"
        );
        for warning in &report.warnings {
            warn!("{warning}");
        }
        Ok(())
    }
}
