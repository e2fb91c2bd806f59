//! Engine subprocess lifecycle.
//!
//! The supervisor owns the spawned mongosync process. Its stdio is inherited
//! so the operator watches the engine directly; nothing is buffered or
//! parsed on the way through.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// Lifecycle of the external sync engine process.
#[async_trait]
pub trait SyncProcess: Send {
    /// Spawn the engine and give it time to bind its control listener.
    async fn start(&mut self) -> Result<()>;

    /// Block until the engine exits on its own.
    async fn wait(&mut self) -> Result<()>;

    /// Kill the engine if it is still running. Idempotent; safe to call
    /// before start and after exit.
    async fn stop(&mut self) -> Result<()>;
}

/// Supervisor for a real mongosync process.
pub struct MongosyncProcess {
    binary: PathBuf,
    source_uri: String,
    destination_uri: String,
    settle_window: Duration,
    child: Option<Child>,
}

impl MongosyncProcess {
    pub fn new(
        binary: PathBuf,
        source_uri: String,
        destination_uri: String,
        settle_window: Duration,
    ) -> Self {
        Self {
            binary,
            source_uri,
            destination_uri,
            settle_window,
            child: None,
        }
    }
}

#[async_trait]
impl SyncProcess for MongosyncProcess {
    async fn start(&mut self) -> Result<()> {
        // One child per run.
        if self.child.is_some() {
            return Err(MigrateError::ProcessLaunch(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "mongosync is already running",
            )));
        }

        info!(binary = %self.binary.display(), "starting mongosync");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--acceptDisclaimer")
            .arg("--cluster0")
            .arg(&self.source_uri)
            .arg("--cluster1")
            .arg(&self.destination_uri);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(MigrateError::ProcessLaunch)?;
        self.child = Some(child);

        // No API call is safe until the engine has opened its listener.
        info!(
            settle_secs = self.settle_window.as_secs(),
            "waiting for mongosync to initialize"
        );
        tokio::time::sleep(self.settle_window).await;
        Ok(())
    }

    async fn wait(&mut self) -> Result<()> {
        let child = self.child.as_mut().ok_or(MigrateError::NotStarted)?;
        let status = child
            .wait()
            .await
            .map_err(|err| MigrateError::ProcessExit(err.to_string()))?;
        self.child = None;

        if status.success() {
            info!("mongosync exited cleanly");
            Ok(())
        } else {
            // Display covers both non-zero exits and death by signal.
            Err(MigrateError::ProcessExit(status.to_string()))
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                info!(%status, "mongosync already exited");
            }
            _ => {
                info!("stopping mongosync");
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill mongosync");
                }
            }
        }
        self.child = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(binary: PathBuf) -> MongosyncProcess {
        MongosyncProcess::new(
            binary,
            "mongodb://src".into(),
            "mongodb://dst".into(),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn start_fails_for_missing_binary() {
        let mut process = supervisor(PathBuf::from("/nonexistent/mongosync"));
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, MigrateError::ProcessLaunch(_)));
    }

    #[tokio::test]
    async fn wait_before_start_is_an_error() {
        let mut process = supervisor(PathBuf::from("/bin/true"));
        let err = process.wait().await.unwrap_err();
        assert!(matches!(err, MigrateError::NotStarted));
    }

    #[tokio::test]
    async fn wait_reports_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = supervisor(script(dir.path(), "exit 0"));
        process.start().await.unwrap();
        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn wait_surfaces_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = supervisor(script(dir.path(), "exit 7"));
        process.start().await.unwrap();
        let err = process.wait().await.unwrap_err();
        match err {
            MigrateError::ProcessExit(reason) => assert!(reason.contains('7'), "{reason}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = supervisor(script(dir.path(), "sleep 30"));
        process.start().await.unwrap();
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, MigrateError::ProcessLaunch(_)));
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = supervisor(script(dir.path(), "sleep 30"));

        // Before start.
        process.stop().await.unwrap();

        process.start().await.unwrap();
        process.stop().await.unwrap();
        // After the child is gone.
        process.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_after_exit_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = supervisor(script(dir.path(), "exit 0"));
        process.start().await.unwrap();
        process.wait().await.unwrap();
        process.stop().await.unwrap();
    }
}
