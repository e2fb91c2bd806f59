//! Fetches the mongosync binary when it is not already on disk.
//!
//! The release tarball is downloaded with retries, the single binary member
//! is extracted, and the result is marked executable. Retry exists here and
//! inside the control-plane polling loops; nowhere else.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

const DOWNLOAD_ATTEMPTS: u32 = 5;

/// Path of the binary inside the release tarball.
const TARBALL_MEMBER: &str = "mongosync-ubuntu2404-x86_64-1.14.0/bin/mongosync";

/// Make sure an executable engine exists at `binary_path`.
pub async fn ensure_binary(binary_path: &Path, download_url: &str) -> Result<()> {
    if binary_path.exists() {
        info!(path = %binary_path.display(), "mongosync binary already present");
        return Ok(());
    }

    info!("mongosync binary not found, downloading");
    let archive = binary_path.with_extension("tgz");
    download_with_retry(&archive, download_url).await?;
    extract(&archive, binary_path).await?;
    make_executable(binary_path)?;

    if let Err(err) = tokio::fs::remove_file(&archive).await {
        warn!(error = %err, "failed to remove downloaded archive");
    }
    info!(path = %binary_path.display(), "mongosync binary ready");
    Ok(())
}

async fn download_with_retry(archive: &Path, url: &str) -> Result<()> {
    let http = reqwest::Client::new();
    let mut last_err = None;

    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        info!(attempt, max_attempts = DOWNLOAD_ATTEMPTS, "downloading mongosync");
        match download(&http, archive, url).await {
            Ok(()) => {
                info!(attempt, "download complete");
                return Ok(());
            }
            Err(err) => {
                warn!(attempt, error = %err, "download attempt failed");
                last_err = Some(err);
            }
        }

        if attempt < DOWNLOAD_ATTEMPTS {
            let wait = Duration::from_secs(1 << (attempt - 1));
            info!(wait_secs = wait.as_secs(), "retrying download");
            tokio::time::sleep(wait).await;
        }
    }

    let reason = last_err.map(|err| format!("{err:#}")).unwrap_or_default();
    Err(MigrateError::Provision(format!(
        "download failed after {DOWNLOAD_ATTEMPTS} attempts: {reason}"
    )))
}

async fn download(http: &reqwest::Client, archive: &Path, url: &str) -> anyhow::Result<()> {
    let mut resp = http.get(url).send().await.context("request failed")?;
    anyhow::ensure!(resp.status().is_success(), "server answered {}", resp.status());

    let mut file = tokio::fs::File::create(archive)
        .await
        .context("failed to create archive file")?;
    while let Some(chunk) = resp.chunk().await.context("download interrupted")? {
        file.write_all(&chunk).await.context("failed to write archive")?;
    }
    file.flush().await.context("failed to flush archive")?;
    Ok(())
}

async fn extract(archive: &Path, binary_path: &Path) -> Result<()> {
    info!("extracting mongosync binary");
    let status = Command::new("tar")
        .arg("-xzf")
        .arg(archive)
        .arg("--strip-components=2")
        .arg(TARBALL_MEMBER)
        .status()
        .await
        .map_err(|err| MigrateError::Provision(format!("failed to run tar: {err}")))?;
    if !status.success() {
        return Err(MigrateError::Provision(format!("tar exited with {status}")));
    }

    // tar leaves the member as ./mongosync in the working directory.
    tokio::fs::rename("mongosync", binary_path)
        .await
        .map_err(|err| {
            MigrateError::Provision(format!("failed to move binary into place: {err}"))
        })?;
    Ok(())
}

fn make_executable(binary_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(binary_path, std::fs::Permissions::from_mode(0o755))
        .map_err(|err| MigrateError::Provision(format!("failed to mark binary executable: {err}")))
}
