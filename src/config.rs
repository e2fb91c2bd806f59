//! Resolved run configuration.
//!
//! Endpoints come from flags or the `MONGOSYNC_SOURCE`/`MONGOSYNC_TARGET`
//! environment variables. Missing endpoints are fatal before anything else
//! happens.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::{MigrateError, Result};
use crate::sanitize::CleanupMode;

/// Release tarball fetched when no mongosync binary is on disk.
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://fastdl.mongodb.org/tools/mongosync/mongosync-ubuntu2404-x86_64-1.14.0.tgz";

/// Everything a single migration run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_uri: String,
    pub destination_uri: String,
    pub binary_path: PathBuf,
    pub download_url: String,
    pub api_base_url: String,
    pub cleanup: CleanupMode,
    pub wait_deadline: Option<Duration>,
    pub poll_interval: Duration,
    pub settle_window: Duration,
}

impl Config {
    /// The engine only exposes pull-based status; poll it every five seconds.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Time the engine gets to bind its control listener after spawn.
    pub const SETTLE_WINDOW: Duration = Duration::from_secs(5);

    pub fn resolve(cli: Cli) -> Result<Self> {
        let (Some(source_uri), Some(destination_uri)) = (cli.source, cli.destination) else {
            return Err(MigrateError::Config(
                "source and destination connection strings are required; \
                 pass --source/--destination or set MONGOSYNC_SOURCE and MONGOSYNC_TARGET"
                    .into(),
            ));
        };

        Ok(Self {
            source_uri,
            destination_uri,
            binary_path: cli.binary,
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            api_base_url: cli.api_url,
            cleanup: cli.cleanup,
            wait_deadline: cli.wait_timeout_secs.map(Duration::from_secs),
            poll_interval: Self::POLL_INTERVAL,
            settle_window: Self::SETTLE_WINDOW,
        })
    }
}
