//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

use crate::sanitize::CleanupMode;

#[derive(Debug, Parser)]
#[command(
    name = "mosy",
    version,
    about = "Drive a one-shot mongosync cluster migration to completion"
)]
pub struct Cli {
    /// Source cluster connection string.
    #[arg(long, env = "MONGOSYNC_SOURCE", hide_env_values = true)]
    pub source: Option<String>,

    /// Destination cluster connection string.
    #[arg(long, env = "MONGOSYNC_TARGET", hide_env_values = true)]
    pub destination: Option<String>,

    /// Path to the mongosync executable. Downloaded if missing.
    #[arg(long, default_value = "./mongosync")]
    pub binary: PathBuf,

    /// Base URL of the mongosync control-plane API.
    #[arg(long, default_value = "http://localhost:27182/api/v1")]
    pub api_url: String,

    /// Destination cleanup pass to run before the sync starts.
    #[arg(long, value_enum, default_value_t = CleanupMode::Off)]
    pub cleanup: CleanupMode,

    /// Bound on each control-plane wait, in seconds. Unbounded when omitted.
    #[arg(long)]
    pub wait_timeout_secs: Option<u64>,
}
