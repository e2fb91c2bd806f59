//! mosy - supervised one-shot MongoDB cluster migration.
//!
//! Orchestrates an external mongosync process: provisions the binary,
//! launches it, optionally sanitizes the destination cluster, then drives
//! the engine's control plane through start, commit and verification.

pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod provision;
pub mod sanitize;
pub mod supervisor;
pub mod workflow;
