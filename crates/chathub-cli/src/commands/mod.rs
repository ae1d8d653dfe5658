//! CLI subcommand implementations.

pub mod chat;
pub mod load;
pub mod token;

use anyhow::{Context, Result};

/// Decode a hex secret given on the command line.
pub fn parse_secret(secret: &str) -> Result<Vec<u8>> {
    hex::decode(secret.trim()).context("secret must be hex-encoded")
}
