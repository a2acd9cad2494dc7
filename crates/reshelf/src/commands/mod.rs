//! Command implementations.

pub mod config;
pub mod fixtures;
pub mod run;

use anyhow::{Context, Result};
use reshelf_core::client::http::HttpClient;

use crate::config::Config;

/// HTTP session acting as the governing account
pub fn connect(config: &Config) -> Result<HttpClient> {
    let token = config.access_token()?;
    HttpClient::with_timeout(&config.api.url, token, config.timeout())
        .context("Failed to create API client")
}
