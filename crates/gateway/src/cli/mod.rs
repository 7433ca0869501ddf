//! CLI surface: `serve`, `migrate`, `admin cancel <id>`.
//!
//! Exit codes: 0 ok, 2 bad arguments (clap's default), 3 backing store
//! unavailable.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pandora_domain::config::Config;
use pandora_domain::error::{Error, Result};

pub const EXIT_STORE_UNAVAILABLE: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "pandora", version, about = "Pandora turn-orchestration engine")]
pub struct Cli {
    /// Path to pandora.toml. Defaults to ./pandora.toml, then the user
    /// config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Serve,
    /// Initialize the on-disk stores and exit.
    Migrate,
    /// Operator actions against a running gateway.
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Cancel a running trace or job by id.
    Cancel {
        /// A `tr_...` trace id or `job_...` job id.
        id: String,
    },
}

/// Load the configuration, tolerating a missing file (all defaults).
pub fn load_config(explicit: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    let path = match explicit {
        Some(path) => path.clone(),
        None => {
            let local = PathBuf::from("pandora.toml");
            if local.exists() {
                local
            } else {
                dirs::config_dir()
                    .map(|d| d.join("pandora").join("pandora.toml"))
                    .unwrap_or(local)
            }
        }
    };

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };
    Ok((config, path))
}

/// `admin cancel` — resolve the id against the running server over HTTP.
pub async fn admin_cancel(config: &Config, id: &str) -> Result<bool> {
    let base = format!(
        "http://{}:{}",
        config.server.host, config.server.port
    );
    let path = if id.starts_with("job_") {
        format!("{base}/jobs/{id}/cancel")
    } else {
        format!("{base}/v1/thinking/{id}/cancel")
    };

    let client = reqwest::Client::new();
    let mut request = client.post(&path);
    if let Ok(token) = std::env::var(&config.server.api_token_env) {
        if !token.is_empty() {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
    }

    let payload: serde_json::Value = request
        .send()
        .await
        .map_err(|e| Error::Http(format!("cancel request failed: {e}")))?
        .json()
        .await
        .map_err(|e| Error::Http(format!("cancel response malformed: {e}")))?;
    Ok(payload.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = PathBuf::from("/nonexistent/pandora.toml");
        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn config_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pandora.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();
        let (config, loaded_from) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(loaded_from, path);
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pandora.toml");
        std::fs::write(&path, "[server\nport=").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
