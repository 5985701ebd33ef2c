//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//! 3. Probes a handful of paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `MEETINGS_HOST_URL`: public base URL the provider can reach (required)
//! - `MEETINGS_PORT`: listen port, default 8080
//! - `MEETINGS_PUSH_PREFIX`: first segment of the push endpoint, default `push`
//! - `MEETINGS_ACCOUNTS_PATH`: JSON file with registered accounts
//! - `MEETINGS_GOOGLE_KEY` / `MEETINGS_GOOGLE_SECRET`: OAuth client settings,
//!   carried for the external registration flow

use std::path::{Path, PathBuf};

use meetings_domain::{Config, MeetingsError, OAuthConfig, Result, ServerConfig};
use tracing::{debug, info};
use url::Url;

/// Load configuration with automatic fallback strategy.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            debug!(error = ?e, "environment configuration incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables.
///
/// `MEETINGS_HOST_URL` must be present; everything else has a default, the
/// way the service has always been deployed.
pub fn load_from_env() -> Result<Config> {
    let host_url = env_var("MEETINGS_HOST_URL")?;
    let port = match std::env::var("MEETINGS_PORT") {
        Ok(raw) => raw
            .parse::<u16>()
            .map_err(|e| MeetingsError::Config(format!("invalid MEETINGS_PORT: {e}")))?,
        Err(_) => 8080,
    };
    let push_prefix =
        std::env::var("MEETINGS_PUSH_PREFIX").unwrap_or_else(|_| "push".to_string());
    let accounts_path = std::env::var("MEETINGS_ACCOUNTS_PATH").ok();

    let client_id = std::env::var("MEETINGS_GOOGLE_KEY").unwrap_or_default();
    let client_secret = std::env::var("MEETINGS_GOOGLE_SECRET").unwrap_or_default();

    let config = Config {
        server: ServerConfig {
            bind_addr: format!("0.0.0.0:{port}"),
            host_url: host_url.trim_end_matches('/').to_string(),
            push_prefix,
            accounts_path,
        },
        oauth: OAuthConfig {
            client_id,
            client_secret,
            redirect_url: format!("{}/auth/google/callback", host_url.trim_end_matches('/')),
            ..Default::default()
        },
        ..Default::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Load configuration from a file.
///
/// If `path` is `None`, probes [`probe_config_paths`]. Format is detected
/// by extension; JSON and TOML are supported.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None => probe_config_paths().ok_or_else(|| {
            MeetingsError::Config("no config file found and environment incomplete".into())
        })?,
    };

    let raw = std::fs::read_to_string(&path).map_err(|e| {
        MeetingsError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .map_err(|e| MeetingsError::Config(format!("invalid JSON config: {e}")))?,
        Some("toml") => toml::from_str(&raw)
            .map_err(|e| MeetingsError::Config(format!("invalid TOML config: {e}")))?,
        other => {
            return Err(MeetingsError::Config(format!(
                "unsupported config format: {other:?}"
            )))
        }
    };

    validate(&config)?;
    info!(path = %path.display(), "configuration loaded from file");
    Ok(config)
}

fn probe_config_paths() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "config.json",
        "config.toml",
        "meetings.json",
        "meetings.toml",
        "../config.json",
        "../config.toml",
    ];
    CANDIDATES.iter().map(Path::new).find(|p| p.is_file()).map(Path::to_path_buf)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.host_url.is_empty() {
        return Err(MeetingsError::Config("host_url must be set".into()));
    }
    Url::parse(&config.server.host_url)
        .map_err(|e| MeetingsError::Config(format!("invalid host_url: {e}")))?;

    config
        .server
        .bind_addr
        .parse::<std::net::SocketAddr>()
        .map_err(|e| MeetingsError::Config(format!("invalid bind_addr: {e}")))?;

    if config.server.push_prefix.is_empty() || config.server.push_prefix.contains('/') {
        return Err(MeetingsError::Config(
            "push_prefix must be a single path segment".into(),
        ));
    }

    Ok(())
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| MeetingsError::Config(format!("missing environment variable {name}")))
}
