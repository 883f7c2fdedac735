use std::path::PathBuf;
use std::time::Duration;

use afc_core::journal::{DEFAULT_LOG_CAPACITY, DEFAULT_TRANSCRIPT_CAP_BYTES};
use clap::Parser;
use thiserror::Error;
use url::Url;

use crate::stream::ReconnectPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_PRODUCT_IDEA: &str = "Update volume control for new RIC models";
const DEFAULT_RECONNECT_MIN_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug, Default)]
#[command(name = "afc-dashboard", about = "Live dashboard for multi-agent workflow runs")]
pub struct Args {
    /// Base URL of the workflow REST API.
    #[arg(long)]
    pub api_url: Option<String>,
    /// Event stream URL. Derived from the API URL when omitted.
    #[arg(long)]
    pub stream_url: Option<String>,
    #[arg(long)]
    pub reconnect_min_ms: Option<u64>,
    #[arg(long)]
    pub reconnect_max_ms: Option<u64>,
    /// Number of system log lines kept on screen.
    #[arg(long)]
    pub log_capacity: Option<usize>,
    /// Product idea pre-filled in the start prompt.
    #[arg(long)]
    pub idea: Option<String>,
    /// Pause for operator approval between agents.
    #[arg(long)]
    pub hitl: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {name} '{value}': {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid {name} '{value}': expected a number")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: Url,
    pub stream_url: Url,
    pub reconnect: ReconnectPolicy,
    pub log_capacity: usize,
    pub transcript_cap: usize,
    pub product_idea: String,
    pub hitl_enabled: bool,
    pub http_timeout: Duration,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub log_stdout: bool,
}

pub fn load_config(args: Args) -> Result<Config, ConfigError> {
    load_config_with(args, |key| std::env::var(key).ok())
}

/// Flags win over environment variables, which win over defaults.
pub fn load_config_with<F>(args: Args, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    let api_raw = args
        .api_url
        .or_else(|| lookup("AFC_API_URL"))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let api_url = parse_url("api url", &api_raw)?;
    let stream_url = match args.stream_url.or_else(|| lookup("AFC_STREAM_URL")) {
        Some(raw) => parse_url("stream url", &raw)?,
        None => derive_stream_url(&api_url)?,
    };

    let min_ms = match args.reconnect_min_ms {
        Some(value) => value,
        None => resolve_number(&lookup, "AFC_RECONNECT_MIN_MS", DEFAULT_RECONNECT_MIN_MS)?,
    };
    let max_ms = match args.reconnect_max_ms {
        Some(value) => value,
        None => resolve_number(&lookup, "AFC_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS)?,
    };
    let log_capacity = match args.log_capacity {
        Some(value) => value,
        None => resolve_number(&lookup, "AFC_LOG_CAPACITY", DEFAULT_LOG_CAPACITY as u64)? as usize,
    };
    let http_timeout = resolve_number(&lookup, "AFC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;

    let hitl_enabled = args.hitl
        || lookup("AFC_HITL")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false);

    Ok(Config {
        api_url,
        stream_url,
        reconnect: ReconnectPolicy::new(
            Duration::from_millis(min_ms),
            Duration::from_millis(max_ms),
        ),
        log_capacity: log_capacity.max(1),
        transcript_cap: DEFAULT_TRANSCRIPT_CAP_BYTES,
        product_idea: args
            .idea
            .or_else(|| lookup("AFC_PRODUCT_IDEA"))
            .unwrap_or_else(|| DEFAULT_PRODUCT_IDEA.to_string()),
        hitl_enabled,
        http_timeout: Duration::from_secs(http_timeout.max(1)),
        log_level: lookup("AFC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        log_dir: lookup("AFC_LOG_DIR").map(PathBuf::from),
        log_stdout: lookup("AFC_LOG_STDOUT")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false),
    })
}

/// `http://host:8000/api` becomes `ws://host:8000/api/ws`.
pub fn derive_stream_url(api_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let mut stream_url = api_url.clone();
    stream_url
        .set_scheme(scheme)
        .map_err(|_| ConfigError::InvalidUrl {
            name: "api url",
            value: api_url.to_string(),
            reason: "cannot derive a websocket url from this scheme".to_string(),
        })?;
    stream_url
        .path_segments_mut()
        .map_err(|_| ConfigError::InvalidUrl {
            name: "api url",
            value: api_url.to_string(),
            reason: "url cannot carry a path".to_string(),
        })?
        .pop_if_empty()
        .push("ws");
    stream_url.set_query(None);
    stream_url.set_fragment(None);
    Ok(stream_url)
}

pub(crate) fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidUrl {
        name,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn resolve_number<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name: key, value }),
        None => Ok(default),
    }
}
