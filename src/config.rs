//! Configuration module for upwatch.
//!
//! Process settings come from environment variables with sensible defaults.
//! Monitors come from a YAML file that is validated once at load time.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::db::MonitorSettings;
use crate::incident::IncidentPolicy;
use crate::probe::{
    IpFamily, ProbeConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_DNS_TIMEOUT, DEFAULT_HEADER_TIMEOUT,
    DEFAULT_TIMEOUT, DEFAULT_TLS_TIMEOUT,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RESPONSE_TIME_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_CERTIFICATE_EXPIRED_BEFORE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid monitor file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("monitor #{index} ({url}): invalid {field}: {message}")]
    InvalidField {
        index: usize,
        url: String,
        field: &'static str,
        message: String,
    },
    #[error("monitor #{index}: duplicate url {url}")]
    Duplicate { index: usize, url: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the monitor file (default: "monitors.yaml")
    pub config_path: String,
    /// Path to the SQLite database file (default: "upwatch.db")
    pub db_path: String,
    /// HTTP port for the reporting API (default: 8080)
    pub http_port: u16,
    /// Incident webhook endpoint; notifications are off when unset
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: "monitors.yaml".to_string(),
            db_path: "upwatch.db".to_string(),
            http_port: 8080,
            webhook_url: None,
            webhook_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPWATCH_CONFIG_PATH`: Monitor file path (default: "monitors.yaml")
    /// - `UPWATCH_DB_PATH`: Database file path (default: "upwatch.db")
    /// - `UPWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPWATCH_WEBHOOK_URL`: Incident webhook endpoint (optional)
    /// - `UPWATCH_WEBHOOK_TOKEN`: Bearer token for the webhook (optional)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(path) = lookup("UPWATCH_CONFIG_PATH") {
            cfg.config_path = path;
        }

        if let Some(db_path) = lookup("UPWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(port_str) = lookup("UPWATCH_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => cfg.http_port = port,
                Err(_) => tracing::warn!("Ignoring invalid UPWATCH_HTTP_PORT {:?}", port_str),
            }
        }

        cfg.webhook_url = lookup("UPWATCH_WEBHOOK_URL").filter(|s| !s.is_empty());
        cfg.webhook_token = lookup("UPWATCH_WEBHOOK_TOKEN").filter(|s| !s.is_empty());

        cfg
    }
}

/// A validated monitor entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub url: String,
    pub enabled: bool,
    pub interval: Duration,
    pub response_time_threshold: Duration,
    pub certificate_monitoring: bool,
    pub certificate_expired_before: Duration,
    pub timeout: Duration,
    pub dns_timeout: Duration,
    pub dial_timeout: Duration,
    pub tls_timeout: Duration,
    pub response_header_timeout: Duration,
    pub follow_redirects: bool,
    pub skip_tls_verify: bool,
    pub ip_family: IpFamily,
}

impl MonitorConfig {
    /// A monitor with every optional setting at its default.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            enabled: false,
            interval: DEFAULT_INTERVAL,
            response_time_threshold: DEFAULT_RESPONSE_TIME_THRESHOLD,
            certificate_monitoring: false,
            certificate_expired_before: DEFAULT_CERTIFICATE_EXPIRED_BEFORE,
            timeout: DEFAULT_TIMEOUT,
            dns_timeout: DEFAULT_DNS_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            tls_timeout: DEFAULT_TLS_TIMEOUT,
            response_header_timeout: DEFAULT_HEADER_TIMEOUT,
            follow_redirects: true,
            skip_tls_verify: false,
            ip_family: IpFamily::Auto,
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            url: self.url.clone(),
            timeout: self.timeout,
            dns_timeout: self.dns_timeout,
            dial_timeout: self.dial_timeout,
            tls_timeout: self.tls_timeout,
            header_timeout: self.response_header_timeout,
            skip_tls_verify: self.skip_tls_verify,
            follow_redirects: self.follow_redirects,
            ip_family: self.ip_family,
        }
    }

    pub fn policy(&self) -> IncidentPolicy {
        IncidentPolicy {
            certificate_expired_before: self
                .certificate_monitoring
                .then(|| chrono::Duration::from_std(self.certificate_expired_before).ok())
                .flatten(),
        }
    }

    /// The persisted view of this monitor.
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            url: self.url.clone(),
            enabled: self.enabled,
            interval_ms: millis(self.interval),
            response_time_threshold_ms: millis(self.response_time_threshold),
            certificate_monitoring: self.certificate_monitoring,
            certificate_expired_before_ms: self
                .certificate_monitoring
                .then(|| millis(self.certificate_expired_before)),
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, Deserialize)]
struct MonitorFile {
    #[serde(default)]
    monitor: Vec<RawMonitor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMonitor {
    url: String,
    #[serde(default)]
    enabled: bool,
    interval: Option<String>,
    response_time_threshold: Option<String>,
    #[serde(default)]
    certificate_monitoring: bool,
    certificate_expired_before: Option<String>,
    timeout: Option<String>,
    dns_timeout: Option<String>,
    dial_timeout: Option<String>,
    tls_timeout: Option<String>,
    response_header_timeout: Option<String>,
    follow_redirects: Option<bool>,
    #[serde(default)]
    skip_tls_verify: bool,
    #[serde(default)]
    ip_family: IpFamily,
}

/// Read and validate the monitor file.
pub fn load_monitors<P: AsRef<Path>>(path: P) -> Result<Vec<MonitorConfig>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_monitors(&text)
}

/// Parse monitor YAML, preserving file order.
pub fn parse_monitors(text: &str) -> Result<Vec<MonitorConfig>, ConfigError> {
    let file: MonitorFile = serde_yaml::from_str(text)?;

    let mut seen = HashSet::new();
    let mut monitors = Vec::with_capacity(file.monitor.len());

    for (index, raw) in file.monitor.into_iter().enumerate() {
        let monitor = validate(index, raw)?;
        if !seen.insert(monitor.url.clone()) {
            return Err(ConfigError::Duplicate {
                index,
                url: monitor.url,
            });
        }
        monitors.push(monitor);
    }

    Ok(monitors)
}

fn validate(index: usize, raw: RawMonitor) -> Result<MonitorConfig, ConfigError> {
    let url = normalize_url(&raw.url).map_err(|message| ConfigError::InvalidField {
        index,
        url: raw.url.clone(),
        field: "url",
        message,
    })?;

    let duration = |field: &'static str, value: &Option<String>, default: Duration| match value {
        None => Ok(default),
        Some(text) => parse_duration(text).map_err(|message| ConfigError::InvalidField {
            index,
            url: url.clone(),
            field,
            message,
        }),
    };

    let mut monitor = MonitorConfig::new(&url);
    monitor.enabled = raw.enabled;
    monitor.interval = duration("interval", &raw.interval, DEFAULT_INTERVAL)?;
    monitor.response_time_threshold = duration(
        "response_time_threshold",
        &raw.response_time_threshold,
        DEFAULT_RESPONSE_TIME_THRESHOLD,
    )?;
    monitor.certificate_monitoring = raw.certificate_monitoring;
    monitor.certificate_expired_before = duration(
        "certificate_expired_before",
        &raw.certificate_expired_before,
        DEFAULT_CERTIFICATE_EXPIRED_BEFORE,
    )?;
    monitor.timeout = duration("timeout", &raw.timeout, DEFAULT_TIMEOUT)?;
    monitor.dns_timeout = duration("dns_timeout", &raw.dns_timeout, DEFAULT_DNS_TIMEOUT)?;
    monitor.dial_timeout = duration("dial_timeout", &raw.dial_timeout, DEFAULT_DIAL_TIMEOUT)?;
    monitor.tls_timeout = duration("tls_timeout", &raw.tls_timeout, DEFAULT_TLS_TIMEOUT)?;
    monitor.response_header_timeout = duration(
        "response_header_timeout",
        &raw.response_header_timeout,
        DEFAULT_HEADER_TIMEOUT,
    )?;
    monitor.follow_redirects = raw.follow_redirects.unwrap_or(true);
    monitor.skip_tls_verify = raw.skip_tls_verify;
    monitor.ip_family = raw.ip_family;

    Ok(monitor)
}

/// Parse durations like `30s`, `5m`, `1m30s` or `30d`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+)([smhd])").expect("duration pattern is valid"));
    let input = input.trim();

    let mut total: u64 = 0;
    let mut consumed = 0;
    for caps in re.captures_iter(input) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if whole.start != consumed {
            break;
        }
        consumed = whole.end;

        let value: u64 = caps[1]
            .parse()
            .map_err(|_| format!("{:?}: number out of range", input))?;
        let unit = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            _ => 24 * 60 * 60,
        };
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("{:?}: duration out of range", input))?;
    }

    if consumed == 0 || consumed != input.len() {
        return Err(format!(
            "{:?}: expected one or more <number><s|m|h|d> groups, e.g. 1m30s",
            input
        ));
    }
    if total == 0 {
        return Err(format!("{:?}: duration must be greater than zero", input));
    }

    Ok(Duration::from_secs(total))
}

/// Add a default `http://` scheme, lowercase the host and drop a bare `/` path.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("url is empty".to_string());
    }

    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if raw.contains("://") {
        return Err(format!("{:?}: only http and https are supported", raw));
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&with_scheme).map_err(|e| format!("{:?}: {}", raw, e))?;
    if url.host_str().is_none() {
        return Err(format!("{:?}: missing host", raw));
    }

    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        normalized.pop();
    }
    Ok(normalized)
}
