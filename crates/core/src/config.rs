use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::host::MonitoredHost;
use crate::time::{DEFAULT_TIMEZONE, parse_duration_str, parse_timezone};

/// The two independent mirror instances; each has its own database and hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mirror {
    Playback,
    Production,
}

impl Mirror {
    pub const ALL: [Mirror; 2] = [Mirror::Playback, Mirror::Production];

    /// Parses the `db` selector used by the query API; empty means production.
    pub fn from_selector(raw: &str) -> Result<Self> {
        match raw.trim() {
            "playback" => Ok(Self::Playback),
            "production" | "" => Ok(Self::Production),
            other => Err(MirrorError::InvalidArgument(format!(
                "unknown database selector: {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorConfig {
    pub db_path: PathBuf,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub playback: MirrorConfig,
    pub production: MirrorConfig,
    pub proxy_url: String,
    /// Host reached through `{proxy}/sync_proxy` instead of the redirect path.
    pub gateway_host: String,
    pub fff_port: u16,
    pub secret_name: String,
    pub secret: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub tls_insecure: bool,
    pub request_timeout: Duration,
    pub info_interval: Duration,
    pub status_interval: Duration,
    pub status_retention: Duration,
    pub producer_prefixes: Vec<String>,
    pub pool_size: usize,
    pub timezone: Tz,
    pub query_http_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"))
            .join("dqmirror");

        Self {
            playback: MirrorConfig {
                db_path: data_root.join("playback.duckdb"),
                hosts: split_hosts("dqmrubu-c2a06-03-01;dqmfu-c2b01-45-01;dqmfu-c2b02-45-01"),
            },
            production: MirrorConfig {
                db_path: data_root.join("production.duckdb"),
                hosts: split_hosts("dqmrubu-c2a06-01-01;dqmfu-c2b03-45-01;dqmfu-c2b04-45-01"),
            },
            proxy_url: "https://cmsweb-testbed.cern.ch/dqm/dqm-square-origin-rubu".to_string(),
            gateway_host: "dqmrubu-c2a06-03-01".to_string(),
            fff_port: 9215,
            secret_name: "selenium-secret-secret".to_string(),
            secret: None,
            client_cert: None,
            client_key: None,
            tls_insecure: false,
            request_timeout: Duration::from_secs(30),
            info_interval: Duration::from_secs(5),
            status_interval: Duration::from_secs(30),
            status_retention: Duration::from_secs(7 * 24 * 60 * 60),
            producer_prefixes: vec!["bu".to_string(), "dqmrubu".to_string()],
            pool_size: 20,
            timezone: DEFAULT_TIMEZONE,
            query_http_addr: "127.0.0.1:8887".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn mirror(&self, mirror: Mirror) -> &MirrorConfig {
        match mirror {
            Mirror::Playback => &self.playback,
            Mirror::Production => &self.production,
        }
    }

    /// Hosts of one mirror with their category resolved from `producer_prefixes`.
    pub fn hosts_for(&self, mirror: Mirror) -> Vec<MonitoredHost> {
        self.mirror(mirror)
            .hosts
            .iter()
            .map(|name| MonitoredHost::new(name.clone(), &self.producer_prefixes))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct MirrorOverrides {
    db_path: Option<PathBuf>,
    hosts: Option<HostList>,
}

/// Host lists are `;`-separated strings in the environment and either form in TOML.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostList {
    Joined(String),
    List(Vec<String>),
}

impl HostList {
    fn into_hosts(self) -> Vec<String> {
        match self {
            Self::Joined(raw) => split_hosts(&raw),
            Self::List(items) => items
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    playback: Option<MirrorOverrides>,
    production: Option<MirrorOverrides>,
    proxy_url: Option<String>,
    gateway_host: Option<String>,
    fff_port: Option<u16>,
    secret_name: Option<String>,
    secret: Option<String>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    tls_insecure: Option<bool>,
    request_timeout: Option<String>,
    info_interval: Option<String>,
    status_interval: Option<String>,
    status_retention: Option<String>,
    producer_prefixes: Option<HostList>,
    pool_size: Option<usize>,
    timezone: Option<String>,
    query_http_addr: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("DQMIRROR_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("dqmirror/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| MirrorError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| MirrorError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| MirrorError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_mirror(prefix: &str) -> Option<MirrorOverrides> {
    let db_path = env::var(format!("DQMIRROR_{prefix}_DB")).ok().map(PathBuf::from);
    let hosts = env::var(format!("DQMIRROR_{prefix}_HOSTS"))
        .ok()
        .map(HostList::Joined);
    if db_path.is_none() && hosts.is_none() {
        return None;
    }
    Some(MirrorOverrides { db_path, hosts })
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    // Trailing whitespace in the secret breaks the upstream cookie check.
    let secret = env::var("DQM_FFF_SECRET")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(ConfigOverrides {
        playback: env_mirror("PLAYBACK"),
        production: env_mirror("PRODUCTION"),
        proxy_url: env::var("DQMIRROR_PROXY_URL").ok(),
        gateway_host: env::var("DQMIRROR_GATEWAY_HOST").ok(),
        fff_port: env_parsed("DQMIRROR_FFF_PORT")?,
        secret_name: env::var("DQMIRROR_SECRET_NAME").ok(),
        secret,
        client_cert: env::var("DQMIRROR_CLIENT_CERT").ok().map(PathBuf::from),
        client_key: env::var("DQMIRROR_CLIENT_KEY").ok().map(PathBuf::from),
        tls_insecure: env_parsed("DQMIRROR_TLS_INSECURE")?,
        request_timeout: env::var("DQMIRROR_REQUEST_TIMEOUT").ok(),
        info_interval: env::var("DQMIRROR_INFO_INTERVAL").ok(),
        status_interval: env::var("DQMIRROR_STATUS_INTERVAL").ok(),
        status_retention: env::var("DQMIRROR_STATUS_RETENTION").ok(),
        producer_prefixes: env::var("DQMIRROR_PRODUCER_PREFIXES")
            .ok()
            .map(HostList::Joined),
        pool_size: env_parsed("DQMIRROR_POOL_SIZE")?,
        timezone: env::var("DQMIRROR_TIMEZONE").ok(),
        query_http_addr: env::var("DQMIRROR_QUERY_HTTP_ADDR").ok(),
    })
}

fn apply_mirror(cfg: &mut MirrorConfig, overrides: MirrorOverrides) {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.hosts {
        cfg.hosts = v.into_hosts();
    }
}

fn parse_duration_field(name: &str, value: &str, source: &str) -> Result<Duration> {
    parse_duration_str(value)
        .map_err(|e| MirrorError::Config(format!("bad {name} in {source}: {e}")))
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.playback {
        apply_mirror(&mut cfg.playback, v);
    }
    if let Some(v) = overrides.production {
        apply_mirror(&mut cfg.production, v);
    }
    if let Some(v) = overrides.proxy_url {
        cfg.proxy_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = overrides.gateway_host {
        cfg.gateway_host = v;
    }
    if let Some(v) = overrides.fff_port {
        cfg.fff_port = v;
    }
    if let Some(v) = overrides.secret_name {
        cfg.secret_name = v;
    }
    if let Some(v) = overrides.secret {
        cfg.secret = Some(v);
    }
    if let Some(v) = overrides.client_cert {
        cfg.client_cert = Some(v);
    }
    if let Some(v) = overrides.client_key {
        cfg.client_key = Some(v);
    }
    if let Some(v) = overrides.tls_insecure {
        cfg.tls_insecure = v;
    }
    if let Some(v) = overrides.request_timeout {
        cfg.request_timeout = parse_duration_field("request_timeout", &v, source)?;
    }
    if let Some(v) = overrides.info_interval {
        cfg.info_interval = parse_duration_field("info_interval", &v, source)?;
    }
    if let Some(v) = overrides.status_interval {
        cfg.status_interval = parse_duration_field("status_interval", &v, source)?;
    }
    if let Some(v) = overrides.status_retention {
        cfg.status_retention = parse_duration_field("status_retention", &v, source)?;
    }
    if let Some(v) = overrides.producer_prefixes {
        cfg.producer_prefixes = v.into_hosts();
    }
    if let Some(v) = overrides.pool_size {
        if v == 0 {
            return Err(MirrorError::Config(format!(
                "pool_size in {source} must be at least 1"
            )));
        }
        cfg.pool_size = v;
    }
    if let Some(v) = overrides.timezone {
        cfg.timezone = parse_timezone(&v)
            .map_err(|e| MirrorError::Config(format!("bad timezone in {source}: {e}")))?;
    }
    if let Some(v) = overrides.query_http_addr {
        cfg.query_http_addr = v;
    }
    Ok(())
}

pub fn split_hosts(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostCategory;

    #[test]
    fn default_matches_upstream_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.fff_port, 9215);
        assert_eq!(cfg.secret_name, "selenium-secret-secret");
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.info_interval, Duration::from_secs(5));
        assert_eq!(cfg.status_interval, Duration::from_secs(30));
        assert_eq!(cfg.pool_size, 20);
        assert!(!cfg.tls_insecure);
        assert_eq!(cfg.timezone, chrono_tz::Europe::Zurich);
        assert_eq!(cfg.playback.hosts.len(), 3);
    }

    #[test]
    fn hosts_are_classified() {
        let cfg = Config::default();
        let hosts = cfg.hosts_for(Mirror::Production);
        assert_eq!(hosts[0].name, "dqmrubu-c2a06-01-01");
        assert_eq!(hosts[0].category, HostCategory::Producer);
        assert_eq!(hosts[1].category, HostCategory::Consumer);
    }

    #[test]
    fn selector_defaults_to_production() {
        assert_eq!(Mirror::from_selector("").unwrap(), Mirror::Production);
        assert_eq!(Mirror::from_selector("playback").unwrap(), Mirror::Playback);
        assert!(Mirror::from_selector("staging").is_err());
    }

    #[test]
    fn apply_file_overrides_from_toml() {
        let raw = r#"
            proxy_url = "http://127.0.0.1:9000/"
            status_retention = "2d"
            timezone = "UTC"
            producer_prefixes = ["bu"]

            [playback]
            hosts = "bu-01; fu-01;;"

            [production]
            db_path = "/tmp/prod.duckdb"
            hosts = ["fu-02"]
        "#;
        let overrides: ConfigOverrides = toml::from_str(raw).unwrap();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, overrides, "config file").unwrap();

        assert_eq!(cfg.proxy_url, "http://127.0.0.1:9000");
        assert_eq!(cfg.status_retention, Duration::from_secs(2 * 86_400));
        assert_eq!(cfg.timezone, chrono_tz::UTC);
        assert_eq!(cfg.playback.hosts, vec!["bu-01", "fu-01"]);
        assert_eq!(cfg.production.db_path, PathBuf::from("/tmp/prod.duckdb"));
        assert_eq!(cfg.production.hosts, vec!["fu-02"]);
        assert_eq!(cfg.producer_prefixes, vec!["bu"]);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = Config::default();
        let bad_duration = ConfigOverrides {
            info_interval: Some("soon".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad_duration, "environment").is_err());

        let bad_pool = ConfigOverrides {
            pool_size: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad_pool, "environment").is_err());

        let bad_tz = ConfigOverrides {
            timezone: Some("Nowhere/Special".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad_tz, "environment").is_err());
    }
}
