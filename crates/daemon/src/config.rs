//! Startup parameters and session config acquisition

use crate::retry::{RetryPolicy, Sleeper};
use anyhow::Context;
use meshwatch_common::{Error, Result, SessionConfig};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Suffix older deployments append to the remote base URL
pub const LEGACY_CONFIG_SUFFIX: &str = "/gerbil/get-config";

/// Path of the session config document under the remote base
pub const REMOTE_CONFIG_PATH: &str = "/gerbil/get-tailscale-config";

/// Path of the bandwidth sink under the remote base
pub const BANDWIDTH_PATH: &str = "/gerbil/receive-bandwidth";

/// Delay between remote config fetch attempts
pub const REMOTE_RETRY_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_LISTEN: &str = ":3003";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Environment variable names, one per startup parameter
pub mod env {
    pub const CONFIG: &str = "CONFIG";
    pub const REMOTE_CONFIG: &str = "REMOTE_CONFIG";
    pub const LISTEN: &str = "LISTEN";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const NOTIFY_URL: &str = "NOTIFY_URL";
    pub const AUTH_KEY: &str = "TAILSCALE_AUTHKEY";
    pub const HOSTNAME: &str = "TAILSCALE_HOSTNAME";
    pub const CONTROL_URL: &str = "TAILSCALE_CONTROL_URL";
    pub const REPORT_URL: &str = "REPORT_URL";
}

/// Resolved startup parameters
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StartupParams {
    pub config_path: Option<PathBuf>,
    pub remote_config_url: Option<String>,
    pub listen: String,
    pub log_level: String,
    pub notify_url: Option<String>,
    pub auth_key: Option<String>,
    pub hostname: Option<String>,
    pub control_url: Option<String>,
    pub report_url: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl StartupParams {
    /// Overlay environment values; a set, non-empty variable beats the flag
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        if let Some(v) = get(env::CONFIG) {
            self.config_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get(env::REMOTE_CONFIG) {
            self.remote_config_url = Some(v);
        }
        if let Some(v) = get(env::LISTEN) {
            self.listen = v;
        }
        if let Some(v) = get(env::LOG_LEVEL) {
            self.log_level = v;
        }
        if let Some(v) = get(env::NOTIFY_URL) {
            self.notify_url = Some(v);
        }
        if let Some(v) = get(env::AUTH_KEY) {
            self.auth_key = Some(v);
        }
        if let Some(v) = get(env::HOSTNAME) {
            self.hostname = Some(v);
        }
        if let Some(v) = get(env::CONTROL_URL) {
            self.control_url = Some(v);
        }
        if let Some(v) = get(env::REPORT_URL) {
            self.report_url = Some(v);
        }

        if self.listen.trim().is_empty() {
            self.listen = DEFAULT_LISTEN.to_string();
        }
        if self.log_level.trim().is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
        self.remote_config_url = non_empty(self.remote_config_url.take());
        self.notify_url = non_empty(self.notify_url.take());
        self.report_url = non_empty(self.report_url.take());
        self
    }

    /// Overlay the real process environment
    pub fn with_process_env(self) -> Self {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Remote base URL with legacy suffix and trailing slash removed
    pub fn remote_base(&self) -> Option<String> {
        self.remote_config_url
            .as_deref()
            .map(normalize_remote_url)
            .filter(|s| !s.is_empty())
    }

    /// Where bandwidth reports go, if anywhere
    pub fn report_url(&self) -> Option<String> {
        self.report_url
            .clone()
            .or_else(|| self.remote_base().map(|base| format!("{}{}", base, BANDWIDTH_PATH)))
    }

    /// Pick the session config source: local file, then remote, then direct
    pub fn config_source(&self) -> Result<ConfigSource> {
        if let Some(path) = &self.config_path {
            return Ok(ConfigSource::LocalFile(path.clone()));
        }
        if let Some(base_url) = self.remote_base() {
            return Ok(ConfigSource::Remote { base_url });
        }

        let auth_key = non_empty(self.auth_key.clone()).ok_or_else(|| {
            Error::InvalidConfig(
                "You must provide either a config file, remote config URL, or auth key"
                    .to_string(),
            )
        })?;

        Ok(ConfigSource::Direct(
            SessionConfig {
                auth_key,
                control_url: self.control_url.clone(),
                hostname: self.hostname.clone(),
                ..Default::default()
            }
            .normalized(),
        ))
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_listen_addr(&self.listen)
    }
}

/// Strip the legacy suffix, then any trailing slash
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let url = url.strip_suffix(LEGACY_CONFIG_SUFFIX).unwrap_or(url);
    let url = url.strip_suffix('/').unwrap_or(url);
    url.to_string()
}

/// Accept `host:port`, `ip:port` or a bare `:port` (all interfaces)
pub fn parse_listen_addr(listen: &str) -> anyhow::Result<SocketAddr> {
    let listen = listen.trim();
    let full = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };

    full.to_socket_addrs()
        .with_context(|| format!("invalid listen address {:?}", listen))?
        .next()
        .with_context(|| format!("listen address {:?} did not resolve", listen))
}

/// Map a DEBUG/INFO/WARN/ERROR/FATAL level to a tracing filter directive
pub fn log_filter(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "FATAL" => "error",
        _ => "info",
    }
}

/// Where the session config comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    LocalFile(PathBuf),
    Remote { base_url: String },
    Direct(SessionConfig),
}

/// Read a local session config file (JSON, or TOML by extension)
pub fn load_local(path: &Path) -> anyhow::Result<SessionConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));

    let config: SessionConfig = if is_toml {
        toml::from_str(&content)
            .with_context(|| format!("failed to parse TOML config {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse JSON config {}", path.display()))?
    };

    Ok(config.normalized())
}

/// Resolves a [`SessionConfig`] from a [`ConfigSource`]
pub struct ConfigAcquirer {
    http: reqwest::Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ConfigAcquirer {
    pub fn new(http: reqwest::Client, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            http,
            retry: RetryPolicy::fixed(REMOTE_RETRY_DELAY),
            sleeper,
        }
    }

    /// Resolve the session config.
    ///
    /// Local and direct sources fail fast. The remote source never gives up:
    /// it keeps polling at a fixed interval until a config with an auth key
    /// arrives.
    pub async fn acquire(&self, source: ConfigSource) -> anyhow::Result<SessionConfig> {
        match source {
            ConfigSource::LocalFile(path) => {
                info!("Loading config from {}", path.display());
                load_local(&path)
            }
            ConfigSource::Remote { base_url } => {
                let url = format!("{}{}", base_url, REMOTE_CONFIG_PATH);
                info!("Fetching remote config from {}", url);
                let config = self
                    .retry
                    .run(self.sleeper.as_ref(), "Remote config fetch", || {
                        self.fetch_remote(&url)
                    })
                    .await;
                Ok(config)
            }
            ConfigSource::Direct(config) => Ok(config),
        }
    }

    /// One fetch attempt; an empty auth key counts as a failure
    pub async fn fetch_remote(&self, url: &str) -> Result<SessionConfig> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("error fetching remote config {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!("remote config {} returned {}", url, status)));
        }

        let config: SessionConfig = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid remote config from {}: {}", url, e)))?;

        let config = config.normalized();
        if !config.has_auth_key() {
            return Err(Error::InvalidConfig(format!(
                "remote config from {} has no auth key",
                url
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::testing::RecordingSleeper;
    use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params() -> StartupParams {
        StartupParams::default().with_env_overrides(|_| None)
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_normalize_remote_url() {
        assert_eq!(normalize_remote_url("https://p.example.com"), "https://p.example.com");
        assert_eq!(normalize_remote_url("https://p.example.com/"), "https://p.example.com");
        assert_eq!(
            normalize_remote_url("https://p.example.com/gerbil/get-config"),
            "https://p.example.com"
        );
        assert_eq!(
            normalize_remote_url("https://p.example.com/api/v1/gerbil/get-config"),
            "https://p.example.com/api/v1"
        );
    }

    #[test]
    fn test_defaults() {
        let p = params();
        assert_eq!(p.listen, ":3003");
        assert_eq!(p.log_level, "INFO");
        assert_eq!(p.report_url(), None);
    }

    #[test]
    fn test_env_beats_flag() {
        let flags = StartupParams {
            listen: "127.0.0.1:9000".to_string(),
            auth_key: Some("flag-key".to_string()),
            hostname: Some("flag-host".to_string()),
            ..Default::default()
        };
        let p = flags.with_env_overrides(env_of(&[
            (env::LISTEN, ":4000"),
            (env::AUTH_KEY, "env-key"),
            (env::HOSTNAME, ""),
        ]));

        assert_eq!(p.listen, ":4000");
        assert_eq!(p.auth_key.as_deref(), Some("env-key"));
        // Empty env values do not override
        assert_eq!(p.hostname.as_deref(), Some("flag-host"));
    }

    #[test]
    fn test_source_priority() {
        let mut p = StartupParams {
            config_path: Some(PathBuf::from("/etc/meshwatch.json")),
            remote_config_url: Some("https://p.example.com/".to_string()),
            auth_key: Some("k".to_string()),
            ..Default::default()
        };
        assert_eq!(
            p.config_source().unwrap(),
            ConfigSource::LocalFile(PathBuf::from("/etc/meshwatch.json"))
        );

        p.config_path = None;
        assert_eq!(
            p.config_source().unwrap(),
            ConfigSource::Remote {
                base_url: "https://p.example.com".to_string()
            }
        );

        p.remote_config_url = None;
        p.control_url = Some("https://hs.example.com".to_string());
        match p.config_source().unwrap() {
            ConfigSource::Direct(cfg) => {
                assert_eq!(cfg.auth_key, "k");
                assert_eq!(cfg.control_url.as_deref(), Some("https://hs.example.com"));
                assert!(!cfg.accept_routes);
            }
            other => panic!("Expected direct source, got {:?}", other),
        }
    }

    #[test]
    fn test_no_source_is_fatal() {
        let err = params().config_source().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_report_url() {
        let mut p = StartupParams {
            remote_config_url: Some("https://p.example.com/gerbil/get-config".to_string()),
            ..Default::default()
        };
        assert_eq!(
            p.report_url().as_deref(),
            Some("https://p.example.com/gerbil/receive-bandwidth")
        );

        p.report_url = Some("https://sink.example.com/bw".to_string());
        assert_eq!(p.report_url().as_deref(), Some("https://sink.example.com/bw"));
    }

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            parse_listen_addr(":3003").unwrap(),
            "0.0.0.0:3003".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_listen_addr("nonsense").is_err());
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter("debug"), "debug");
        assert_eq!(log_filter("WARN"), "warn");
        assert_eq!(log_filter("FATAL"), "error");
        assert_eq!(log_filter("verbose"), "info");
    }

    #[test]
    fn test_load_local_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"authKey": "tskey-1", "hostname": "edge", "exitNode": "100.64.0.9"}}"#
        )
        .unwrap();

        let cfg = load_local(file.path()).unwrap();
        assert_eq!(cfg.auth_key, "tskey-1");
        assert_eq!(cfg.hostname.as_deref(), Some("edge"));
        assert_eq!(cfg.exit_node.as_deref(), Some("100.64.0.9"));
    }

    #[test]
    fn test_load_local_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "authKey = \"tskey-2\"\nacceptRoutes = true").unwrap();

        let cfg = load_local(file.path()).unwrap();
        assert_eq!(cfg.auth_key, "tskey-2");
        assert!(cfg.accept_routes);
    }

    #[test]
    fn test_load_local_malformed() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(load_local(file.path()).is_err());
    }

    #[test]
    fn test_load_local_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_local(&dir.path().join("absent.json")).is_err());
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_remote_retries_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            REMOTE_CONFIG_PATH,
            get(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    } else {
                        Json(serde_json::json!({"authKey": "tskey-remote", "hostname": "edge"}))
                            .into_response()
                    }
                }
            }),
        );
        let base = spawn_server(app).await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let acquirer = ConfigAcquirer::new(reqwest::Client::new(), sleeper.clone());
        let cfg = acquirer
            .acquire(ConfigSource::Remote { base_url: base })
            .await
            .unwrap();

        assert_eq!(cfg.auth_key, "tskey-remote");
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(5); 3]);
    }

    #[tokio::test]
    async fn test_remote_empty_auth_key_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            REMOTE_CONFIG_PATH,
            get(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let key = if n == 0 { "" } else { "tskey-late" };
                    Json(serde_json::json!({ "authKey": key }))
                }
            }),
        );
        let base = spawn_server(app).await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let acquirer = ConfigAcquirer::new(reqwest::Client::new(), sleeper.clone());
        let cfg = acquirer
            .acquire(ConfigSource::Remote { base_url: base })
            .await
            .unwrap();

        assert_eq!(cfg.auth_key, "tskey-late");
        assert_eq!(sleeper.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_source_passthrough() {
        let acquirer = ConfigAcquirer::new(
            reqwest::Client::new(),
            Arc::new(RecordingSleeper::default()),
        );
        let cfg = acquirer
            .acquire(ConfigSource::Direct(SessionConfig::new("k")))
            .await
            .unwrap();
        assert_eq!(cfg, SessionConfig::new("k"));
    }
}
