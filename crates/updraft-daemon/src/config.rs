//! Configuration for updraft-daemon

use crate::error::{DaemonError, DaemonResult};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use updraft_fetch::{ArchiveSpec, SourceKind, SourceSpec, DEFAULT_GITHUB_API, DEFAULT_PAPER_API};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Registry storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Cycle intervals
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    /// Concurrency limits per source kind and for the control plane
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Upstream API endpoints and credentials
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    /// Plugins by key
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,

    /// Managed servers by name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
            approval: ApprovalConfig::default(),
            fetch: FetchConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            sources: SourcesConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            deploy: DeployConfig::default(),
            plugins: BTreeMap::new(),
            servers: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Number of recent events kept for `/api/v1/events`
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// SQLite storage
    Sqlite {
        /// Connection URL, e.g. `sqlite://updraft.db`
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_detect_interval")]
    pub detect_interval_secs: u64,

    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_secs: u64,

    #[serde(default = "default_deploy_interval")]
    pub deploy_interval_secs: u64,

    /// Run every cycle once right after startup instead of waiting a full period
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            detect_interval_secs: default_detect_interval(),
            fetch_interval_secs: default_fetch_interval(),
            deploy_interval_secs: default_deploy_interval(),
            run_on_startup: false,
        }
    }
}

/// Approval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// How long a prompt waits for a decision
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout(),
        }
    }
}

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Root of the staging directory
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Reject payloads whose digest differs from the published one
    #[serde(default = "default_true")]
    pub enforce_checksums: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            enforce_checksums: true,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_source_limit")]
    pub paper: usize,

    #[serde(default = "default_source_limit")]
    pub github: usize,

    #[serde(default = "default_source_limit")]
    pub jenkins: usize,

    /// Storefront sessions are slow and rate limited
    #[serde(default = "default_one")]
    pub storefront: usize,

    /// Concurrent deploys against the control plane
    #[serde(default = "default_one")]
    pub control_plane: usize,
}

impl ConcurrencyConfig {
    pub fn limit_for(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Paper => self.paper,
            SourceKind::Github => self.github,
            SourceKind::Jenkins => self.jenkins,
            SourceKind::Storefront => self.storefront,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            paper: default_source_limit(),
            github: default_source_limit(),
            jenkins: default_source_limit(),
            storefront: 1,
            control_plane: 1,
        }
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_paper_api")]
    pub paper_api: String,

    #[serde(default = "default_github_api")]
    pub github_api: String,

    /// Token for higher GitHub rate limits
    #[serde(default)]
    pub github_token: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            paper_api: default_paper_api(),
            github_api: default_github_api(),
            github_token: None,
        }
    }
}

/// Control-plane panel; deploys are skipped while unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl ControlPlaneConfig {
    /// Host and key, when both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.host.as_deref(), self.api_key.as_deref()) {
            (Some(host), Some(key)) if !host.is_empty() && !key.is_empty() => Some((host, key)),
            _ => None,
        }
    }
}

/// Deploy timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Pause after uploading before checking the power state
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Player count probe timeout
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Runtime build line a server runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Project on the build API, e.g. `paper`
    pub project: String,

    /// Version line, e.g. `1.20.4`
    pub version: String,

    /// File name on the server
    #[serde(default = "default_runtime_filename")]
    pub filename: String,
}

impl RuntimeConfig {
    /// Servers naming the same project and version line share one artifact
    pub fn artifact_key(&self) -> String {
        format!("{}-{}", self.project, self.version)
    }
}

/// One plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub source: SourceSpec,

    /// Staged and uploaded file name; `<key>.jar` when unset
    #[serde(default)]
    pub filename: Option<String>,

    /// Set when the download is an archive containing the jar
    #[serde(default)]
    pub archive: Option<ArchiveSpec>,
}

/// One managed server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Control-plane identifier
    #[serde(default)]
    pub instance_id: Option<String>,

    /// `host[:port]` for the player count probe
    #[serde(default)]
    pub address: Option<String>,

    /// Above this many players a deploy needs an override
    #[serde(default)]
    pub max_players: u32,

    /// Runtime build line; plugins only when unset
    #[serde(default)]
    pub runtime: Option<RuntimeConfig>,

    /// Plugin keys, each defined under `plugins`
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_event_buffer() -> usize {
    256
}

fn default_pool_size() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_detect_interval() -> u64 {
    24 * 60 * 60
}

fn default_fetch_interval() -> u64 {
    60 * 60
}

fn default_deploy_interval() -> u64 {
    12 * 60 * 60
}

fn default_approval_timeout() -> u64 {
    15 * 60
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

fn default_http_timeout() -> u64 {
    60
}

fn default_source_limit() -> usize {
    4
}

fn default_paper_api() -> String {
    DEFAULT_PAPER_API.to_string()
}

fn default_github_api() -> String {
    DEFAULT_GITHUB_API.to_string()
}

fn default_settle_delay() -> u64 {
    5000
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_runtime_filename() -> String {
    "server.jar".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `UPDRAFT_` environment variables (`__` separates nested keys)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("UPDRAFT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> DaemonResult<()> {
        let intervals = [
            ("detect", self.scheduler.detect_interval_secs),
            ("fetch", self.scheduler.fetch_interval_secs),
            ("deploy", self.scheduler.deploy_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(DaemonError::Config(format!(
                "{} interval must be greater than zero",
                name
            )));
        }

        let limits = [
            self.concurrency.paper,
            self.concurrency.github,
            self.concurrency.jenkins,
            self.concurrency.storefront,
            self.concurrency.control_plane,
        ];
        if limits.contains(&0) {
            return Err(DaemonError::Config(
                "concurrency limits must be greater than zero".to_string(),
            ));
        }

        for (server, config) in &self.servers {
            if let Some(plugin) = config
                .plugins
                .iter()
                .find(|p| !self.plugins.contains_key(p.as_str()))
            {
                return Err(DaemonError::Config(format!(
                    "server {} references undefined plugin {}",
                    server, plugin
                )));
            }
        }

        let mut runtime_files: BTreeMap<String, &str> = BTreeMap::new();
        for (server, config) in &self.servers {
            let Some(runtime) = &config.runtime else {
                continue;
            };
            match runtime_files.entry(runtime.artifact_key()) {
                Entry::Occupied(staged) if *staged.get() != runtime.filename => {
                    return Err(DaemonError::Config(format!(
                        "server {} stages runtime {} as {}, another server uses {}",
                        server,
                        staged.key(),
                        runtime.filename,
                        staged.get()
                    )));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(runtime.filename.as_str());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.api.listen_addr.port(), 8080);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.approval.timeout_secs, 900);
        assert_eq!(config.deploy.settle_delay_ms, 5000);
        assert!(config.fetch.enforce_checksums);
        assert!(config.control_plane.credentials().is_none());
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.detect_interval_secs, 86_400);
        assert_eq!(config.fetch_interval_secs, 3_600);
        assert_eq!(config.deploy_interval_secs, 43_200);
        assert!(!config.run_on_startup);
    }

    #[test]
    fn test_validate_rejects_undefined_plugin() {
        let mut config = DaemonConfig::default();
        config.servers.insert(
            "Lobby".to_string(),
            ServerConfig {
                instance_id: None,
                address: None,
                max_players: 20,
                runtime: None,
                plugins: vec!["Foo".to_string()],
            },
        );
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        config.plugins.insert(
            "Foo".to_string(),
            PluginConfig {
                source: SourceSpec::Github {
                    repo: "acme/foo".into(),
                    asset_pattern: None,
                },
                filename: None,
                archive: None,
            },
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_conflicting_runtime_filenames() {
        let runtime = |filename: &str| RuntimeConfig {
            project: "paper".into(),
            version: "1.20.4".into(),
            filename: filename.into(),
        };
        let server = |runtime: RuntimeConfig| ServerConfig {
            instance_id: None,
            address: None,
            max_players: 0,
            runtime: Some(runtime),
            plugins: Vec::new(),
        };

        let mut config = DaemonConfig::default();
        config
            .servers
            .insert("Lobby".into(), server(runtime("server.jar")));
        config
            .servers
            .insert("Survival".into(), server(runtime("server.jar")));
        assert!(config.validate().is_ok());

        config
            .servers
            .insert("Creative".into(), server(runtime("paper.jar")));
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = DaemonConfig::default();
        config.scheduler.fetch_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_layers_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updraft.json");
        std::fs::write(
            &path,
            r#"{
                "approval": { "timeout_secs": 60 },
                "plugins": {
                    "foo": { "source": { "type": "github", "repo": "acme/foo" } }
                },
                "servers": {
                    "lobby": {
                        "instance_id": "abc123",
                        "max_players": 20,
                        "runtime": { "project": "paper", "version": "1.20.4" },
                        "plugins": ["foo"]
                    }
                }
            }"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.approval.timeout_secs, 60);
        let runtime = config.servers["lobby"].runtime.as_ref().unwrap();
        assert_eq!(runtime.filename, "server.jar");
        assert_eq!(runtime.artifact_key(), "paper-1.20.4");
        assert_eq!(config.servers["lobby"].plugins, vec!["foo".to_string()]);
        assert_eq!(config.servers["lobby"].max_players, 20);
        assert!(config.validate().is_ok());
    }
}
