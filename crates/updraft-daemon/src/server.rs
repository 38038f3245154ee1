//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::board::PromptBoard;
use crate::catalog::Catalog;
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::events::EventLog;
use crate::scheduler::{CycleReport, Scheduler, SchedulerParts};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use updraft_approval::ApprovalGate;
use updraft_deploy::{DeploySettings, DeploymentOrchestrator, MinecraftStatusProbe, PterodactylClient};
use updraft_fetch::{
    http_client, ArtifactFetcher, GithubSource, HttpSettings, JenkinsSource, PaperSource,
    SourceSet, StagingArea,
};
use updraft_registry::{InMemoryStore, RegistryStore, SqliteStore, VersionRegistry};
use updraft_types::UpdaterEventEnvelope;

/// Updraft daemon server
pub struct Server {
    config: DaemonConfig,
    registry: Arc<VersionRegistry>,
    catalog: Arc<Catalog>,
    board: Arc<PromptBoard>,
    scheduler: Arc<Scheduler>,
    events: Arc<EventLog>,
    event_tx: broadcast::Sender<UpdaterEventEnvelope>,
    shutdown_tx: watch::Sender<bool>,
    deploys_enabled: bool,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        // 1. Storage
        let store: Arc<dyn RegistryStore> = match &config.storage {
            StorageConfig::Memory => {
                warn!("Using in-memory storage, registry state is lost on restart");
                Arc::new(InMemoryStore::new())
            }
            StorageConfig::Sqlite {
                url,
                max_connections,
                connect_timeout_secs,
            } => Arc::new(SqliteStore::new(url, *max_connections, *connect_timeout_secs).await?),
        };
        let registry = Arc::new(VersionRegistry::new(store));

        // 2. Event and shutdown channels
        let (event_tx, _) = broadcast::channel(1000);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let events = Arc::new(EventLog::new(config.api.event_buffer));
        events.spawn_recorder(event_tx.subscribe());

        // 3. Approval
        let board = Arc::new(PromptBoard::new());
        let gate = Arc::new(
            ApprovalGate::new(board.clone())
                .with_shutdown(shutdown_rx.clone())
                .with_events(event_tx.clone()),
        );

        // 4. Sources; storefronts need a browser session and are left unregistered
        let client = http_client(&HttpSettings {
            timeout: Duration::from_secs(config.fetch.http_timeout_secs),
            ..HttpSettings::default()
        })?;
        let sources = SourceSet::new()
            .with(Arc::new(PaperSource::new(
                client.clone(),
                &config.sources.paper_api,
            )))
            .with(Arc::new(GithubSource::new(
                client.clone(),
                &config.sources.github_api,
                config.sources.github_token.clone(),
            )))
            .with(Arc::new(JenkinsSource::new(client.clone())));

        // 5. Fetcher
        let staging = StagingArea::new(config.fetch.staging_dir.clone());
        let fetcher = Arc::new(
            ArtifactFetcher::new(registry.clone(), sources.clone(), staging.clone())
                .with_checksum_enforcement(config.fetch.enforce_checksums)
                .with_events(event_tx.clone()),
        );

        // 6. Server records
        let catalog = Arc::new(Catalog::from_config(&config));
        for server in catalog.servers() {
            registry
                .ensure_server(&server.name, server.configured_plugins())
                .await?;
        }

        // 7. Scheduler, with deploys only when the panel is reachable
        let approval_timeout = Duration::from_secs(config.approval.timeout_secs);
        let mut scheduler = Scheduler::new(
            config.scheduler.clone(),
            SchedulerParts {
                registry: registry.clone(),
                catalog: catalog.clone(),
                sources,
                gate: gate.clone(),
                fetcher,
                event_tx: event_tx.clone(),
            },
        )
        .with_limits(&config.concurrency)
        .with_approval_timeout(approval_timeout)
        .with_shutdown(shutdown_rx);

        let deploys_enabled = match config.control_plane.credentials() {
            Some((host, api_key)) => {
                let orchestrator = DeploymentOrchestrator::new(
                    registry.clone(),
                    gate,
                    Arc::new(PterodactylClient::new(client, host, api_key)),
                    Arc::new(MinecraftStatusProbe::new(Duration::from_secs(
                        config.deploy.probe_timeout_secs,
                    ))),
                    staging,
                )
                .with_settings(DeploySettings {
                    approval_timeout,
                    settle_delay: Duration::from_millis(config.deploy.settle_delay_ms),
                })
                .with_events(event_tx.clone());
                scheduler = scheduler.with_orchestrator(Arc::new(orchestrator));
                true
            }
            None => {
                warn!("No control plane configured, servers will not be deployed");
                false
            }
        };

        info!(
            artifacts = catalog.artifacts().count(),
            servers = catalog.servers().len(),
            deploys_enabled,
            "Daemon initialized"
        );

        Ok(Self {
            config,
            registry,
            catalog,
            board,
            scheduler: Arc::new(scheduler),
            events,
            event_tx,
            shutdown_tx,
            deploys_enabled,
        })
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn deploys_enabled(&self) -> bool {
        self.deploys_enabled
    }

    fn app_state(&self) -> AppState {
        AppState::new(
            self.registry.clone(),
            self.catalog.clone(),
            self.board.clone(),
            self.scheduler.clone(),
            self.events.clone(),
            self.event_tx.clone(),
        )
        .with_deploys_enabled(self.deploys_enabled)
    }

    async fn bind(&self) -> DaemonResult<TcpListener> {
        let addr = self.config.api.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Updraft daemon listening");
        Ok(listener)
    }

    /// Serve the API and run the cycle loops until a shutdown signal
    pub async fn run(self) -> DaemonResult<()> {
        let listener = self.bind().await?;
        let app = create_router(self.app_state());
        let loops = self.scheduler.start();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        info!("Updraft daemon shutting down");
        self.stop(loops).await;
        Ok(())
    }

    /// Serve the API while one pass of every cycle runs, then exit
    pub async fn run_once(self) -> DaemonResult<Vec<CycleReport>> {
        let listener = self.bind().await?;
        let app = create_router(self.app_state());

        let mut stop_rx = self.shutdown_tx.subscribe();
        let serve = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.wait_for(|stopped| *stopped).await;
                })
                .await
        });

        let reports = tokio::select! {
            reports = self.scheduler.run_all() => reports,
            _ = shutdown_signal() => Vec::new(),
        };

        self.stop(Vec::new()).await;
        serve
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?
            .map_err(|e| DaemonError::Server(e.to_string()))?;
        Ok(reports)
    }

    async fn stop(&self, loops: Vec<JoinHandle<()>>) {
        let _ = self.shutdown_tx.send(true);
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Cycle loop panicked");
            }
        }
        // Open prompts render as abandoned once the gate sees the shutdown
        self.scheduler.settle_promotions().await;
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PluginConfig, ServerConfig};
    use updraft_fetch::SourceSpec;

    fn config(staging: &std::path::Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.fetch.staging_dir = staging.to_path_buf();
        config.plugins.insert(
            "Foo".into(),
            PluginConfig {
                source: SourceSpec::Github {
                    repo: "acme/foo".into(),
                    asset_pattern: None,
                },
                filename: None,
                archive: None,
            },
        );
        config.servers.insert(
            "Lobby".into(),
            ServerConfig {
                instance_id: Some("abc123".into()),
                address: None,
                max_players: 0,
                runtime: None,
                plugins: vec!["Foo".into()],
            },
        );
        config
    }

    #[tokio::test]
    async fn test_server_records_created_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::new(config(dir.path())).await.unwrap();

        let servers = server.registry().list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert!(!server.deploys_enabled());
    }

    #[tokio::test]
    async fn test_control_plane_enables_deploys() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.control_plane.host = Some("https://panel.example.test".into());
        config.control_plane.api_key = Some("ptlc_key".into());

        let server = Server::new(config).await.unwrap();
        assert!(server.deploys_enabled());
    }

    #[tokio::test]
    async fn test_sqlite_storage_persists_servers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.storage = StorageConfig::Sqlite {
            url: format!("sqlite://{}", dir.path().join("updraft.db").display()),
            max_connections: 1,
            connect_timeout_secs: 5,
        };

        drop(Server::new(config.clone()).await.unwrap());
        let server = Server::new(config).await.unwrap();
        assert_eq!(server.registry().list_servers().await.unwrap().len(), 1);
    }
}
