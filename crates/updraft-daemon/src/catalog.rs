//! Configured artifacts and servers, resolved into fetch and deploy targets

use crate::config::DaemonConfig;
use std::collections::BTreeMap;
use updraft_deploy::ServerTarget;
use updraft_fetch::{ArtifactTarget, SourceSpec};
use updraft_types::{ArtifactId, InstanceId, ServerName};

/// Every artifact and server the daemon manages
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    artifacts: BTreeMap<ArtifactId, ArtifactTarget>,
    servers: Vec<ServerTarget>,
}

impl Catalog {
    /// Resolve a validated configuration
    pub fn from_config(config: &DaemonConfig) -> Self {
        let mut artifacts = BTreeMap::new();

        // One runtime artifact per distinct build line
        for runtime in config.servers.values().filter_map(|s| s.runtime.as_ref()) {
            let id = ArtifactId::runtime(runtime.artifact_key());
            artifacts.entry(id.clone()).or_insert_with(|| ArtifactTarget {
                id,
                source: SourceSpec::Paper {
                    project: runtime.project.clone(),
                    version: runtime.version.clone(),
                },
                staged_filename: runtime.filename.clone(),
                archive: None,
            });
        }

        for (key, plugin) in &config.plugins {
            let target = ArtifactTarget {
                id: ArtifactId::plugin(key.as_str()),
                source: plugin.source.clone(),
                staged_filename: plugin
                    .filename
                    .clone()
                    .unwrap_or_else(|| format!("{}.jar", key)),
                archive: plugin.archive.clone(),
            };
            artifacts.insert(target.id.clone(), target);
        }

        let servers = config
            .servers
            .iter()
            .map(|(name, server)| ServerTarget {
                name: ServerName::from(name.as_str()),
                instance: server.instance_id.as_deref().map(InstanceId::from),
                address: server.address.clone(),
                occupancy_threshold: server.max_players,
                runtime: server.runtime.as_ref().and_then(|runtime| {
                    artifacts
                        .get(&ArtifactId::runtime(runtime.artifact_key()))
                        .cloned()
                }),
                plugins: server
                    .plugins
                    .iter()
                    .filter_map(|key| artifacts.get(&ArtifactId::plugin(key.as_str())).cloned())
                    .collect(),
            })
            .collect();

        Self { artifacts, servers }
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactTarget> {
        self.artifacts.values()
    }

    pub fn artifact(&self, id: &ArtifactId) -> Option<&ArtifactTarget> {
        self.artifacts.get(id)
    }

    pub fn servers(&self) -> &[ServerTarget] {
        &self.servers
    }

    /// Servers that would receive `id` on their next deploy
    pub fn affected_servers(&self, id: &ArtifactId) -> Vec<ServerName> {
        self.servers
            .iter()
            .filter(|s| {
                s.runtime.as_ref().is_some_and(|r| &r.id == id)
                    || s.plugins.iter().any(|p| &p.id == id)
            })
            .map(|s| s.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PluginConfig, RuntimeConfig, ServerConfig};

    fn config() -> DaemonConfig {
        let mut config = DaemonConfig::default();
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
                max_players: 20,
                runtime: Some(paper("1.20.4")),
                plugins: vec!["Foo".into()],
            },
        );
        config.servers.insert(
            "Proxy".into(),
            ServerConfig {
                instance_id: None,
                address: None,
                max_players: 0,
                runtime: None,
                plugins: Vec::new(),
            },
        );
        config
    }

    fn paper(version: &str) -> RuntimeConfig {
        RuntimeConfig {
            project: "paper".into(),
            version: version.into(),
            filename: "server.jar".into(),
        }
    }

    #[test]
    fn test_catalog_resolves_targets() {
        let catalog = Catalog::from_config(&config());

        let runtime = catalog
            .artifact(&ArtifactId::runtime("paper-1.20.4"))
            .unwrap();
        assert_eq!(runtime.staged_filename, "server.jar");

        let foo = catalog.artifact(&ArtifactId::plugin("Foo")).unwrap();
        assert_eq!(foo.staged_filename, "Foo.jar");
        assert_eq!(catalog.artifacts().count(), 2);

        let lobby = &catalog.servers()[0];
        assert_eq!(lobby.name, ServerName::from("Lobby"));
        assert_eq!(lobby.occupancy_threshold, 20);
        assert!(lobby.runtime.is_some());
        assert_eq!(lobby.plugins.len(), 1);

        let proxy = &catalog.servers()[1];
        assert!(proxy.runtime.is_none());
    }

    #[test]
    fn test_affected_servers() {
        let catalog = Catalog::from_config(&config());
        assert_eq!(
            catalog.affected_servers(&ArtifactId::plugin("Foo")),
            vec![ServerName::from("Lobby")]
        );
        assert_eq!(
            catalog.affected_servers(&ArtifactId::runtime("paper-1.20.4")),
            vec![ServerName::from("Lobby")]
        );
    }

    #[test]
    fn test_servers_on_different_runtime_lines() {
        let mut config = config();
        for (name, version) in [("Survival", "1.20.4"), ("Legacy", "1.8.8")] {
            config.servers.insert(
                name.into(),
                ServerConfig {
                    instance_id: None,
                    address: None,
                    max_players: 0,
                    runtime: Some(paper(version)),
                    plugins: Vec::new(),
                },
            );
        }
        let catalog = Catalog::from_config(&config);

        let runtimes: Vec<_> = catalog
            .artifacts()
            .filter(|a| a.id.kind == updraft_types::ArtifactKind::Runtime)
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(
            runtimes,
            vec![
                ArtifactId::runtime("paper-1.20.4"),
                ArtifactId::runtime("paper-1.8.8")
            ]
        );

        let legacy = catalog
            .servers()
            .iter()
            .find(|s| s.name == ServerName::from("Legacy"))
            .unwrap();
        assert_eq!(
            legacy.runtime.as_ref().unwrap().source,
            SourceSpec::Paper {
                project: "paper".into(),
                version: "1.8.8".into(),
            }
        );
        assert_eq!(
            catalog.affected_servers(&ArtifactId::runtime("paper-1.20.4")),
            vec![ServerName::from("Lobby"), ServerName::from("Survival")]
        );
    }
}
