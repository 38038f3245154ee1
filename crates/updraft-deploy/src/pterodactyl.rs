//! Pterodactyl client API implementation of [`ControlPlane`]

use crate::control::{ControlPlane, PowerSignal, PowerState};
use crate::error::ControlPlaneError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use updraft_types::InstanceId;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct Resources {
    current_state: String,
}

#[derive(Debug, Deserialize)]
struct UploadTarget {
    url: String,
}

/// Client for a Pterodactyl panel, authenticated with a client API key
pub struct PterodactylClient {
    client: reqwest::Client,
    host: String,
    api_key: String,
}

impl PterodactylClient {
    pub fn new(client: reqwest::Client, host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn server_url(&self, instance: &InstanceId, path: &str) -> String {
        format!("{}/api/client/servers/{}/{}", self.host, instance, path)
    }

    async fn get_attributes<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, ControlPlaneError> {
        let envelope: Envelope<T> = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| ControlPlaneError::InvalidResponse(e.to_string()))?;
        Ok(envelope.attributes)
    }

    async fn file_part(path: &Path) -> Result<Part, ControlPlaneError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ControlPlaneError::File {
                path: path.to_path_buf(),
                reason: "no file name".to_string(),
            })?
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ControlPlaneError::File {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Part::bytes(bytes).file_name(name))
    }
}

#[async_trait]
impl ControlPlane for PterodactylClient {
    #[instrument(skip(self), fields(instance = %instance))]
    async fn power_state(&self, instance: &InstanceId) -> Result<PowerState, ControlPlaneError> {
        let resources: Resources = self
            .get_attributes(&self.server_url(instance, "resources"))
            .await?;
        debug!(state = %resources.current_state, "Power state read");
        Ok(PowerState::from_panel(&resources.current_state))
    }

    #[instrument(skip(self), fields(instance = %instance))]
    async fn set_power(
        &self,
        instance: &InstanceId,
        signal: PowerSignal,
    ) -> Result<(), ControlPlaneError> {
        self.client
            .post(self.server_url(instance, "power"))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "signal": signal.as_str() }))
            .send()
            .await?
            .error_for_status()?;
        debug!(%signal, "Power signal sent");
        Ok(())
    }

    #[instrument(skip(self, files), fields(instance = %instance, files = files.len()))]
    async fn upload_files(
        &self,
        instance: &InstanceId,
        target_dir: &str,
        files: &[PathBuf],
    ) -> Result<(), ControlPlaneError> {
        // 1. Ask the panel for a signed upload URL
        let target: UploadTarget = self
            .get_attributes(&self.server_url(instance, "files/upload"))
            .await?;

        let mut url = reqwest::Url::parse(&target.url)
            .map_err(|e| ControlPlaneError::InvalidResponse(format!("upload url: {}", e)))?;
        url.query_pairs_mut().append_pair("directory", target_dir);

        // 2. Send every file in one multipart request
        let mut form = Form::new();
        for path in files {
            form = form.part("files", Self::file_part(path).await?);
        }

        self.client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        debug!(dir = target_dir, "Files uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PterodactylClient {
        PterodactylClient::new(reqwest::Client::new(), server.uri(), "ptlc_key")
    }

    #[tokio::test]
    async fn test_power_state_maps_offline_to_stopped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/abc123/resources"))
            .and(header("authorization", "Bearer ptlc_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "stats",
                "attributes": { "current_state": "offline", "is_suspended": false }
            })))
            .mount(&server)
            .await;

        let state = client(&server)
            .power_state(&InstanceId::from("abc123"))
            .await
            .unwrap();
        assert_eq!(state, PowerState::Stopped);
    }

    #[tokio::test]
    async fn test_set_power_posts_signal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client/servers/abc123/power"))
            .and(body_json(json!({ "signal": "kill" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .set_power(&InstanceId::from("abc123"), PowerSignal::Kill)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_sends_batch_to_signed_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/abc123/files/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "signed_url",
                "attributes": { "url": format!("{}/upload/file?token=t0k", server.uri()) }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/file"))
            .and(query_param("token", "t0k"))
            .and(query_param("directory", "/plugins/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let foo = dir.path().join("Foo.jar");
        let bar = dir.path().join("Bar.jar");
        std::fs::write(&foo, b"foo").unwrap();
        std::fs::write(&bar, b"bar").unwrap();

        client(&server)
            .upload_files(&InstanceId::from("abc123"), "/plugins/", &[foo, bar])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/client/servers/abc123/power"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client(&server)
            .set_power(&InstanceId::from("abc123"), PowerSignal::Stop)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_missing_upload_file_fails_before_posting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client/servers/abc123/files/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "attributes": { "url": format!("{}/upload/file", server.uri()) }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/file"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server)
            .upload_files(
                &InstanceId::from("abc123"),
                "/",
                &[PathBuf::from("/nonexistent/server.jar")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::File { .. }));
    }
}
