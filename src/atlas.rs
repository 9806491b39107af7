//! MongoDB Atlas Admin API client for Data Federation query logs

use crate::artifact::{ArtifactStore, CompressedArtifact};
use crate::config::{Config, SourceCredentials};
use crate::digest::{DigestChallenge, generate_cnonce};
use crate::errors::{ForwarderError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Project document returned by `GET /groups/{groupId}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub name: String,
}

/// A Data Federation instance as listed by the API
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LogSourceDescriptor {
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub name: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_null")]
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

fn unknown() -> String {
    "Unknown".to_string()
}

/// Explicit `null` is treated like a missing field
fn unknown_if_null<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(unknown))
}

#[derive(Debug, Clone)]
pub struct AtlasClient {
    client: Client,
    base_url: String,
    api_version: String,
    credentials: SourceCredentials,
    metadata_timeout: Duration,
    download_timeout: Duration,
    store: ArtifactStore,
}

impl AtlasClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("atlas_log_forwarder/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ForwarderError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            credentials: config.credentials.clone(),
            metadata_timeout: config.metadata_timeout,
            download_timeout: config.download_timeout,
            store: ArtifactStore::new(config.output_dir.clone()),
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn json_media_type(&self) -> String {
        format!("application/vnd.atlas.{}+json", self.api_version)
    }

    fn gzip_media_type(&self) -> String {
        format!("application/vnd.atlas.{}+gzip", self.api_version)
    }

    fn group_url(&self) -> String {
        format!("{}/groups/{}", self.base_url, self.credentials.group_id)
    }

    async fn get_basic(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .basic_auth(&self.credentials.public_key, Some(&self.credentials.private_key))
            .header(ACCEPT, self.json_media_type())
            .timeout(self.metadata_timeout)
            .send()
            .await
            .map_err(|e| ForwarderError::Transport(describe_request_error(&e)))
    }

    /// GET with digest authentication. The unauthenticated response is
    /// returned directly when the server does not challenge it.
    async fn get_digest(&self, url: &str, accept: &str, timeout: Duration) -> Result<Response> {
        let unauthenticated = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ForwarderError::Transport(describe_request_error(&e)))?;

        if unauthenticated.status() != StatusCode::UNAUTHORIZED {
            return Ok(unauthenticated);
        }

        let challenge_header = unauthenticated
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.trim_start().to_ascii_lowercase().starts_with("digest"))
            .map(str::to_string)
            .ok_or_else(|| {
                ForwarderError::Digest("401 response carried no Digest challenge".to_string())
            })?;
        let challenge = DigestChallenge::parse(&challenge_header)?;

        let uri = match unauthenticated.url().query() {
            Some(query) => format!("{}?{}", unauthenticated.url().path(), query),
            None => unauthenticated.url().path().to_string(),
        };
        drop(unauthenticated);

        let authorization = challenge.authorization(
            &self.credentials.public_key,
            &self.credentials.private_key,
            "GET",
            &uri,
            &generate_cnonce(),
            1,
        );

        self.client
            .get(url)
            .header(ACCEPT, accept)
            .header(AUTHORIZATION, authorization)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ForwarderError::Transport(describe_request_error(&e)))
    }

    /// Fetch the project document, classifying failures
    pub async fn fetch_project(&self) -> Result<ProjectInfo> {
        let response = self.get_basic(&self.group_url()).await?;
        let response = check_status(response, "reading project").await?;
        Ok(response.json::<ProjectInfo>().await?)
    }

    /// True only when the project document is readable with these credentials
    pub async fn check_access(&self) -> bool {
        info!("Testing basic MongoDB Atlas API access...");

        match self.fetch_project().await {
            Ok(project) => {
                info!("MongoDB Atlas API access successful");
                info!("Project Name: {}", project.name);
                true
            }
            Err(ForwarderError::Auth { status: 401, .. }) => {
                error!("MongoDB Atlas API authentication failed (401 Unauthorized)");
                error!("  Check your public and private API key");
                false
            }
            Err(ForwarderError::Auth { status: 403, .. }) => {
                error!("MongoDB Atlas API access forbidden (403 Forbidden)");
                error!("  Your API key may not have sufficient permissions");
                false
            }
            Err(e) => {
                error!(error_kind = e.kind(), "Failed to access MongoDB Atlas API: {}", e);
                false
            }
        }
    }

    /// List Data Federation instances, classifying failures
    pub async fn fetch_log_sources(&self) -> Result<Vec<LogSourceDescriptor>> {
        let url = format!("{}/dataFederation", self.group_url());
        let response = self.get_basic(&url).await?;
        let response = check_status(response, "listing Data Federation instances").await?;
        let page = response.json::<Paginated<LogSourceDescriptor>>().await?;
        Ok(page.results)
    }

    /// Data Federation instances in the project. Empty on any failure.
    pub async fn list_log_sources(&self) -> Vec<LogSourceDescriptor> {
        info!("Fetching available Data Federation instances...");

        match self.fetch_log_sources().await {
            Ok(sources) if sources.is_empty() => {
                warn!("No Data Federation instances found in this project");
                sources
            }
            Ok(sources) => {
                info!("Found {} Data Federation instances:", sources.len());
                for source in &sources {
                    info!("  - Name: {}, State: {}", source.name, source.state);
                }
                sources
            }
            Err(ForwarderError::Auth { status: 403, .. }) => {
                error!("Access forbidden when listing Data Federation instances");
                error!("  Required permission: Project Data Access Read/Write");
                Vec::new()
            }
            Err(e) => {
                error!(
                    error_kind = e.kind(),
                    "Failed to list Data Federation instances: {}", e
                );
                Vec::new()
            }
        }
    }

    /// Download the compressed query logs of `source_name`, classifying failures.
    ///
    /// A 404 is reported as [`ForwarderError::NotFound`].
    pub async fn fetch_query_logs(&self, source_name: &str) -> Result<CompressedArtifact> {
        let url = format!("{}/dataFederation/{}/queryLogs.gz", self.group_url(), source_name);
        let mut response = self
            .get_digest(&url, &self.gzip_media_type(), self.download_timeout)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ForwarderError::NotFound(format!(
                "no query logs for {}",
                source_name
            )));
        }
        response = check_status(response, "downloading query logs").await?;

        let mut writer = self.store.create_writer(source_name).await?;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = writer.write_chunk(&chunk).await {
                        writer.discard().await;
                        return Err(e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let received = writer.written();
                    writer.discard().await;
                    return Err(ForwarderError::Transport(format!(
                        "download interrupted after {} bytes: {}",
                        received,
                        describe_request_error(&e)
                    )));
                }
            }
        }

        writer.finish().await
    }

    /// Download query logs to disk. `None` when there is nothing to forward.
    pub async fn download_query_logs(&self, source_name: &str) -> Option<CompressedArtifact> {
        info!("Downloading query logs from Data Federation: {}", source_name);

        match self.fetch_query_logs(source_name).await {
            Ok(artifact) => {
                info!(
                    "Downloaded query logs to {} ({} bytes)",
                    artifact.path.display(),
                    artifact.size
                );
                Some(artifact)
            }
            Err(e) if e.is_not_found() => {
                warn!("No query logs found for {}.", source_name);
                None
            }
            Err(e) => {
                error!(error_kind = e.kind(), "Failed to download query logs: {}", e);
                None
            }
        }
    }
}

/// Map non-200 responses onto the error taxonomy
async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!("{} returned {}: {}", context, status, body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ForwarderError::Auth {
            status: status.as_u16(),
            context: context.to_string(),
        }),
        StatusCode::NOT_FOUND => Err(ForwarderError::NotFound(context.to_string())),
        _ => Err(ForwarderError::Transport(format!(
            "{} returned {}: {}",
            context, status, body
        ))),
    }
}

fn describe_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AtlasClient {
        let config = Config {
            base_url: "https://cloud.mongodb.com/api/atlas/v2/".to_string(),
            credentials: SourceCredentials {
                public_key: "pub".to_string(),
                private_key: "priv".to_string(),
                group_id: "5f1a".to_string(),
            },
            ..Config::default()
        };
        AtlasClient::new(&config).unwrap()
    }

    #[test]
    fn test_media_types() {
        let client = client();
        assert_eq!(client.json_media_type(), "application/vnd.atlas.2025-03-12+json");
        assert_eq!(client.gzip_media_type(), "application/vnd.atlas.2025-03-12+gzip");
    }

    #[test]
    fn test_group_url_strips_trailing_slash() {
        assert_eq!(
            client().group_url(),
            "https://cloud.mongodb.com/api/atlas/v2/groups/5f1a"
        );
    }

    #[test]
    fn test_descriptor_defaults() {
        let page: Paginated<LogSourceDescriptor> =
            serde_json::from_str(r#"{"results":[{"name":"df0","state":"ACTIVE"},{}]}"#).unwrap();

        assert_eq!(page.results[0].name, "df0");
        assert_eq!(page.results[1].name, "Unknown");
        assert_eq!(page.results[1].state, "Unknown");

        let empty: Paginated<LogSourceDescriptor> = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }

    #[test]
    fn test_null_fields_read_as_unknown() {
        let project: ProjectInfo = serde_json::from_str(r#"{"id":null,"name":null}"#).unwrap();
        assert_eq!(project.name, "Unknown");
        assert!(project.id.is_none());

        let source: LogSourceDescriptor =
            serde_json::from_str(r#"{"name":"df1","state":null}"#).unwrap();
        assert_eq!(source.name, "df1");
        assert_eq!(source.state, "Unknown");
    }
}
