//! Kubernetes REST entity source
//!
//! Reads PipelineRuns from the `tekton.dev/v1` API with a plain HTTP client.
//! Listing follows `continue` tokens until the collection is exhausted.
//! [`KubeApiSource::watch`] feeds the reactive controller from the
//! newline-delimited watch stream, reconnecting in bounded windows.

use crate::config::SourceConfig;
use runstate_controller::{EntitySource, SourceError, WatchEvent};
use runstate_domain::EntityId;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// API group path of the PipelineRun resource
pub const PIPELINERUN_API: &str = "apis/tekton.dev/v1";

/// Items requested per list page
const PAGE_SIZE: u32 = 500;

/// Client-side cap per request; the controller applies its own tighter timeout
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Server-side length of one watch window; must stay below the request cap
const WATCH_WINDOW_SECS: u64 = 50;

/// Pause before reconnecting a failed watch
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// HTTP status the API server reports for an expired resource version
const GONE: u64 = 410;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    metadata: ListMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ListMetadata {
    #[serde(rename = "continue", default)]
    continue_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    object: Value,
}

fn resource_version_of(object: &Value) -> Option<String> {
    object
        .get("metadata")?
        .get("resourceVersion")?
        .as_str()
        .map(str::to_string)
}

/// Turn one watch line into a controller event
///
/// Tracks the last seen resource version so a reconnect resumes where the
/// previous window ended. Bookmarks and unknown types yield no event.
fn decode_watch_line(
    line: &[u8],
    resource_version: &mut Option<String>,
) -> Result<Option<WatchEvent>, SourceError> {
    let raw: RawWatchEvent = serde_json::from_slice(line)
        .map_err(|e| SourceError::Response(format!("Invalid watch event: {}", e)))?;

    match raw.event_type.as_str() {
        "ADDED" | "MODIFIED" => {
            if let Some(rv) = resource_version_of(&raw.object) {
                *resource_version = Some(rv);
            }
            Ok(Some(WatchEvent::Applied(raw.object)))
        }
        "DELETED" => {
            if let Some(rv) = resource_version_of(&raw.object) {
                *resource_version = Some(rv);
            }
            Ok(Some(WatchEvent::Deleted(raw.object)))
        }
        "BOOKMARK" => {
            if let Some(rv) = resource_version_of(&raw.object) {
                *resource_version = Some(rv);
            }
            Ok(None)
        }
        "ERROR" => {
            if raw.object.get("code").and_then(Value::as_u64) == Some(GONE) {
                *resource_version = None;
            }
            let message = raw
                .object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown watch error");
            Err(SourceError::Response(message.to_string()))
        }
        other => {
            tracing::debug!("Ignoring watch event type {}", other);
            Ok(None)
        }
    }
}

/// [`EntitySource`] backed by the Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubeApiSource {
    client: reqwest::Client,
    api_server: String,
    namespace: String,
    token: Option<String>,
}

impl KubeApiSource {
    /// Build a source from the `[source]` configuration
    ///
    /// A configured token or CA file that does not exist is skipped with a
    /// warning, which lets the same configuration run outside a cluster.
    ///
    /// # Errors
    /// Returns [`SourceError::Request`] if a file exists but cannot be used
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));

        if let Some(path) = &config.ca_cert_file {
            if path.exists() {
                let pem = std::fs::read(path).map_err(|e| {
                    SourceError::Request(format!("Failed to read CA bundle {}: {}", path.display(), e))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| SourceError::Request(format!("Invalid CA bundle: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            } else {
                tracing::warn!("CA bundle {} not found, using system roots", path.display());
            }
        }

        let token = match &config.bearer_token_file {
            Some(path) if path.exists() => {
                let token = std::fs::read_to_string(path).map_err(|e| {
                    SourceError::Request(format!("Failed to read token {}: {}", path.display(), e))
                })?;
                Some(token.trim().to_string())
            }
            Some(path) => {
                tracing::warn!("Token file {} not found, sending unauthenticated requests", path.display());
                None
            }
            None => None,
        };

        let client = builder
            .build()
            .map_err(|e| SourceError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_server: config.api_server.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            token,
        })
    }

    /// Collection URL, cluster-wide or namespaced
    pub fn list_url(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}/pipelineruns", self.api_server, PIPELINERUN_API)
        } else {
            format!(
                "{}/{}/namespaces/{}/pipelineruns",
                self.api_server, PIPELINERUN_API, self.namespace
            )
        }
    }

    /// URL of a single PipelineRun
    pub fn item_url(&self, id: &EntityId) -> String {
        format!(
            "{}/{}/namespaces/{}/pipelineruns/{}",
            self.api_server,
            PIPELINERUN_API,
            id.namespace(),
            id.name()
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn list_page(&self, continue_token: Option<&str>) -> Result<ListResponse, SourceError> {
        let mut query: Vec<(&str, String)> = vec![("limit", PAGE_SIZE.to_string())];
        if let Some(token) = continue_token {
            query.push(("continue", token.to_string()));
        }

        let response = self
            .request(&self.list_url())
            .query(&query)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Response(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<ListResponse>()
            .await
            .map_err(|e| SourceError::Response(format!("Failed to parse list: {}", e)))
    }
}

impl KubeApiSource {
    /// Forward watch events into `events` until the receiver is dropped
    ///
    /// Each window is closed by the server after a bounded time and reopened
    /// from the last seen resource version. Failed windows are retried after
    /// a short pause; deletions missed in between are caught by resync.
    pub async fn watch(&self, events: mpsc::Sender<WatchEvent>) {
        let mut resource_version: Option<String> = None;
        tracing::info!("Watching PipelineRuns at {}", self.list_url());

        while !events.is_closed() {
            match self.watch_window(&events, &mut resource_version).await {
                Ok(()) => tracing::debug!("Watch window closed, reconnecting"),
                Err(e) => {
                    tracing::warn!("Watch failed ({}), reconnecting in {:?}", e, WATCH_RETRY_DELAY);
                    tokio::time::sleep(WATCH_RETRY_DELAY).await;
                }
            }
        }
        tracing::info!("Watch stopped");
    }

    async fn watch_window(
        &self,
        events: &mpsc::Sender<WatchEvent>,
        resource_version: &mut Option<String>,
    ) -> Result<(), SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("watch", "true".to_string()),
            ("allowWatchBookmarks", "true".to_string()),
            ("timeoutSeconds", WATCH_WINDOW_SECS.to_string()),
        ];
        if let Some(rv) = resource_version.as_ref() {
            query.push(("resourceVersion", rv.clone()));
        }

        let mut response = self
            .request(&self.list_url())
            .query(&query)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::GONE {
            *resource_version = None;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Response(format!("HTTP {}: {}", status, body)));
        }

        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?
        {
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if let Some(event) = decode_watch_line(&line, resource_version)? {
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

impl EntitySource for KubeApiSource {
    async fn list(&self) -> Result<Vec<Value>, SourceError> {
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let page = self.list_page(continue_token.as_deref()).await?;
            items.extend(page.items);
            match page.metadata.continue_token {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Listed {} PipelineRuns", items.len());
        Ok(items)
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Value>, SourceError> {
        let response = self
            .request(&self.item_url(id))
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Response(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|e| SourceError::Response(format!("Failed to parse PipelineRun: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn config(namespace: &str) -> SourceConfig {
        SourceConfig {
            api_server: "https://api.example:6443/".to_string(),
            namespace: namespace.to_string(),
            bearer_token_file: None,
            ca_cert_file: None,
        }
    }

    #[test]
    fn test_cluster_wide_list_url() {
        let source = KubeApiSource::from_config(&config("")).unwrap();
        assert_eq!(
            source.list_url(),
            "https://api.example:6443/apis/tekton.dev/v1/pipelineruns"
        );
    }

    #[test]
    fn test_namespaced_urls() {
        let source = KubeApiSource::from_config(&config("builds")).unwrap();
        assert_eq!(
            source.list_url(),
            "https://api.example:6443/apis/tekton.dev/v1/namespaces/builds/pipelineruns"
        );
        assert_eq!(
            source.item_url(&EntityId::new("other", "pr-1")),
            "https://api.example:6443/apis/tekton.dev/v1/namespaces/other/pipelineruns/pr-1"
        );
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  secret-token  ").unwrap();

        let mut cfg = config("");
        cfg.bearer_token_file = Some(file.path().to_path_buf());
        let source = KubeApiSource::from_config(&cfg).unwrap();
        assert_eq!(source.token.as_deref(), Some("secret-token"));
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let mut cfg = config("");
        cfg.bearer_token_file = Some(PathBuf::from("/nonexistent/token"));
        cfg.ca_cert_file = Some(PathBuf::from("/nonexistent/ca.crt"));
        let source = KubeApiSource::from_config(&cfg).unwrap();
        assert!(source.token.is_none());
    }

    #[test]
    fn test_list_page_decoding() {
        let page: ListResponse = serde_json::from_str(
            r#"{ "items": [ { "metadata": { "name": "a" } } ], "metadata": { "continue": "abc" } }"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.metadata.continue_token.as_deref(), Some("abc"));

        let last: ListResponse = serde_json::from_str(r#"{ "items": [] , "metadata": {} }"#).unwrap();
        assert!(last.metadata.continue_token.is_none());
    }

    #[test]
    fn test_decode_watch_events() {
        let mut rv = None;

        let added = br#"{"type":"ADDED","object":{"metadata":{"namespace":"ci","name":"a","resourceVersion":"7"}}}"#;
        assert!(matches!(
            decode_watch_line(added, &mut rv).unwrap(),
            Some(WatchEvent::Applied(_))
        ));
        assert_eq!(rv.as_deref(), Some("7"));

        let deleted = br#"{"type":"DELETED","object":{"metadata":{"namespace":"ci","name":"a","resourceVersion":"9"}}}"#;
        assert!(matches!(
            decode_watch_line(deleted, &mut rv).unwrap(),
            Some(WatchEvent::Deleted(_))
        ));
        assert_eq!(rv.as_deref(), Some("9"));

        let bookmark = br#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"12"}}}"#;
        assert!(decode_watch_line(bookmark, &mut rv).unwrap().is_none());
        assert_eq!(rv.as_deref(), Some("12"));
    }

    #[test]
    fn test_decode_watch_expired() {
        let mut rv = Some("5".to_string());
        let expired = br#"{"type":"ERROR","object":{"code":410,"message":"too old resource version"}}"#;

        let err = decode_watch_line(expired, &mut rv).unwrap_err();
        assert_eq!(err, SourceError::Response("too old resource version".to_string()));
        assert!(rv.is_none());
    }

    #[test]
    fn test_decode_watch_garbage() {
        let mut rv = None;
        assert!(decode_watch_line(b"not json", &mut rv).is_err());
    }
}
