use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use citelens_core::config::StorageConfig;
use citelens_core::{BlobError, BlobStore, DirBlobStore, MemoryBlobStore};
use tracing::{debug, instrument};
use url::Url;

/// Blob storage reached over HTTP, with an optional bearer token.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base: Url, token: Option<String>) -> Result<Self> {
        if base.cannot_be_a_base() {
            anyhow::bail!("blob base URL {} cannot carry a path", base);
        }
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn blob_url(&self, path: &str) -> Result<Url, BlobError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.iter().any(|s| *s == "..") {
            return Err(BlobError::InvalidPath(path.to_owned()));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BlobError::InvalidPath(path.to_owned()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    #[instrument(skip(self))]
    async fn fetch(&self, path: &str) -> Result<Bytes, BlobError> {
        let url = self.blob_url(path)?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let transport = |err: reqwest::Error| BlobError::Transport {
            path: path.to_owned(),
            message: err.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(path.to_owned()));
        }
        if !status.is_success() {
            return Err(BlobError::Status {
                path: path.to_owned(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(transport)?;
        debug!(bytes = body.len(), "fetched blob");
        Ok(body)
    }
}

/// Picks the blob store described by the storage config: a local directory
/// when `root_dir` is set, else HTTP when `base_url` is set, else an empty
/// in-memory store.
pub fn open_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    if let Some(root) = &config.root_dir {
        return Ok(Arc::new(DirBlobStore::new(root.clone())));
    }
    if let Some(base) = &config.base_url {
        let base = Url::parse(base).with_context(|| format!("invalid storage.base_url {:?}", base))?;
        return Ok(Arc::new(HttpBlobStore::new(base, config.auth_token.clone())?));
    }
    Ok(Arc::new(MemoryBlobStore::new()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use citelens_core::{FolderRules, OcrLayoutResolver, OcrLookup, OcrQuery};
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct FakeServer {
        base: Url,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl FakeServer {
        /// Serves `routes` (path → status, body); any other path is a 404.
        async fn start(routes: Vec<(&str, u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
                routes
                    .into_iter()
                    .map(|(path, status, body)| (path.to_owned(), (status, body)))
                    .collect(),
            );
            let requests = Arc::new(Mutex::new(Vec::new()));

            let seen = Arc::clone(&requests);
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let routes = Arc::clone(&routes);
                    let seen = Arc::clone(&seen);
                    tokio::spawn(async move {
                        let mut raw = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => raw.extend_from_slice(&buf[..n]),
                            }
                        }
                        let request = String::from_utf8_lossy(&raw).into_owned();
                        let path = request
                            .split_whitespace()
                            .nth(1)
                            .unwrap_or_default()
                            .to_owned();
                        seen.lock().unwrap().push(request);

                        let (status, body) = routes
                            .get(&path)
                            .cloned()
                            .unwrap_or((404, String::new()));
                        let response = format!(
                            "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            Self {
                base: Url::parse(&format!("http://{addr}/blobs/")).unwrap(),
                requests,
            }
        }

        fn store(&self, token: Option<&str>) -> HttpBlobStore {
            HttpBlobStore::new(self.base.clone(), token.map(str::to_owned)).unwrap()
        }

        fn requested_paths(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| r.split_whitespace().nth(1).map(str::to_owned))
                .collect()
        }
    }

    fn store(base: &str) -> HttpBlobStore {
        HttpBlobStore::new(Url::parse(base).unwrap(), None).unwrap()
    }

    #[test]
    fn blob_urls_append_encoded_segments() {
        let url = store("https://blob.example/api/blob/")
            .blob_url("u1/json/설비 사양서/meta.json")
            .unwrap();
        assert!(url.as_str().starts_with("https://blob.example/api/blob/u1/json/"));
        assert!(url.as_str().ends_with("/meta.json"));
        assert!(!url.as_str().contains(' '));

        let url = store("https://blob.example/api").blob_url("/a/b.json").unwrap();
        assert_eq!(url.as_str(), "https://blob.example/api/a/b.json");
    }

    #[test]
    fn blob_urls_reject_traversal_and_empty_paths() {
        let store = store("https://blob.example/");
        assert!(matches!(store.blob_url("../x"), Err(BlobError::InvalidPath(_))));
        assert!(matches!(store.blob_url("//"), Err(BlobError::InvalidPath(_))));
    }

    #[test]
    fn non_hierarchical_base_is_rejected() {
        assert!(HttpBlobStore::new(Url::parse("mailto:blob@example.com").unwrap(), None).is_err());
    }

    #[tokio::test]
    async fn storage_config_prefers_local_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), b"[]").unwrap();
        let config = StorageConfig {
            root_dir: Some(dir.path().to_path_buf()),
            base_url: Some("https://blob.example/".into()),
            ..StorageConfig::default()
        };
        let store = open_blob_store(&config).unwrap();
        assert_eq!(&store.fetch("a.json").await.unwrap()[..], b"[]");

        let store = open_blob_store(&StorageConfig::default()).unwrap();
        assert!(matches!(store.fetch("a.json").await, Err(BlobError::NotFound(_))));

        let bad = StorageConfig {
            base_url: Some("::".into()),
            ..StorageConfig::default()
        };
        assert!(open_blob_store(&bad).is_err());
    }

    #[tokio::test]
    async fn fetch_maps_http_statuses() {
        let server = FakeServer::start(vec![
            ("/blobs/u1/ok.json", 200, "{\"ok\":true}".to_owned()),
            ("/blobs/u1/boom.json", 500, "oops".to_owned()),
        ])
        .await;
        let store = server.store(Some("secret"));

        let body = store.fetch("u1/ok.json").await.unwrap();
        assert_eq!(&body[..], br#"{"ok":true}"#);

        match store.fetch("u1/missing.json").await {
            Err(BlobError::NotFound(path)) => assert_eq!(path, "u1/missing.json"),
            other => panic!("unexpected {other:?}"),
        }
        match store.fetch("u1/boom.json").await {
            Err(BlobError::Status { path, status }) => {
                assert_eq!(path, "u1/boom.json");
                assert_eq!(status, 500);
            }
            other => panic!("unexpected {other:?}"),
        }

        let requests = server.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests
            .iter()
            .all(|r| r.to_lowercase().contains("authorization: bearer secret")));
    }

    #[tokio::test]
    async fn fetch_without_token_sends_no_authorization() {
        let server = FakeServer::start(vec![("/blobs/a.json", 200, "[]".to_owned())]).await;
        server.store(None).fetch("a.json").await.unwrap();
        let requests = server.requests.lock().unwrap().clone();
        assert!(!requests[0].to_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let store = HttpBlobStore::new(base, None).unwrap();
        match store.fetch("a.json").await {
            Err(BlobError::Transport { path, .. }) => assert_eq!(path, "a.json"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_fall_through_to_legacy_analysis() {
        let legacy = json!({"pages": [
            {"page_number": 1, "width": 100, "height": 200, "lines": [
                {"content": "토출 압력", "polygon": [0, 0, 10, 0, 10, 5, 0, 5]}
            ]}
        ]});
        let server = FakeServer::start(vec![
            ("/blobs/u1/json/doc/meta.json", 500, String::new()),
            ("/blobs/u1/json/doc/page_1.json", 503, String::new()),
            ("/blobs/u1/json/doc.json", 200, legacy.to_string()),
        ])
        .await;
        let resolver = OcrLayoutResolver::new(
            Arc::new(server.store(Some("secret"))),
            FolderRules::new(["manuals"]),
        );

        let lookup = resolver
            .resolve(&OcrQuery {
                user_id: "u1".into(),
                filename: "doc.pdf".into(),
                page: 1,
                blob_path: "u1/misc/doc.pdf".into(),
            })
            .await;
        assert!(matches!(lookup, OcrLookup::Legacy(_)));
        assert_eq!(lookup.page().unwrap().lines[0].content, "토출 압력");
        assert_eq!(
            server.requested_paths(),
            vec![
                "/blobs/u1/json/doc/meta.json",
                "/blobs/u1/json/doc/page_1.json",
                "/blobs/u1/json/doc.json",
            ]
        );
    }
}
