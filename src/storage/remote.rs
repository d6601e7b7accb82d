//! HTTP client for a remote blob service exposing the forge HTTP surface.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::artifacts::{compute_checksum, validate_key, validate_namespace, BlobError, BlobMeta, BlobStore};

#[derive(Debug, Deserialize)]
struct ListResponse {
    files: Vec<String>,
}

/// [`BlobStore`] that talks to a remote service over HTTP.
///
/// Calls fail fast; only [`HttpBlobStore::check_health`] retries.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
}

fn map_send_error(e: reqwest::Error) -> BlobError {
    if e.is_connect() || e.is_timeout() {
        BlobError::TransientNetwork(e.to_string())
    } else {
        BlobError::Request(e.to_string())
    }
}

async fn check_status(resp: Response, key: &str) -> Result<Response, BlobError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BlobError::NotFound(key.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BlobError::Http {
        status: status.as_u16(),
        body,
    })
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BlobError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlobError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, param: &str, value: &str) -> String {
        format!(
            "{}{}?{}={}",
            self.base_url,
            path,
            param,
            urlencoding::encode(value)
        )
    }

    /// Probes `GET /health`, retrying up to `retries` attempts with linear backoff.
    pub async fn check_health(&self, retries: u32, backoff: Duration) -> Result<(), BlobError> {
        let attempts = retries.max(1);
        let url = format!("{}/health", self.base_url);
        let mut last_error = BlobError::TransientNetwork("no attempt made".to_string());

        for attempt in 1..=attempts {
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url = %url, attempt, "Blob service healthy");
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = BlobError::Http {
                        status: resp.status().as_u16(),
                        body: resp.text().await.unwrap_or_default(),
                    };
                }
                Err(e) => last_error = map_send_error(e),
            }

            tracing::warn!(
                url = %url,
                attempt,
                attempts,
                error = %last_error,
                "Blob service health check failed"
            );
            if attempt < attempts {
                tokio::time::sleep(backoff * attempt).await;
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn create_namespace(&self, namespace: &str) -> Result<(), BlobError> {
        validate_namespace(namespace)?;
        let resp = self
            .client
            .post(self.url("/create-dataset/", "dataset_name", namespace))
            .send()
            .await
            .map_err(map_send_error)?;
        // An existing namespace is fine.
        if resp.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        check_status(resp, namespace).await?;
        Ok(())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<BlobMeta, BlobError> {
        validate_key(key)?;
        let resp = self
            .client
            .post(self.url("/upload", "filename", key))
            .body(data.to_vec())
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(resp, key).await?;

        tracing::debug!(key = key, size = data.len(), "Blob uploaded");
        Ok(BlobMeta {
            key: key.to_string(),
            size: data.len() as u64,
            sha256: compute_checksum(data),
        })
    }

    async fn put_file(&self, key: &str, src: &Path) -> Result<BlobMeta, BlobError> {
        let data = tokio::fs::read(src).await?;
        self.put(key, &data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        validate_key(key)?;
        let resp = self
            .client
            .get(self.url("/download", "filename", key))
            .send()
            .await
            .map_err(map_send_error)?;
        let resp = check_status(resp, key).await?;
        let bytes = resp.bytes().await.map_err(map_send_error)?;
        Ok(bytes.to_vec())
    }

    async fn fetch_to(&self, key: &str, dest: &Path) -> Result<u64, BlobError> {
        let data = self.get(key).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>, BlobError> {
        validate_namespace(namespace)?;
        let resp = self
            .client
            .get(self.url("/list", "name", namespace))
            .send()
            .await
            .map_err(map_send_error)?;
        let resp = check_status(resp, namespace).await?;
        let body: ListResponse = resp.json().await.map_err(|e| BlobError::Request(e.to_string()))?;
        let mut files = body.files;
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_encoded() {
        let store = HttpBlobStore::new("http://blobs:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.base_url(), "http://blobs:8000");
        assert_eq!(
            store.url("/upload", "filename", "demo/ep 1/a.db3"),
            "http://blobs:8000/upload?filename=demo%2Fep%201%2Fa.db3"
        );
    }

    #[tokio::test]
    async fn test_health_retries_then_reports_transient_error() {
        // Nothing listens on the discard port on loopback.
        let store = HttpBlobStore::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let err = store
            .check_health(3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::TransientNetwork(_)));
        // Backoff of 10ms then 20ms; no sleep after the last attempt.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
