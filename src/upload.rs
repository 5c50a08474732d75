//! Presigned URL uploads.
//!
//! A deliberately small collaborator next to the stream client: one PUT
//! request to a presigned URL with a progress callback, resolving on 2xx
//! and failing otherwise. No retry, no chunked multipart.

use std::sync::Arc;

use futures_util::stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::debug;

/// Upload body chunk size in bytes.
const CHUNK_SIZE: usize = 64 * 1024;

/// Progress callback, invoked with a 0-100 percentage as body bytes are
/// handed to the transport.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The request could not be performed.
    #[error("upload request failed: {0}")]
    Request(String),

    /// The server rejected the upload.
    #[error("upload rejected with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The URL is not an HTTP or HTTPS URL.
    #[error("invalid upload url: {0}")]
    InvalidUrl(String),
}

/// Client for presigned URL uploads.
#[derive(Debug, Clone)]
pub struct Uploader {
    http: reqwest::Client,
}

impl Uploader {
    /// Creates a new uploader.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| UploadError::Request(e.to_string()))?;
        Ok(Self { http })
    }

    /// Uploads a payload to a presigned URL with a single PUT request.
    ///
    /// The progress callback, when given, observes a monotonically
    /// increasing percentage ending at 100 on success.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or any non-2xx response.
    /// Failed uploads are not retried.
    pub async fn put_presigned(
        &self,
        url: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), UploadError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(UploadError::InvalidUrl(url.to_string()));
        }

        let total = data.len();
        debug!("uploading {} bytes to presigned url", total);

        let progress = on_progress.clone();
        let mut sent = 0usize;
        let chunks: Vec<Vec<u8>> = data.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
        let body = reqwest::Body::wrap_stream(stream::iter(chunks.into_iter().map(
            move |chunk| {
                sent += chunk.len();
                if let Some(callback) = &progress {
                    callback(percent(sent, total));
                }
                Ok::<Vec<u8>, std::convert::Infallible>(chunk)
            },
        )));

        let mut request = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, total as u64)
            .body(body);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // An empty payload produces no chunks; still report completion.
        if total == 0 {
            if let Some(callback) = &on_progress {
                callback(100);
            }
        }

        Ok(())
    }
}

/// Percentage of bytes transferred, clamped to 0-100.
fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = (sent as u128 * 100) / total as u128;
    ratio.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_progression() {
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(100, 200), 50);
        assert_eq!(percent(200, 200), 100);
    }

    #[test]
    fn test_percent_rounds_down() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn test_percent_empty_payload() {
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_percent_clamped() {
        assert_eq!(percent(500, 200), 100);
    }

    #[test]
    fn test_uploader_new() {
        assert!(Uploader::new().is_ok());
    }

    #[tokio::test]
    async fn test_put_presigned_rejects_invalid_url() {
        let uploader = Uploader::new().expect("uploader");
        let result = uploader
            .put_presigned("ftp://bucket.example/key", Vec::new(), None, None)
            .await;
        assert!(matches!(result, Err(UploadError::InvalidUrl(_))));
    }

    #[test]
    fn test_upload_error_display() {
        let err = UploadError::Status {
            status: 403,
            body: "expired".to_string(),
        };
        assert_eq!(err.to_string(), "upload rejected with status 403");

        let err = UploadError::Request("connection refused".to_string());
        assert_eq!(err.to_string(), "upload request failed: connection refused");
    }
}
