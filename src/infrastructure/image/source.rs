//! Image byte sources used to build display unit loaders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Buf, Bytes};
use image::ImageFormat;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

use crate::domain::entities::{FetchedImage, Loader};
use crate::domain::errors::BoxError;

/// Content type reported when neither the server nor the file name says.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors raised while fetching image bytes.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request could not be sent or its body not read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {reason}")]
    Status {
        /// Status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },
}

/// Downloads images over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpImageSource {
    /// Creates a source whose loaders block on `runtime`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(runtime: Handle, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kittyimg/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, runtime })
    }

    /// Downloads `url` and returns its body and declared content type.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-success status.
    pub async fn fetch(&self, url: &str) -> Result<(Bytes, String), FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                reason: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| content_type_for_path(Path::new(url)), String::from);

        let bytes = response.bytes().await?;
        debug!(url, content_type, size = bytes.len(), "Downloaded image");
        Ok((bytes, content_type))
    }

    /// Returns a loader that downloads `url` when called.
    ///
    /// The loader blocks the calling thread on the runtime, so it must run
    /// outside async context (for example in `spawn_blocking`).
    #[must_use]
    pub fn loader(&self, url: impl Into<String>) -> Loader {
        let source = self.clone();
        let url = url.into();
        Box::new(move || -> Result<FetchedImage, BoxError> {
            let (bytes, content_type) = source.runtime.block_on(source.fetch(&url))?;
            Ok(FetchedImage {
                body: Box::new(bytes.reader()),
                content_type,
            })
        })
    }
}

/// Guesses a content type from a file extension.
#[must_use]
pub fn content_type_for_path(path: &Path) -> String {
    ImageFormat::from_path(path)
        .map_or(FALLBACK_CONTENT_TYPE, |f| f.to_mime_type())
        .to_string()
}

/// Returns a loader that opens a local file, typed by its extension unless
/// `content_type` is given.
#[must_use]
pub fn file_loader(path: impl Into<PathBuf>, content_type: Option<String>) -> Loader {
    let path = path.into();
    Box::new(move || -> Result<FetchedImage, BoxError> {
        let content_type = content_type.unwrap_or_else(|| content_type_for_path(&path));
        let file = std::fs::File::open(&path)?;
        Ok(FetchedImage {
            body: Box::new(std::io::BufReader::new(file)),
            content_type,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use test_case::test_case;

    #[test_case("pepe.png", "image/png" ; "png")]
    #[test_case("dance.GIF", "image/gif" ; "uppercase gif")]
    #[test_case("https://cdn.example.com/emote.webp", "image/webp" ; "url")]
    #[test_case("photo.jpeg", "image/jpeg" ; "jpeg")]
    #[test_case("README", FALLBACK_CONTENT_TYPE ; "no extension")]
    fn test_content_type_for_path(path: &str, expected: &str) {
        assert_eq!(content_type_for_path(Path::new(path)), expected);
    }

    #[test]
    fn test_file_loader_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emote.gif");
        std::fs::write(&path, b"GIF89a").unwrap();

        let mut fetched = file_loader(&path, None)().unwrap();
        let mut body = Vec::new();
        fetched.body.read_to_end(&mut body).unwrap();

        assert_eq!(fetched.content_type, "image/gif");
        assert_eq!(body, b"GIF89a");
    }

    #[test]
    fn test_file_loader_explicit_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"data").unwrap();

        let fetched = file_loader(&path, Some("image/webp".to_string()))().unwrap();
        assert_eq!(fetched.content_type, "image/webp");
    }

    #[test]
    fn test_file_loader_missing_file() {
        assert!(file_loader("/nonexistent/emote.png", None)().is_err());
    }

    #[test]
    fn test_http_loader_reports_connection_failure() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let source =
            HttpImageSource::new(runtime.handle().clone(), Duration::from_secs(2)).unwrap();

        let result = source.loader("http://127.0.0.1:1/emote.png")();

        assert!(result.is_err());
    }
}
