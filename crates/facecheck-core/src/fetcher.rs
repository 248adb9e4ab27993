//! Image fetcher: data URI or remote URL in, normalized RGB JPEG out.

use crate::env;
use crate::jpeg::{JpegImage, DEFAULT_JPEG_QUALITY};
use crate::source::{self, ImageSource, SourceError};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unsupported image reference: {0}")]
    UnsupportedSource(String),
    #[error("malformed data URI: {0}")]
    MalformedDataUri(SourceError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with HTTP {0}")]
    Status(u16),
    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("cannot decode image: {0}")]
    Decode(image::ImageError),
    #[error("cannot encode image as JPEG: {0}")]
    Encode(image::ImageError),
}

impl FetchError {
    /// Stable reason code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::UnsupportedSource(_) => "unsupported_source",
            FetchError::MalformedDataUri(_) => "malformed_data_uri",
            FetchError::Transport(_) => "transport",
            FetchError::Status(_) => "http_status",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::Decode(_) => "decode",
            FetchError::Encode(_) => "encode",
        }
    }
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unsupported(reference) => FetchError::UnsupportedSource(reference),
            other => FetchError::MalformedDataUri(other),
        }
    }
}

impl From<image::ImageError> for FetchError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Encoding(_) => FetchError::Encode(err),
            _ => FetchError::Decode(err),
        }
    }
}

/// Fetcher settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Timeout for the whole outbound GET.
    pub timeout: Duration,
    /// Largest accepted image body, before decoding.
    pub max_bytes: usize,
    /// JPEG quality for the normalized buffer.
    pub jpeg_quality: u8,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_bytes: DEFAULT_MAX_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl FetchConfig {
    /// Load from `FACECHECK_FETCH_TIMEOUT_SECS`, `FACECHECK_MAX_IMAGE_BYTES`
    /// and `FACECHECK_JPEG_QUALITY`.
    pub fn from_env() -> Self {
        Self {
            timeout: Duration::from_secs(env::env_u64(
                "FACECHECK_FETCH_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            max_bytes: env::env_u64("FACECHECK_MAX_IMAGE_BYTES", DEFAULT_MAX_BYTES as u64)
                as usize,
            jpeg_quality: env::env_u8("FACECHECK_JPEG_QUALITY", DEFAULT_JPEG_QUALITY),
        }
    }
}

/// Turns image references into normalized JPEG buffers.
///
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl ImageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("facecheck/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetch one image reference and normalize it to RGB JPEG.
    pub async fn fetch(&self, reference: &str) -> Result<JpegImage, FetchError> {
        let source = ImageSource::parse(reference)?;
        self.fetch_source(&source).await
    }

    /// Fetch an already parsed reference.
    pub async fn fetch_source(&self, source: &ImageSource) -> Result<JpegImage, FetchError> {
        let bytes = match source {
            ImageSource::DataUri(payload) => {
                let bytes = source::decode_data_uri(payload)?;
                if bytes.len() > self.config.max_bytes {
                    return Err(FetchError::TooLarge {
                        limit: self.config.max_bytes,
                    });
                }
                bytes
            }
            ImageSource::Remote(url) => self.download(url.clone()).await?,
        };

        let image = JpegImage::normalize(&bytes, self.config.jpeg_quality)?;
        tracing::debug!(
            source = source.kind(),
            input_bytes = bytes.len(),
            output_bytes = image.as_bytes().len(),
            width = image.width(),
            height = image.height(),
            "image normalized"
        );
        Ok(image)
    }

    async fn download(&self, url: reqwest::Url) -> Result<Vec<u8>, FetchError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let limit = self.config.max_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use httpmock::prelude::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_fixture() -> Vec<u8> {
        let img = RgbaImage::from_pixel(12, 10, Rgba([30, 60, 90, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn fetcher() -> ImageFetcher {
        ImageFetcher::new(FetchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_data_uri_yields_rgb_jpeg() {
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(png_fixture()));
        let image = fetcher().fetch(&uri).await.unwrap();

        assert!(!image.as_bytes().is_empty());
        assert_eq!((image.width(), image.height()), (12, 10));
        let decoded = image::load_from_memory(image.as_bytes()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[tokio::test]
    async fn test_malformed_data_uri() {
        let err = fetcher().fetch("data:image/png;base64,@@@").await.unwrap_err();
        assert_eq!(err.reason(), "malformed_data_uri");
    }

    #[tokio::test]
    async fn test_data_uri_with_non_image_payload() {
        let uri = format!("data:text/plain;base64,{}", STANDARD.encode("hello"));
        let err = fetcher().fetch(&uri).await.unwrap_err();
        assert_eq!(err.reason(), "decode");
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = fetcher().fetch("ftp://example.com/face.jpg").await.unwrap_err();
        assert_eq!(err.reason(), "unsupported_source");
    }

    #[tokio::test]
    async fn test_remote_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/face.png");
                then.status(200)
                    .header("content-type", "image/png")
                    .body(png_fixture());
            })
            .await;

        let image = fetcher().fetch(&server.url("/face.png")).await.unwrap();
        mock.assert_async().await;
        assert_eq!((image.width(), image.height()), (12, 10));
    }

    #[tokio::test]
    async fn test_remote_error_statuses_are_failures() {
        let server = MockServer::start_async().await;
        for status in [400u16, 404, 500, 503] {
            let path = format!("/status/{status}");
            server
                .mock_async(|when, then| {
                    when.method(GET).path(path.as_str());
                    then.status(status);
                })
                .await;

            let err = fetcher().fetch(&server.url(&path)).await.unwrap_err();
            assert!(matches!(err, FetchError::Status(s) if s == status), "{status}: {err}");
        }
    }

    #[tokio::test]
    async fn test_remote_non_image_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/page.html");
                then.status(200)
                    .header("content-type", "text/html")
                    .body("<html></html>");
            })
            .await;

        let err = fetcher().fetch(&server.url("/page.html")).await.unwrap_err();
        assert_eq!(err.reason(), "decode");
    }

    #[tokio::test]
    async fn test_remote_body_over_limit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big.png");
                then.status(200).body(png_fixture());
            })
            .await;

        let config = FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        };
        let err = ImageFetcher::new(config)
            .unwrap()
            .fetch(&server.url("/big.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        // Port 9 (discard) on localhost is closed in test environments.
        let err = fetcher().fetch("http://127.0.0.1:9/face.jpg").await.unwrap_err();
        assert_eq!(err.reason(), "transport");
    }
}
