//! Classification of user-supplied image references.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Inline `data:` URI; holds everything after the first comma.
    DataUri(String),
    /// Remote `http` / `https` URL.
    Remote(Url),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("data URI has no payload separator")]
    MissingPayload,
    #[error("data URI payload is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("unsupported image reference: {0}")]
    Unsupported(String),
}

impl ImageSource {
    /// Classify a reference as a data URI or remote URL.
    pub fn parse(reference: &str) -> Result<Self, SourceError> {
        let reference = reference.trim();
        if reference.starts_with("data:") {
            let (_, payload) = reference
                .split_once(',')
                .ok_or(SourceError::MissingPayload)?;
            return Ok(ImageSource::DataUri(payload.to_string()));
        }

        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(ImageSource::Remote(url)),
            _ => Err(SourceError::Unsupported(truncate(reference, 64))),
        }
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::DataUri(_) => "data-uri",
            ImageSource::Remote(_) => "remote",
        }
    }
}

/// Decode a data URI payload. The media-type header is not interpreted;
/// the image decoder sniffs the format from the bytes.
pub fn decode_data_uri(payload: &str) -> Result<Vec<u8>, SourceError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SourceError::InvalidBase64(e.to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
