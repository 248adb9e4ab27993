//! facecheck-core: image fetching and face verification.
//!
//! The fetcher turns a remote URL or inline `data:` URI into a normalized
//! RGB JPEG buffer. Verification sits behind the [`FaceVerifier`] trait, with
//! an in-process ONNX backend (SCRFD + ArcFace) and a backend that shells out
//! to an external verification program.

pub mod alignment;
pub mod detector;
pub mod env;
pub mod fetcher;
pub mod jpeg;
pub mod recognizer;
pub mod source;
pub mod types;
pub mod verifier;

pub use fetcher::{FetchConfig, FetchError, ImageFetcher};
pub use jpeg::JpegImage;
pub use source::ImageSource;
pub use types::{BoundingBox, Embedding, ImageSlot, Verdict, Verification};
pub use verifier::{
    build_verifier, BackendKind, ConfigError, DetectionPolicy, FaceVerifier, VerifierConfig, VerifyError,
};

use std::path::PathBuf;

/// Default directory for the SCRFD and ArcFace ONNX models.
///
/// `$XDG_DATA_HOME/facecheck/models`, falling back to
/// `$HOME/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}
