//! Face verification boundary.
//!
//! A [`FaceVerifier`] takes two normalized JPEG buffers and decides whether
//! they show the same person. Backends:
//!
//! - [`OnnxVerifier`]: SCRFD + ArcFace in-process, images handed over in memory.
//! - [`CommandVerifier`]: an external verification program that reads the
//!   images from request-unique files in a scratch directory.

mod command;
mod onnx;
mod staging;

pub use command::CommandVerifier;
pub use onnx::{select_face, OnnxVerifier};
pub use staging::StagedPair;

use crate::detector::DetectorError;
use crate::env;
use crate::jpeg::JpegImage;
use crate::recognizer::RecognizerError;
use crate::types::{ImageSlot, Verification};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;
const DEFAULT_DETECTOR_BACKEND: &str = "mtcnn";
const DEFAULT_VERIFY_COMMAND: &str = "deepface-verify";
const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("cannot decode {slot}: {source}")]
    Image {
        slot: ImageSlot,
        source: image::ImageError,
    },
    #[error("no face detected in {0}")]
    NoFaceDetected(ImageSlot),
    #[error("expected exactly one face in {slot}, found {count}")]
    MultipleFaces { slot: ImageSlot, count: usize },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("cannot stage images in scratch directory: {0}")]
    Staging(std::io::Error),
    #[error("verification command is empty")]
    EmptyCommand,
    #[error("cannot launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("cannot wait for verification command: {0}")]
    Wait(std::io::Error),
    #[error("verification command did not finish within {0:?}")]
    Timeout(Duration),
    #[error("verification command failed ({status}): {stderr}")]
    External { status: String, stderr: String },
    #[error("unreadable verification report: {0}")]
    MalformedReport(String),
}

impl VerifyError {
    /// Stable reason code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::Image { .. } => "image_decode",
            VerifyError::NoFaceDetected(_) => "no_face",
            VerifyError::MultipleFaces { .. } => "multiple_faces",
            VerifyError::Detector(_) => "detector",
            VerifyError::Recognizer(_) => "recognizer",
            VerifyError::Staging(_) => "staging",
            VerifyError::EmptyCommand => "empty_command",
            VerifyError::Launch { .. } => "launch",
            VerifyError::Wait(_) => "wait",
            VerifyError::Timeout(_) => "timeout",
            VerifyError::External { .. } => "external",
            VerifyError::MalformedReport(_) => "malformed_report",
        }
    }

    /// True when the failure is about the faces in the images rather than
    /// the verifier itself.
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            VerifyError::NoFaceDetected(_) | VerifyError::MultipleFaces { .. }
        )
    }
}

/// Compares the faces in two images.
///
/// Implementations may hold model sessions that need exclusive access, hence
/// `&mut self`.
pub trait FaceVerifier: Send {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    fn verify(
        &mut self,
        first: &JpegImage,
        second: &JpegImage,
    ) -> Result<Verification, VerifyError>;
}

/// Which verifier implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Onnx,
    Command,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(BackendKind::Onnx),
            "command" => Ok(BackendKind::Command),
            other => Err(ConfigError::Invalid {
                key: "FACECHECK_VERIFIER",
                value: other.to_string(),
            }),
        }
    }
}

/// How many faces an image may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPolicy {
    /// Exactly one face per image; zero or several is an error.
    Strict,
    /// Use the highest-confidence face; zero is an error.
    Best,
}

impl FromStr for DetectionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DetectionPolicy::Strict),
            "best" => Ok(DetectionPolicy::Best),
            other => Err(ConfigError::Invalid {
                key: "FACECHECK_DETECTION_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Verifier settings.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub backend: BackendKind,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Detector backend name handed to the external command.
    pub detector_backend: String,
    pub policy: DetectionPolicy,
    /// Cosine similarity threshold for the ONNX backend.
    pub similarity_threshold: f32,
    /// External program and its leading arguments.
    pub command: Vec<String>,
    /// Where the command backend stages its input files.
    pub scratch_dir: PathBuf,
    /// Upper bound on one external verification run.
    pub verify_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Onnx,
            model_dir: crate::default_model_dir(),
            detector_backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            policy: DetectionPolicy::Strict,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            command: vec![DEFAULT_VERIFY_COMMAND.to_string()],
            scratch_dir: std::env::temp_dir(),
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
        }
    }
}

impl VerifierConfig {
    /// Load from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            backend: env::env_string("FACECHECK_VERIFIER", "onnx").parse()?,
            model_dir: env::env_path("FACECHECK_MODEL_DIR").unwrap_or(defaults.model_dir),
            detector_backend: env::env_string(
                "FACECHECK_DETECTOR_BACKEND",
                DEFAULT_DETECTOR_BACKEND,
            ),
            policy: env::env_string("FACECHECK_DETECTION_POLICY", "strict").parse()?,
            similarity_threshold: env::env_f32(
                "FACECHECK_SIMILARITY_THRESHOLD",
                DEFAULT_SIMILARITY_THRESHOLD,
            ),
            command: env::env_string("FACECHECK_VERIFY_COMMAND", DEFAULT_VERIFY_COMMAND)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            scratch_dir: env::env_path("FACECHECK_SCRATCH_DIR").unwrap_or(defaults.scratch_dir),
            verify_timeout: Duration::from_secs(env::env_u64(
                "FACECHECK_VERIFY_TIMEOUT_SECS",
                DEFAULT_VERIFY_TIMEOUT_SECS,
            )),
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

/// Construct the configured backend. Fails fast on missing models or an
/// unusable scratch directory.
pub fn build_verifier(config: &VerifierConfig) -> Result<Box<dyn FaceVerifier>, VerifyError> {
    let verifier: Box<dyn FaceVerifier> = match config.backend {
        BackendKind::Onnx => Box::new(OnnxVerifier::load(
            &config.scrfd_model_path(),
            &config.arcface_model_path(),
            config.policy,
            config.similarity_threshold,
        )?),
        BackendKind::Command => Box::new(CommandVerifier::new(
            &config.command,
            &config.detector_backend,
            config.policy,
            &config.scratch_dir,
            config.verify_timeout,
        )?),
    };
    tracing::info!(backend = verifier.name(), policy = ?config.policy, "verifier ready");
    Ok(verifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("onnx".parse::<BackendKind>(), Ok(BackendKind::Onnx));
        assert_eq!(" Command ".parse::<BackendKind>(), Ok(BackendKind::Command));
        assert!(matches!(
            "deepface".parse::<BackendKind>(),
            Err(ConfigError::Invalid { key: "FACECHECK_VERIFIER", .. })
        ));
    }

    #[test]
    fn test_detection_policy_parse() {
        assert_eq!("strict".parse::<DetectionPolicy>(), Ok(DetectionPolicy::Strict));
        assert_eq!("BEST".parse::<DetectionPolicy>(), Ok(DetectionPolicy::Best));
        assert!("loose".parse::<DetectionPolicy>().is_err());
    }

    #[test]
    fn test_model_paths() {
        let config = VerifierConfig {
            model_dir: PathBuf::from("/opt/models"),
            ..VerifierConfig::default()
        };
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(config.arcface_model_path(), PathBuf::from("/opt/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_build_onnx_without_models_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = VerifierConfig {
            model_dir: dir.path().to_path_buf(),
            ..VerifierConfig::default()
        };
        let err = build_verifier(&config).err().unwrap();
        assert!(matches!(err, VerifyError::Detector(DetectorError::ModelNotFound(_))));
    }

    #[test]
    fn test_build_command_requires_program() {
        let config = VerifierConfig {
            backend: BackendKind::Command,
            command: Vec::new(),
            ..VerifierConfig::default()
        };
        assert!(matches!(build_verifier(&config).err(), Some(VerifyError::EmptyCommand)));
    }

    #[test]
    fn test_detection_failure_classification() {
        assert!(VerifyError::NoFaceDetected(ImageSlot::First).is_detection_failure());
        assert!(VerifyError::MultipleFaces { slot: ImageSlot::Second, count: 2 }
            .is_detection_failure());
        assert!(!VerifyError::EmptyCommand.is_detection_failure());
    }
}
