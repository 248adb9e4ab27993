use super::{DetectionPolicy, FaceVerifier, StagedPair, VerifyError};
use crate::jpeg::JpegImage;
use crate::types::Verification;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Verifier backed by an external program that needs its inputs on disk.
///
/// Invocation:
/// `<program> [args..] --detector-backend <name> [--enforce-detection] <image1> <image2>`
///
/// The program exits 0 and prints a JSON report as its last `{`-prefixed
/// stdout line: `{"verified": true, "distance": 0.31, "threshold": 0.4}`.
/// Only `verified` is required. A program still running after `timeout` is
/// killed.
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    detector_backend: String,
    policy: DetectionPolicy,
    scratch_dir: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Report {
    verified: bool,
    #[serde(default)]
    distance: Option<f32>,
    #[serde(default)]
    threshold: Option<f32>,
}

impl CommandVerifier {
    pub fn new(
        command: &[String],
        detector_backend: &str,
        policy: DetectionPolicy,
        scratch_dir: &Path,
        timeout: Duration,
    ) -> Result<Self, VerifyError> {
        let (program, args) = command.split_first().ok_or(VerifyError::EmptyCommand)?;
        std::fs::create_dir_all(scratch_dir).map_err(VerifyError::Staging)?;
        tracing::info!(
            program = %program,
            detector_backend,
            scratch_dir = %scratch_dir.display(),
            timeout_secs = timeout.as_secs_f32(),
            "external verifier configured"
        );
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            detector_backend: detector_backend.to_string(),
            policy,
            scratch_dir: scratch_dir.to_path_buf(),
            timeout,
        })
    }

    fn command_line(&self, first: &Path, second: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--detector-backend")
            .arg(&self.detector_backend);
        if self.policy == DetectionPolicy::Strict {
            cmd.arg("--enforce-detection");
        }
        cmd.arg(first)
            .arg(second)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Wait for the child, killing it once the deadline passes.
    ///
    /// Pipes are drained on their own threads so a chatty program cannot
    /// stall on a full pipe buffer.
    fn wait(&self, mut child: Child) -> Result<Captured, VerifyError> {
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let deadline = Instant::now() + self.timeout;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    return Err(VerifyError::Wait(e));
                }
            }
            if Instant::now() >= deadline {
                // Readers are left detached: grandchildren may still hold the pipes.
                let _ = child.kill();
                let _ = child.wait();
                return Err(VerifyError::Timeout(self.timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        Ok(Captured {
            status,
            stdout: join(stdout),
            stderr: join(stderr),
        })
    }
}

struct Captured {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl FaceVerifier for CommandVerifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn verify(
        &mut self,
        first: &JpegImage,
        second: &JpegImage,
    ) -> Result<Verification, VerifyError> {
        let staged =
            StagedPair::write(&self.scratch_dir, first, second).map_err(VerifyError::Staging)?;

        let child = self
            .command_line(staged.first(), staged.second())
            .spawn()
            .map_err(|source| VerifyError::Launch {
                program: self.program.clone(),
                source,
            })?;
        let output = self.wait(child)?;

        drop(staged);
        parse_output(&output)
    }
}

fn parse_output(output: &Captured) -> Result<Verification, VerifyError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VerifyError::External {
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| VerifyError::MalformedReport("no JSON report on stdout".into()))?;

    let report: Report =
        serde_json::from_str(line).map_err(|e| VerifyError::MalformedReport(e.to_string()))?;

    Ok(Verification {
        verified: report.verified,
        similarity: None,
        distance: report.distance,
        threshold: report.threshold,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use image::RgbImage;

    fn tiny_jpeg() -> JpegImage {
        JpegImage::encode(&RgbImage::new(4, 4), 75).unwrap()
    }

    /// `sh -c <script> verifier`: appended arguments become $1, $2, ...
    fn shell(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "verifier".into()]
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn verifier(script: &str, policy: DetectionPolicy, dir: &Path) -> CommandVerifier {
        CommandVerifier::new(&shell(script), "mtcnn", policy, dir, TIMEOUT).unwrap()
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_strict_invocation_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"
            [ "$1" = --detector-backend ] && [ "$2" = mtcnn ] && [ "$3" = --enforce-detection ] || exit 9
            test -s "$4" && test -s "$5" || exit 8
            echo "loading weights..."
            echo '{"verified": true, "distance": 0.21, "threshold": 0.4}'
        "#;
        let mut v = verifier(script, DetectionPolicy::Strict, dir.path());

        let result = v.verify(&tiny_jpeg(), &tiny_jpeg()).unwrap();
        assert!(result.verified);
        assert_eq!(result.distance, Some(0.21));
        assert_eq!(result.threshold, Some(0.4));
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn test_best_policy_omits_enforce_flag() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"[ "$3" != --enforce-detection ] && test -s "$3" && echo '{"verified": false}'"#;
        let mut v = verifier(script, DetectionPolicy::Best, dir.path());

        let result = v.verify(&tiny_jpeg(), &tiny_jpeg()).unwrap();
        assert!(!result.verified);
        assert_eq!(result.distance, None);
    }

    #[test]
    fn test_failing_command_still_removes_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo 'Face could not be detected' >&2; exit 3";
        let mut v = verifier(script, DetectionPolicy::Strict, dir.path());

        match v.verify(&tiny_jpeg(), &tiny_jpeg()) {
            Err(VerifyError::External { stderr, .. }) => {
                assert_eq!(stderr, "Face could not be detected")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn test_garbage_report_removes_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = verifier("echo '{not json'", DetectionPolicy::Strict, dir.path());

        let err = v.verify(&tiny_jpeg(), &tiny_jpeg()).unwrap_err();
        assert_eq!(err.reason(), "malformed_report");
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn test_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = verifier("echo done", DetectionPolicy::Strict, dir.path());
        assert!(matches!(
            v.verify(&tiny_jpeg(), &tiny_jpeg()),
            Err(VerifyError::MalformedReport(_))
        ));
    }

    #[test]
    fn test_unlaunchable_program_removes_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let command = vec!["/nonexistent/facecheck-verifier".to_string()];
        let mut v =
            CommandVerifier::new(&command, "mtcnn", DetectionPolicy::Strict, dir.path(), TIMEOUT)
                .unwrap();

        let err = v.verify(&tiny_jpeg(), &tiny_jpeg()).unwrap_err();
        assert_eq!(err.reason(), "launch");
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn test_creates_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        CommandVerifier::new(&shell("true"), "mtcnn", DetectionPolicy::Strict, &nested, TIMEOUT)
            .unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_hung_command_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = CommandVerifier::new(
            &shell("sleep 5; echo '{\"verified\": true}'"),
            "mtcnn",
            DetectionPolicy::Strict,
            dir.path(),
            Duration::from_millis(300),
        )
        .unwrap();

        let started = Instant::now();
        let err = v.verify(&tiny_jpeg(), &tiny_jpeg()).unwrap_err();
        assert!(matches!(err, VerifyError::Timeout(_)));
        assert_eq!(err.reason(), "timeout");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn test_large_stdout_does_not_stall() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"head -c 200000 /dev/zero | tr '\0' x; echo; echo '{"verified": true}'"#;
        let mut v = verifier(script, DetectionPolicy::Strict, dir.path());
        assert!(v.verify(&tiny_jpeg(), &tiny_jpeg()).unwrap().verified);
    }
}
