use facecheck_core::{FaceVerifier, JpegImage, Verification, VerifyError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("cannot spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("no verification result within {0:?}")]
    Timeout(Duration),
}

/// A pair of images sent from a request handler to the engine thread.
struct VerifyJob {
    first: JpegImage,
    second: JpegImage,
    reply: oneshot::Sender<Result<Verification, VerifyError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<VerifyJob>,
    timeout: Duration,
}

impl EngineHandle {
    /// Compare the faces in two images. Requests are served one at a time.
    ///
    /// Gives up after the handle's timeout, counting time spent queued. A job
    /// abandoned this way still runs; its result is discarded.
    pub async fn verify(
        &self,
        first: JpegImage,
        second: JpegImage,
    ) -> Result<Verification, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = VerifyJob {
            first,
            second,
            reply: reply_tx,
        };
        let exchange = async {
            self.tx
                .send(job)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))??;
        Ok(result?)
    }
}

/// Spawn the engine on a dedicated OS thread that owns the verifier.
///
/// Model sessions need `&mut` access, so every verification runs here and
/// handlers wait on a oneshot reply for at most `timeout`.
pub fn spawn_engine(
    mut verifier: Box<dyn FaceVerifier>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<VerifyJob>(4);

    std::thread::Builder::new()
        .name("facecheck-engine".into())
        .spawn(move || {
            tracing::info!(backend = verifier.name(), "engine thread started");
            while let Some(job) = rx.blocking_recv() {
                let started = Instant::now();
                let result = verifier.verify(&job.first, &job.second);
                match &result {
                    Ok(v) => tracing::info!(
                        verified = v.verified,
                        similarity = ?v.similarity,
                        distance = ?v.distance,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "verification finished"
                    ),
                    Err(e) => tracing::info!(
                        reason = e.reason(),
                        detection_failure = e.is_detection_failure(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "verification failed"
                    ),
                }
                if job.reply.send(result).is_err() {
                    tracing::debug!("caller gave up before the result was ready");
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}
