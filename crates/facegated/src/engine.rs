use std::sync::Arc;

use facegate_core::{AccessGate, Decision, EmbeddingProvider, EnrollError, Template, VerifyError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Arc<Template>, EnrollError>>,
    },
    Verify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Decision, VerifyError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll the single face in an encoded image.
    pub async fn enroll(&self, image: Vec<u8>) -> Result<Arc<Template>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Verify the first face in an encoded image against the template.
    pub async fn verify(&self, image: Vec<u8>) -> Result<Decision, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the provider, so inference never blocks the async
/// runtime and requests are served one at a time.
pub fn spawn_engine<P>(mut provider: P, gate: AccessGate) -> Result<EngineHandle, EngineError>
where
    P: EmbeddingProvider + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { image, reply } => {
                        let result = gate.enroll_encoded(&mut provider, &image);
                        if let Err(err) = &result {
                            tracing::warn!(code = err.code(), error = %err, "enroll failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify { image, reply } => {
                        let result = gate.verify_encoded(&mut provider, &image);
                        if let Err(err) = &result {
                            tracing::warn!(code = err.code(), error = %err, "verify failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
