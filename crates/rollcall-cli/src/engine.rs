use rollcall_core::{EmbedError, EmbedderGate, EmbedderLoader, Embedding};
use rollcall_hw::{CameraError, CameraSource};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedError),
    #[error("camera not ready after {attempts} attempts")]
    CameraNotReady { attempts: usize },
    #[error("no face detected")]
    NoFaceDetected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("capture did not finish within {0:?}")]
    Timeout(Duration),
}

/// Readiness snapshot reported by the engine thread.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub embedder_ready: bool,
    pub embedding_dim: Option<usize>,
    pub camera_ready: bool,
    pub camera_error: Option<String>,
    pub embeds_served: u64,
}

/// Messages sent from workflows to the engine thread.
enum EngineRequest {
    Embed {
        attempts: usize,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    request_timeout: Duration,
}

impl EngineHandle {
    /// Poll the camera up to `attempts` times and embed the first ready frame.
    pub async fn capture_embedding(&self, attempts: usize) -> Result<Embedding, EngineError> {
        self.request(|reply| EngineRequest::Embed { attempts, reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Send a request and wait for its reply, giving up after the request
    /// timeout. A late reply is dropped by the engine thread.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(build(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.request_timeout, "engine request timed out");
                Err(EngineError::Timeout(self.request_timeout))
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The embedder is loaded before the thread starts so a missing model fails
/// fast. Each request waits at most `request_timeout` for its reply. The
/// thread exits once every handle has been dropped.
pub fn spawn_engine<C, L>(
    mut camera: C,
    loader: L,
    frame_interval: Duration,
    request_timeout: Duration,
) -> Result<EngineHandle, EngineError>
where
    C: CameraSource + Send + 'static,
    L: EmbedderLoader + Send + 'static,
    L::Embedder: Send,
{
    let mut gate = EmbedderGate::new(loader);
    gate.ensure_ready()?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut embeds_served = 0u64;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { attempts, reply } => {
                        let result = run_embed(&mut camera, &mut gate, attempts, frame_interval);
                        if result.is_ok() {
                            embeds_served += 1;
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let (camera_ready, camera_error) = match camera.get_frame() {
                            Ok(frame) => (frame.is_some(), None),
                            Err(e) => (false, Some(e.to_string())),
                        };
                        let _ = reply.send(EngineStatus {
                            embedder_ready: gate.is_ready(),
                            embedding_dim: gate.dim(),
                            camera_ready,
                            camera_error,
                            embeds_served,
                        });
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        request_timeout,
    })
}

/// Wait for a ready frame, then embed it. A frame without a face is final:
/// the caller decides whether to try again.
fn run_embed<C, L>(
    camera: &mut C,
    gate: &mut EmbedderGate<L>,
    attempts: usize,
    frame_interval: Duration,
) -> Result<Embedding, EngineError>
where
    C: CameraSource,
    L: EmbedderLoader,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        let Some(frame) = camera.get_frame()? else {
            tracing::debug!(attempt, attempts, "camera not ready");
            if attempt < attempts {
                std::thread::sleep(frame_interval);
            }
            continue;
        };

        tracing::debug!(
            seq = frame.sequence,
            width = frame.width,
            height = frame.height,
            brightness = frame.avg_brightness(),
            "embedding frame"
        );

        return gate
            .embed(&frame.data, frame.width, frame.height)?
            .ok_or(EngineError::NoFaceDetected);
    }

    Err(EngineError::CameraNotReady { attempts })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted camera and embedder for engine and workflow tests.

    use rollcall_core::{EmbedError, EmbedderLoader, Embedding, FaceEmbedder};
    use rollcall_hw::{CameraError, CameraSource, Frame};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Camera yielding `not_ready` empty polls, then a 2x2 grey frame forever.
    pub struct ScriptedCamera {
        pub not_ready: usize,
        pub fail: bool,
    }

    impl CameraSource for ScriptedCamera {
        fn get_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            if self.fail {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            if self.not_ready > 0 {
                self.not_ready -= 1;
                return Ok(None);
            }
            Ok(Some(Frame {
                data: vec![128; 12],
                width: 2,
                height: 2,
                sequence: 1,
            }))
        }
    }

    /// Embedder returning queued outputs in order; `None` means no face.
    #[derive(Clone, Default)]
    pub struct ScriptedEmbedder {
        pub outputs: Arc<Mutex<VecDeque<Option<Vec<f32>>>>>,
        /// Time spent on each embed call.
        pub delay: Duration,
    }

    impl ScriptedEmbedder {
        pub fn new(outputs: Vec<Option<Vec<f32>>>) -> Self {
            Self {
                outputs: Arc::new(Mutex::new(outputs.into())),
                delay: Duration::ZERO,
            }
        }
    }

    impl FaceEmbedder for ScriptedEmbedder {
        fn embed(&mut self, rgb: &[u8], _: u32, _: u32) -> Result<Option<Embedding>, EmbedError> {
            assert_eq!(rgb.len(), 12);
            std::thread::sleep(self.delay);
            let next = self.outputs.lock().unwrap().pop_front().flatten();
            Ok(next.map(Embedding::new))
        }
    }

    impl EmbedderLoader for ScriptedEmbedder {
        type Embedder = ScriptedEmbedder;

        fn load(&self) -> Result<ScriptedEmbedder, EmbedError> {
            Ok(self.clone())
        }
    }

    pub struct MissingModels;

    impl EmbedderLoader for MissingModels {
        type Embedder = ScriptedEmbedder;

        fn load(&self) -> Result<ScriptedEmbedder, EmbedError> {
            Err(EmbedError::ModelNotFound("/models".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn engine(camera: ScriptedCamera, outputs: Vec<Option<Vec<f32>>>) -> EngineHandle {
        spawn_engine(
            camera,
            ScriptedEmbedder::new(outputs),
            Duration::from_millis(1),
            TIMEOUT,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_after_camera_warms_up() {
        let handle = engine(
            ScriptedCamera { not_ready: 2, fail: false },
            vec![Some(vec![0.1, 0.2])],
        );
        let emb = handle.capture_embedding(5).await.unwrap();
        assert_eq!(emb.values, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_camera_never_ready() {
        let handle = engine(ScriptedCamera { not_ready: 10, fail: false }, vec![]);
        let err = handle.capture_embedding(3).await.unwrap_err();
        assert!(matches!(err, EngineError::CameraNotReady { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_no_face_detected() {
        let handle = engine(ScriptedCamera { not_ready: 0, fail: false }, vec![None]);
        let err = handle.capture_embedding(3).await.unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected));
    }

    #[tokio::test]
    async fn test_camera_failure_propagates() {
        let handle = engine(ScriptedCamera { not_ready: 0, fail: true }, vec![]);
        let err = handle.capture_embedding(3).await.unwrap_err();
        assert!(matches!(err, EngineError::Camera(_)));
    }

    #[tokio::test]
    async fn test_missing_models_fail_fast() {
        let result = spawn_engine(
            ScriptedCamera { not_ready: 0, fail: false },
            MissingModels,
            Duration::from_millis(1),
            TIMEOUT,
        );
        assert!(matches!(
            result,
            Err(EngineError::Embedder(EmbedError::ModelNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_status_reports_readiness() {
        let handle = engine(
            ScriptedCamera { not_ready: 0, fail: false },
            vec![Some(vec![0.1, 0.2, 0.3])],
        );
        handle.capture_embedding(1).await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(status.embedder_ready);
        assert!(status.camera_ready);
        assert_eq!(status.embedding_dim, Some(3));
        assert_eq!(status.embeds_served, 1);
    }

    #[tokio::test]
    async fn test_hung_embedder_times_out() {
        let embedder = ScriptedEmbedder {
            delay: Duration::from_millis(500),
            ..ScriptedEmbedder::new(vec![Some(vec![0.1])])
        };
        let handle = spawn_engine(
            ScriptedCamera { not_ready: 0, fail: false },
            embedder,
            Duration::from_millis(1),
            Duration::from_millis(50),
        )
        .unwrap();
        let err = handle.capture_embedding(1).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }
}
