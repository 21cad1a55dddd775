use crate::config::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use veriface_core::{
    FaceImage, PreprocessError, ReferenceError, ReferenceSet, Scorer, ScorerError, SiameseScorer,
    Thresholds, Verification, VerifyError,
};
use veriface_hw::{Camera, CameraError, CropRegion, Frame, FrameError, FrameSource};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("model error: {0}")]
    Scorer(#[from] ScorerError),
    #[error("reference set error: {0}")]
    Reference(#[from] ReferenceError),
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of one verification attempt, with what it was checked against.
#[derive(Debug)]
pub struct VerifyOutcome {
    pub verification: Verification,
    pub reference_names: Vec<String>,
    pub input_image: PathBuf,
    /// Camera sequence number of the verified frame; `None` for a file check.
    pub frame_sequence: Option<u32>,
}

/// Summary of a preview frame for the status line.
#[derive(Debug, Clone, Copy)]
pub struct FrameStatus {
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    pub brightness: f32,
    pub is_dark: bool,
}

impl From<&Frame> for FrameStatus {
    fn from(frame: &Frame) -> Self {
        Self {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            brightness: frame.avg_brightness(),
            is_dark: frame.is_dark,
        }
    }
}

/// Scorer, reference set and file layout needed to verify a capture.
pub struct Pipeline {
    scorer: Box<dyn Scorer + Send>,
    references: ReferenceSet,
    thresholds: Thresholds,
    input_image: PathBuf,
    crop: Option<CropRegion>,
}

impl Pipeline {
    pub fn new(
        scorer: Box<dyn Scorer + Send>,
        references: ReferenceSet,
        thresholds: Thresholds,
        input_image: PathBuf,
        crop: Option<CropRegion>,
    ) -> Self {
        Self {
            scorer,
            references,
            thresholds,
            input_image,
            crop,
        }
    }

    /// Load the Siamese model and reference set named by `config`.
    pub fn load(config: &Config) -> Result<Self, EngineError> {
        let model_path = config.model_path_str();
        let scorer = SiameseScorer::load(&model_path, config.intra_threads)?;
        tracing::info!(path = %model_path, "Siamese scorer loaded");

        let references = ReferenceSet::load_dir(config.verification_dir_path())?;
        if references.is_empty() {
            tracing::warn!(
                dir = %config.verification_dir_path().display(),
                "reference set is empty; verification will fail until images are captured"
            );
        }

        let thresholds = Thresholds::new(config.detection_threshold, config.verification_threshold)?;

        Ok(Self::new(
            Box::new(scorer),
            references,
            thresholds,
            config.input_image_path(),
            config.crop,
        ))
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Crop `frame`, overwrite the input image file with it, then verify
    /// the file as written.
    pub fn verify_frame(&mut self, frame: &Frame) -> Result<VerifyOutcome, EngineError> {
        let face = frame.crop_or_center(self.crop)?;
        face.save(&self.input_image)?;
        tracing::debug!(
            path = %self.input_image.display(),
            size = face.width,
            seq = face.sequence,
            "input image written"
        );

        let input = self.input_image.clone();
        let mut outcome = self.verify_file(&input)?;
        outcome.frame_sequence = Some(frame.sequence);
        Ok(outcome)
    }

    /// Verify an existing image file against the reference set.
    pub fn verify_file(&mut self, path: &Path) -> Result<VerifyOutcome, EngineError> {
        let live = FaceImage::from_path(path)?;
        let verification = veriface_core::verify(
            self.scorer.as_mut(),
            &live,
            &self.references,
            &self.thresholds,
        )?;

        Ok(VerifyOutcome {
            verification,
            reference_names: self.references.names().into_iter().map(String::from).collect(),
            input_image: path.to_path_buf(),
            frame_sequence: None,
        })
    }
}

/// Messages sent from the watch loop to the engine thread.
enum EngineRequest {
    Preview {
        reply: oneshot::Sender<Result<FrameStatus, EngineError>>,
    },
    Verify {
        reply: oneshot::Sender<Result<VerifyOutcome, EngineError>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Grab one frame for the status line.
    pub async fn preview(&self) -> Result<FrameStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Preview { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture a frame and verify it. Requests are served one at a time.
    pub async fn verify(&self) -> Result<VerifyOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Ask the engine thread to stop once queued requests are served.
    /// Later requests on any clone fail with [`EngineError::ChannelClosed`].
    pub async fn shutdown(&self) {
        if self.tx.send(EngineRequest::Shutdown).await.is_err() {
            tracing::debug!("engine already stopped");
        }
    }
}

/// Open the camera and discard warmup frames. Fails fast if the device is
/// unavailable.
pub fn open_camera(config: &Config) -> Result<Camera, EngineError> {
    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        format = ?camera.pixel_format(),
        "camera opened"
    );

    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        camera.discard_frames(config.warmup_frames)?;
    }

    Ok(camera)
}

/// Spawn the engine on a dedicated OS thread that owns the frame source
/// and the pipeline, then serves requests in arrival order.
pub fn spawn_engine<C: FrameSource + Send + 'static>(
    camera: C,
    mut pipeline: Pipeline,
    max_capture_attempts: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("veriface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Preview { reply } => {
                        let result = camera
                            .capture_frame()
                            .map(|frame| FrameStatus::from(&frame))
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify { reply } => {
                        let result = camera
                            .capture_lit_frame(max_capture_attempts)
                            .map_err(EngineError::from)
                            .and_then(|frame| pipeline.verify_frame(&frame));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Shutdown => break,
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
