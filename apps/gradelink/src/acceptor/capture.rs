use super::camera::{Camera, CameraError, CameraRequest, CameraStream};
use super::validator::ValidatedSession;
use crate::store::{ImageUpload, SharedStore, StoreError};
use gradelink_proto::{CaptureMetadata, Credential, DeviceContext, SessionContext};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const JPEG_QUALITY: u8 = 90;
pub const JPEG_MIME: &str = "image/jpeg";

/// A frozen frame, JPEG-encoded and ready to upload. Lives only between the
/// shutter and a confirmed upload or retake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub size_bytes: usize,
    pub width: u32,
    pub height: u32,
    pub captured_at: OffsetDateTime,
}

impl CapturedImage {
    pub fn from_frame(frame: &RgbImage, captured_at: OffsetDateTime) -> Result<Self, CaptureError> {
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
            .encode_image(frame)
            .map_err(|err| CaptureError::Encode(err.to_string()))?;
        Ok(Self {
            size_bytes: bytes.len(),
            bytes,
            mime: JPEG_MIME,
            width: frame.width(),
            height: frame.height(),
            captured_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStage {
    Idle,
    Acquiring,
    CameraActive,
    Previewing,
    Uploading,
    Submitted,
    /// Camera acquisition failed; only `open_camera` leaves this stage.
    Failed(CameraError),
}

impl CaptureStage {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureStage::Idle => "idle",
            CaptureStage::Acquiring => "acquiring",
            CaptureStage::CameraActive => "camera_active",
            CaptureStage::Previewing => "previewing",
            CaptureStage::Uploading => "uploading",
            CaptureStage::Submitted => "submitted",
            CaptureStage::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    #[error("an upload is already in progress")]
    SubmitInFlight,
    #[error("this session already accepted its photo")]
    AlreadySubmitted,
    #[error("failed to encode photo: {0}")]
    Encode(String),
    #[error("upload failed: {0}")]
    Upload(#[source] StoreError),
}

impl CaptureError {
    /// Transport failures; resubmitting the same photo may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaptureError::Upload(err) if !err.is_rejection())
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::Camera(err) => err.user_message(),
            CaptureError::InvalidTransition { .. } => "That action is not available right now.",
            CaptureError::SubmitInFlight => "Your photo is already uploading.",
            CaptureError::AlreadySubmitted => {
                "Your work was already submitted. Check your computer for the result."
            }
            CaptureError::Encode(_) => "Could not process the photo. Please retake it.",
            CaptureError::Upload(err) if err.is_rejection() => {
                "This grading session no longer accepts photos. Scan a new code on your computer."
            }
            CaptureError::Upload(_) => {
                "Upload failed. Check your connection and submit again, or retake the photo."
            }
        }
    }
}

/// Which controls are enabled for the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailableActions {
    pub open_camera: bool,
    pub capture: bool,
    pub cancel: bool,
    pub retake: bool,
    pub submit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineView {
    pub stage: CaptureStage,
    pub preview_bytes: Option<usize>,
    pub inline_error: Option<&'static str>,
    pub actions: AvailableActions,
}

struct PipelineState {
    stage: CaptureStage,
    stream: Option<Box<dyn CameraStream>>,
    preview: Option<CapturedImage>,
    credential: Option<Credential>,
    inline_error: Option<&'static str>,
}

impl PipelineState {
    fn release_camera(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }

    fn invalid(&self, action: &'static str) -> CaptureError {
        CaptureError::InvalidTransition {
            from: self.stage.name(),
            action,
        }
    }
}

/// Camera → preview → upload for one validated session.
///
/// Methods take `&self` so controls can be driven from several tasks; the
/// stage lock is never held across an await, and `Uploading` is what makes
/// a second submit bounce with [`CaptureError::SubmitInFlight`].
pub struct CapturePipeline {
    store: SharedStore,
    camera: Arc<dyn Camera>,
    request: CameraRequest,
    device: DeviceContext,
    session_id: String,
    context: SessionContext,
    state: Mutex<PipelineState>,
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("session_id", &self.session_id)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl CapturePipeline {
    pub fn new(
        store: SharedStore,
        camera: Arc<dyn Camera>,
        request: CameraRequest,
        device: DeviceContext,
        session: ValidatedSession,
    ) -> Self {
        Self {
            store,
            camera,
            request,
            device,
            session_id: session.session_id,
            context: session.context,
            state: Mutex::new(PipelineState {
                stage: CaptureStage::Idle,
                stream: None,
                preview: None,
                credential: Some(session.credential),
                inline_error: None,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn stage(&self) -> CaptureStage {
        self.state.lock().stage.clone()
    }

    pub fn preview(&self) -> Option<CapturedImage> {
        self.state.lock().preview.clone()
    }

    pub fn view(&self) -> PipelineView {
        let state = self.state.lock();
        let actions = match &state.stage {
            CaptureStage::Idle | CaptureStage::Failed(_) => AvailableActions {
                open_camera: true,
                ..AvailableActions::default()
            },
            CaptureStage::CameraActive => AvailableActions {
                capture: true,
                cancel: true,
                ..AvailableActions::default()
            },
            CaptureStage::Previewing => AvailableActions {
                retake: true,
                submit: true,
                ..AvailableActions::default()
            },
            CaptureStage::Acquiring | CaptureStage::Uploading | CaptureStage::Submitted => {
                AvailableActions::default()
            }
        };
        let inline_error = match &state.stage {
            CaptureStage::Failed(err) => Some(err.user_message()),
            _ => state.inline_error,
        };
        PipelineView {
            stage: state.stage.clone(),
            preview_bytes: state.preview.as_ref().map(|image| image.size_bytes),
            inline_error,
            actions,
        }
    }

    /// Acquires the camera. Also the retry path after a failed acquisition:
    /// every call asks the device again.
    pub async fn open_camera(&self) -> Result<(), CaptureError> {
        {
            let mut state = self.state.lock();
            match state.stage {
                CaptureStage::Idle | CaptureStage::Failed(_) => {}
                _ => return Err(state.invalid("open the camera")),
            }
            state.stage = CaptureStage::Acquiring;
            state.inline_error = None;
        }

        let acquired = self.camera.acquire(&self.request).await;

        let mut state = self.state.lock();
        if state.stage != CaptureStage::Acquiring {
            // Shut down while waiting on the device.
            if let Ok(mut stream) = acquired {
                stream.release();
            }
            return Err(state.invalid("open the camera"));
        }
        match acquired {
            Ok(stream) => {
                state.stream = Some(stream);
                state.stage = CaptureStage::CameraActive;
                debug!(
                    target: "gradelink::acceptor",
                    session_id = %self.session_id,
                    "camera active"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    target: "gradelink::acceptor",
                    session_id = %self.session_id,
                    error = %err,
                    "camera acquisition failed"
                );
                state.stage = CaptureStage::Failed(err.clone());
                Err(err.into())
            }
        }
    }

    /// Freezes the current frame and gives the camera back immediately.
    pub fn capture(&self) -> Result<CapturedImage, CaptureError> {
        let mut state = self.state.lock();
        if state.stage != CaptureStage::CameraActive {
            return Err(state.invalid("capture"));
        }
        let Some(mut stream) = state.stream.take() else {
            return Err(state.invalid("capture"));
        };
        let frame = stream.grab_frame();
        stream.release();
        drop(stream);

        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                state.stage = CaptureStage::Failed(err.clone());
                return Err(err.into());
            }
        };
        let image = match CapturedImage::from_frame(&frame, OffsetDateTime::now_utc()) {
            Ok(image) => image,
            Err(err) => {
                state.stage = CaptureStage::Idle;
                state.inline_error = Some(err.user_message());
                return Err(err);
            }
        };
        debug!(
            target: "gradelink::acceptor",
            session_id = %self.session_id,
            size_bytes = image.size_bytes,
            width = image.width,
            height = image.height,
            "photo captured"
        );
        state.preview = Some(image.clone());
        state.stage = CaptureStage::Previewing;
        Ok(image)
    }

    pub fn cancel_camera(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if state.stage != CaptureStage::CameraActive {
            return Err(state.invalid("cancel the camera"));
        }
        state.release_camera();
        state.stage = CaptureStage::Idle;
        Ok(())
    }

    /// Drops the preview and re-acquires the camera.
    pub async fn retake(&self) -> Result<(), CaptureError> {
        {
            let mut state = self.state.lock();
            if state.stage != CaptureStage::Previewing {
                return Err(state.invalid("retake"));
            }
            state.preview = None;
            state.release_camera();
            state.stage = CaptureStage::Idle;
        }
        self.open_camera().await
    }

    /// Uploads the previewed photo. On success the credential is consumed;
    /// on failure the preview stays up with an inline error.
    pub async fn submit(&self) -> Result<(), CaptureError> {
        let (image, credential) = {
            let mut state = self.state.lock();
            match state.stage {
                CaptureStage::Previewing => {}
                CaptureStage::Uploading => return Err(CaptureError::SubmitInFlight),
                CaptureStage::Submitted => return Err(CaptureError::AlreadySubmitted),
                _ => return Err(state.invalid("submit")),
            }
            let (Some(image), Some(credential)) = (state.preview.clone(), state.credential.clone())
            else {
                return Err(state.invalid("submit"));
            };
            state.stage = CaptureStage::Uploading;
            state.inline_error = None;
            (image, credential)
        };

        let metadata = CaptureMetadata::new(&self.device, image.captured_at, &self.context);
        let outcome = self
            .store
            .submit_image(ImageUpload {
                session_id: &self.session_id,
                credential: &credential,
                bytes: &image.bytes,
                mime: image.mime,
                captured_at: image.captured_at,
                metadata: &metadata,
            })
            .await;

        let mut state = self.state.lock();
        match outcome {
            Ok(()) => {
                state.stage = CaptureStage::Submitted;
                state.credential = None;
                state.preview = None;
                info!(
                    target: "gradelink::acceptor",
                    session_id = %self.session_id,
                    size_bytes = image.size_bytes,
                    "photo submitted"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    target: "gradelink::acceptor",
                    session_id = %self.session_id,
                    error = %err,
                    "photo upload failed"
                );
                let err = CaptureError::Upload(err);
                state.stage = CaptureStage::Previewing;
                state.inline_error = Some(err.user_message());
                Err(err)
            }
        }
    }

    /// Releases the camera. Safe to call at any point; an upload already
    /// underway is left to finish.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.release_camera();
        if matches!(
            state.stage,
            CaptureStage::CameraActive | CaptureStage::Acquiring
        ) {
            state.stage = CaptureStage::Idle;
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.state.get_mut().release_camera();
    }
}
