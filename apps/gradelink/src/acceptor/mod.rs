//! Mobile side of the handoff: validate the scanned link, announce presence,
//! then capture and upload one photo.

pub mod camera;
pub mod capture;
pub mod validator;

pub use camera::{
    Camera, CameraError, CameraRequest, CameraStream, Facing, StillImageCamera, SyntheticCamera,
};
pub use capture::{
    AvailableActions, CaptureError, CapturePipeline, CaptureStage, CapturedImage, PipelineView,
};
pub use validator::{SessionValidator, ValidatedSession, ValidationFailure, ValidatorState};

use crate::store::SharedStore;
use gradelink_proto::DeviceContext;
use std::sync::Arc;

pub struct Acceptor {
    store: SharedStore,
    camera: Arc<dyn Camera>,
    device: DeviceContext,
    request: CameraRequest,
}

impl Acceptor {
    pub fn new(store: SharedStore, camera: Arc<dyn Camera>) -> Self {
        Self {
            store,
            camera,
            device: DeviceContext::default(),
            request: CameraRequest::default(),
        }
    }

    pub fn with_device(mut self, device: DeviceContext) -> Self {
        self.device = device;
        self
    }

    pub fn with_request(mut self, request: CameraRequest) -> Self {
        self.request = request;
        self
    }

    /// Page load: validates the inbound link once and, on success, hands
    /// back the capture pipeline for that session.
    pub async fn load(&self, inbound_url: &str) -> Result<CapturePipeline, ValidationFailure> {
        let mut validator = SessionValidator::new(self.store.clone());
        let session = validator.validate(inbound_url).await?;
        Ok(CapturePipeline::new(
            self.store.clone(),
            self.camera.clone(),
            self.request,
            self.device.clone(),
            session,
        ))
    }
}
