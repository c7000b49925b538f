//! Camera access for the acceptor.
//!
//! Provides a file-backed still camera for the CLI and a synthetic source
//! for development and tests. Every camera is exclusive: a second
//! `acquire` while a stream is live fails with [`CameraError::Busy`].

use async_trait::async_trait;
use image::{ImageError, Rgb, RgbImage};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    /// Rear camera, preferred for photographing paper.
    #[default]
    Environment,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRequest {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            facing: Facing::Environment,
            ideal_width: 1920,
            ideal_height: 1080,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera available")]
    NoDevice,
    #[error("camera is already in use")]
    Busy,
    #[error("camera failure: {0}")]
    Hardware(String),
}

impl CameraError {
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied => {
                "Camera access was denied. Allow camera permissions, then try again."
            }
            CameraError::NoDevice => "No camera was found on this device.",
            CameraError::Busy => "The camera is in use by another app. Close it and try again.",
            CameraError::Hardware(_) => "The camera stopped responding. Please try again.",
        }
    }
}

#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// A live feed. The device is held until `release` or drop.
pub trait CameraStream: Send {
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError>;
    fn release(&mut self);
}

/// Exclusive hold on a device; gives it back on drop.
#[derive(Debug)]
struct DeviceLease {
    in_use: Arc<AtomicBool>,
    released: bool,
}

impl DeviceLease {
    fn take(in_use: &Arc<AtomicBool>) -> Result<Self, CameraError> {
        in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CameraError::Busy)?;
        Ok(Self {
            in_use: in_use.clone(),
            released: false,
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.in_use.store(false, Ordering::Release);
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Serves a photo from disk as the live frame.
#[derive(Debug, Clone)]
pub struct StillImageCamera {
    path: PathBuf,
    in_use: Arc<AtomicBool>,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn map_image_error(err: ImageError) -> CameraError {
    match err {
        ImageError::IoError(io) => match io.kind() {
            ErrorKind::NotFound => CameraError::NoDevice,
            ErrorKind::PermissionDenied => CameraError::PermissionDenied,
            _ => CameraError::Hardware(io.to_string()),
        },
        other => CameraError::Hardware(other.to_string()),
    }
}

#[async_trait]
impl Camera for StillImageCamera {
    async fn acquire(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>, CameraError> {
        let lease = DeviceLease::take(&self.in_use)?;
        let path = self.path.clone();
        let frame = tokio::task::spawn_blocking(move || image::open(path))
            .await
            .map_err(|err| CameraError::Hardware(err.to_string()))?
            .map_err(map_image_error)?
            .to_rgb8();
        debug!(
            target: "gradelink::acceptor",
            path = %self.path.display(),
            width = frame.width(),
            height = frame.height(),
            facing = ?request.facing,
            "still camera acquired"
        );
        Ok(Box::new(StaticStream {
            frame,
            lease,
        }))
    }
}

struct StaticStream {
    frame: RgbImage,
    lease: DeviceLease,
}

impl CameraStream for StaticStream {
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError> {
        if self.lease.released {
            return Err(CameraError::Hardware("stream already released".into()));
        }
        Ok(self.frame.clone())
    }

    fn release(&mut self) {
        self.lease.release();
    }
}

#[derive(Debug, Default)]
struct SyntheticStats {
    acquisitions: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
}

/// Generated test pattern standing in for real hardware.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    denied: Arc<AtomicBool>,
    in_use: Arc<AtomicBool>,
    stats: Arc<SyntheticStats>,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            denied: Arc::new(AtomicBool::new(false)),
            in_use: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    pub fn deny_permission(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Attempts that reached the device, successful or not.
    pub fn acquisitions(&self) -> usize {
        self.stats.acquisitions.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    pub fn peak_live_streams(&self) -> usize {
        self.stats.peak_live.load(Ordering::SeqCst)
    }

    fn pattern(&self) -> RgbImage {
        let (w, h) = (self.width.max(1), self.height.max(1));
        RgbImage::from_fn(w, h, |x, y| {
            let ink = (x / 16 + y / 16) % 2 == 0;
            if ink {
                Rgb([(x * 255 / w) as u8, 40, (y * 255 / h) as u8])
            } else {
                Rgb([245, 245, 240])
            }
        })
    }
}

#[async_trait]
impl Camera for SyntheticCamera {
    async fn acquire(
        &self,
        _request: &CameraRequest,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        self.stats.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.denied.load(Ordering::SeqCst) {
            return Err(CameraError::PermissionDenied);
        }
        let lease = DeviceLease::take(&self.in_use)?;
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            frame: self.pattern(),
            lease,
            stats: self.stats.clone(),
        }))
    }
}

struct SyntheticStream {
    frame: RgbImage,
    lease: DeviceLease,
    stats: Arc<SyntheticStats>,
}

impl CameraStream for SyntheticStream {
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError> {
        if self.lease.released {
            return Err(CameraError::Hardware("stream already released".into()));
        }
        Ok(self.frame.clone())
    }

    fn release(&mut self) {
        if !self.lease.released {
            self.lease.release();
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.release();
    }
}
