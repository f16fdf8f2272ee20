//! Camera capture
//!
//! Abstracts the live feed behind the [`FrameSource`] trait so the capture
//! path can run against a real device, a directory of stills, or a test
//! double. The [`FrameAcquirer`] pulls one still per call and encodes it into
//! the JPEG payload the recognition backend expects.

pub mod probe;
pub mod source;

pub use probe::{CameraState, CapabilityProbe};
pub use source::{CommandCamera, DirectoryCamera};

use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;

/// MIME type of every encoded frame
pub const FRAME_MIME_TYPE: &str = "image/jpeg";

/// File name used when the frame is uploaded
pub const FRAME_FILE_NAME: &str = "capture.jpg";

/// Camera device errors
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Camera device error: {0}")]
    Device(String),

    #[error("Failed to decode camera frame: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Camera did not deliver a frame within {0} ms")]
    Timeout(u64),
}

/// A source of still images from a live feed
///
/// Implementations are called from the blocking pool and may block for up to
/// one frame interval.
pub trait FrameSource: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> String;

    /// Open the device; an error means the capability is unavailable
    fn open(&self) -> Result<(), CameraError>;

    /// The most recent still, or `None` if nothing has been buffered yet
    fn grab(&self) -> Result<Option<DynamicImage>, CameraError>;
}

/// An encoded still ready for upload
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Encoding settings for acquired frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireSettings {
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Frames wider than this are downscaled
    pub max_width: u32,
    /// Frames taller than this are downscaled
    pub max_height: u32,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 85,
            max_width: 720,
            max_height: 480,
        }
    }
}

/// Downscale (keeping aspect ratio) and encode an image as JPEG
pub fn encode_jpeg(image: &DynamicImage, settings: AcquireSettings) -> Result<Frame, CameraError> {
    let fitted = if image.width() > settings.max_width || image.height() > settings.max_height {
        image.resize(settings.max_width, settings.max_height, FilterType::Triangle)
    } else {
        image.clone()
    };

    let rgb = fitted.to_rgb8();
    let mut data = Vec::new();
    let quality = settings.jpeg_quality.clamp(1, 100);
    JpegEncoder::new_with_quality(&mut data, quality)
        .encode_image(&rgb)
        .map_err(|e| CameraError::Encode(e.to_string()))?;

    Ok(Frame {
        data,
        mime_type: FRAME_MIME_TYPE.to_string(),
        width: rgb.width(),
        height: rgb.height(),
        captured_at: Utc::now(),
    })
}

/// Pulls single stills from a [`FrameSource`] on demand
#[derive(Clone)]
pub struct FrameAcquirer {
    source: Arc<dyn FrameSource>,
    probe: CapabilityProbe,
    settings: AcquireSettings,
}

impl FrameAcquirer {
    pub fn new(source: Arc<dyn FrameSource>, probe: CapabilityProbe, settings: AcquireSettings) -> Self {
        Self {
            source,
            probe,
            settings,
        }
    }

    /// The underlying source
    pub fn source(&self) -> Arc<dyn FrameSource> {
        Arc::clone(&self.source)
    }

    /// The probe gating this acquirer
    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }

    /// Acquire and encode one still from the live feed
    ///
    /// Fails with `CameraNotReady`/`CameraUnavailable` unless the probe is
    /// ready, and with `NoFrameAvailable` when the feed has nothing buffered.
    /// A device error flips the probe to unavailable.
    pub async fn acquire(&self) -> Result<Frame, CaptureError> {
        match self.probe.state() {
            CameraState::Ready => {}
            CameraState::Pending => return Err(CaptureError::CameraNotReady),
            CameraState::Unavailable { reason } => {
                return Err(CaptureError::CameraUnavailable(reason))
            }
        }

        let source = Arc::clone(&self.source);
        let settings = self.settings;
        let grabbed = tokio::task::spawn_blocking(move || -> Result<Option<Frame>, CameraError> {
            match source.grab()? {
                Some(image) => encode_jpeg(&image, settings).map(Some),
                None => Ok(None),
            }
        })
        .await;

        match grabbed {
            Ok(Ok(Some(frame))) => {
                tracing::debug!(
                    "Acquired frame {}x{} ({} bytes)",
                    frame.width,
                    frame.height,
                    frame.data.len()
                );
                Ok(frame)
            }
            Ok(Ok(None)) => Err(CaptureError::NoFrameAvailable),
            // A garbled or late still is a skipped cycle, not a dead camera
            Ok(Err(
                e @ (CameraError::Decode(_) | CameraError::Encode(_) | CameraError::Timeout(_)),
            )) => {
                tracing::warn!("Discarding unusable frame: {}", e);
                Err(CaptureError::NoFrameAvailable)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                tracing::error!("Camera failed during capture: {}", reason);
                self.probe.mark_unavailable(reason.clone());
                Err(CaptureError::CameraUnavailable(reason))
            }
            Err(e) => {
                tracing::error!("Frame capture worker failed: {}", e);
                Err(CaptureError::NoFrameAvailable)
            }
        }
    }
}
