// Platform capture abstractions
//
// A backend turns a permission grant into a capture source. The source owns
// the acquisition surface and the virtual display that mirrors the screen
// into it, and reports asynchronous revocation through a TerminationSignal.

pub mod synthetic;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CaptureError;

/// Result of the external permission handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantToken {
    /// Platform result code returned with the grant
    pub result_code: i32,
    /// Opaque grant payload; absent when the user declined
    pub data: Option<String>,
}

impl GrantToken {
    pub fn granted(result_code: i32, data: impl Into<String>) -> Self {
        Self {
            result_code,
            data: Some(data.into()),
        }
    }

    pub fn denied(result_code: i32) -> Self {
        Self {
            result_code,
            data: None,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.data.is_some()
    }
}

/// Size and density of the display being mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetrics {
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub density_dpi: u32,
}

impl DisplayMetrics {
    pub fn new(width_pixels: u32, height_pixels: u32, density_dpi: u32) -> Self {
        Self {
            width_pixels,
            height_pixels,
            density_dpi,
        }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.width_pixels == 0 || self.height_pixels == 0 {
            return Err(CaptureError::SetupFailed(format!(
                "display metrics {}x{} have a zero dimension",
                self.width_pixels, self.height_pixels
            )));
        }
        Ok(())
    }
}

/// First plane of a captured image, borrowed from the platform buffer
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Bytes between horizontally adjacent pixels
    pub pixel_stride: usize,
    /// Bytes between the starts of vertically adjacent rows
    pub row_stride: usize,
}

/// A platform image held by the capture worker
///
/// Dropping the image releases it back to the acquisition surface.
pub trait SourceImage: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Fails when the platform already invalidated the image
    fn plane(&self) -> Result<Plane<'_>, CaptureError>;
}

/// Fixed-size pool of images fed by the virtual display
///
/// Dropping the surface releases it.
pub trait AcquisitionSurface: Send + Sync + 'static {
    type Image: SourceImage;

    /// Blocks for at most `timeout` waiting for the next image
    ///
    /// `Ok(None)` means no image arrived in time.
    fn acquire_next_image(&self, timeout: Duration) -> Result<Option<Self::Image>, CaptureError>;
}

/// Live capture authority obtained from a grant
pub trait CaptureSource: Send + 'static {
    type Surface: AcquisitionSurface;
    /// Virtual display handle; released on drop
    type Display: Send + 'static;

    /// Allocates the image pool sized to the display
    fn create_surface(
        &mut self,
        metrics: &DisplayMetrics,
        max_images: usize,
    ) -> Result<Self::Surface, CaptureError>;

    /// Starts mirroring the screen into `surface`
    fn create_virtual_display(
        &mut self,
        name: &str,
        metrics: &DisplayMetrics,
        surface: &Self::Surface,
    ) -> Result<Self::Display, CaptureError>;

    /// Registers the callback fired when the platform revokes this source
    fn on_terminated(&mut self, signal: TerminationSignal);

    /// Releases the source; may fire the termination callback
    fn stop(&mut self);
}

/// Entry point into a platform's capture facility
pub trait CaptureBackend: Send + Sync + 'static {
    type Source: CaptureSource;

    /// Current metrics of the display to mirror
    fn display_metrics(&self) -> DisplayMetrics;

    /// Exchanges a grant for a capture source
    fn open(&self, grant: &GrantToken) -> Result<Self::Source, CaptureError>;
}

/// Callback a capture source fires when the platform stops it
#[derive(Clone)]
pub struct TerminationSignal {
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl TerminationSignal {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Notifies the owning session; safe to call repeatedly and from any thread
    pub fn fire(&self) {
        (self.callback)();
    }
}

impl fmt::Debug for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminationSignal").finish_non_exhaustive()
    }
}
