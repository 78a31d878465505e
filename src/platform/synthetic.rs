// In-process virtual display producing paced test-pattern frames
//
// Useful where no platform capture facility exists: demos, the desktop
// shell and tests. Rows can be padded to exercise stride normalization,
// and revocation and setup failures can be injected.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{
    AcquisitionSurface, CaptureBackend, CaptureSource, DisplayMetrics, GrantToken, Plane,
    SourceImage, TerminationSignal,
};
use crate::capture::BYTES_PER_PIXEL;
use crate::dispatch::lock;
use crate::error::CaptureError;

/// Filler written into row padding
pub const PADDING_BYTE: u8 = 0xEE;

/// Knobs for the synthetic platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyntheticOptions {
    /// Frames produced per second
    pub fps: u32,
    /// Extra bytes appended to every row
    pub row_padding: usize,
    /// Make surface allocation fail
    pub fail_surface: bool,
    /// Make virtual display creation fail
    pub fail_virtual_display: bool,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            row_padding: 0,
            fail_surface: false,
            fail_virtual_display: false,
        }
    }
}

/// Counters recording what the synthetic platform was asked to do
#[derive(Debug, Default)]
pub struct SyntheticProbe {
    images_acquired: AtomicUsize,
    images_released: AtomicUsize,
    surfaces_released: AtomicUsize,
    displays_released: AtomicUsize,
    sources_stopped: AtomicUsize,
}

impl SyntheticProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn images_acquired(&self) -> usize {
        self.images_acquired.load(Ordering::SeqCst)
    }

    pub fn images_released(&self) -> usize {
        self.images_released.load(Ordering::SeqCst)
    }

    /// Images handed out and not yet released
    pub fn images_outstanding(&self) -> usize {
        self.images_acquired()
            .saturating_sub(self.images_released())
    }

    pub fn surfaces_released(&self) -> usize {
        self.surfaces_released.load(Ordering::SeqCst)
    }

    pub fn displays_released(&self) -> usize {
        self.displays_released.load(Ordering::SeqCst)
    }

    pub fn sources_stopped(&self) -> usize {
        self.sources_stopped.load(Ordering::SeqCst)
    }
}

/// Paces frame production to a target rate
struct FramePacer {
    frame_duration: Duration,
    last_frame_time: Option<Instant>,
}

impl FramePacer {
    fn new(target_fps: u32) -> Self {
        Self {
            frame_duration: Duration::from_micros(1_000_000 / target_fps.max(1) as u64),
            last_frame_time: None,
        }
    }

    /// Time left until the next frame is due
    fn wait_for_next_frame(&self) -> Duration {
        match self.last_frame_time {
            Some(last_time) => self.frame_duration.saturating_sub(last_time.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn mark_frame_written(&mut self) {
        self.last_frame_time = Some(Instant::now());
    }
}

/// Synthetic capture platform
pub struct SyntheticBackend {
    metrics: DisplayMetrics,
    options: SyntheticOptions,
    probe: Arc<SyntheticProbe>,
    termination: Arc<Mutex<Option<TerminationSignal>>>,
}

impl SyntheticBackend {
    pub fn new(metrics: DisplayMetrics) -> Self {
        Self::with_options(metrics, SyntheticOptions::default())
    }

    pub fn with_options(metrics: DisplayMetrics, options: SyntheticOptions) -> Self {
        Self {
            metrics,
            options,
            probe: SyntheticProbe::new(),
            termination: Arc::new(Mutex::new(None)),
        }
    }

    pub fn probe(&self) -> Arc<SyntheticProbe> {
        Arc::clone(&self.probe)
    }

    /// Simulates the user revoking capture from a system surface
    ///
    /// Returns false when no source has registered for termination.
    pub fn revoke(&self) -> bool {
        let signal = lock(&self.termination).clone();
        match signal {
            Some(signal) => {
                info!("Synthetic capture revoked");
                signal.fire();
                true
            }
            None => false,
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    type Source = SyntheticSource;

    fn display_metrics(&self) -> DisplayMetrics {
        self.metrics
    }

    fn open(&self, grant: &GrantToken) -> Result<SyntheticSource, CaptureError> {
        if !grant.is_granted() {
            return Err(CaptureError::PermissionDenied(format!(
                "grant refused with result code {}",
                grant.result_code
            )));
        }

        Ok(SyntheticSource {
            options: self.options.clone(),
            probe: Arc::clone(&self.probe),
            termination: Arc::clone(&self.termination),
            stopped: false,
        })
    }
}

/// Capture source handed out by [`SyntheticBackend`]
pub struct SyntheticSource {
    options: SyntheticOptions,
    probe: Arc<SyntheticProbe>,
    termination: Arc<Mutex<Option<TerminationSignal>>>,
    stopped: bool,
}

impl CaptureSource for SyntheticSource {
    type Surface = SyntheticSurface;
    type Display = SyntheticDisplay;

    fn create_surface(
        &mut self,
        metrics: &DisplayMetrics,
        max_images: usize,
    ) -> Result<SyntheticSurface, CaptureError> {
        if self.options.fail_surface {
            return Err(CaptureError::SetupFailed(
                "image surface allocation refused".to_string(),
            ));
        }

        Ok(SyntheticSurface {
            width: metrics.width_pixels,
            height: metrics.height_pixels,
            row_stride: metrics.width_pixels as usize * BYTES_PER_PIXEL + self.options.row_padding,
            max_images,
            mirroring: Arc::new(AtomicBool::new(false)),
            pacer: Mutex::new(FramePacer::new(self.options.fps)),
            frame_index: AtomicU64::new(0),
            probe: Arc::clone(&self.probe),
        })
    }

    fn create_virtual_display(
        &mut self,
        name: &str,
        metrics: &DisplayMetrics,
        surface: &SyntheticSurface,
    ) -> Result<SyntheticDisplay, CaptureError> {
        if self.options.fail_virtual_display {
            return Err(CaptureError::SetupFailed(format!(
                "virtual display '{}' could not be created",
                name
            )));
        }

        debug!(
            name,
            width = metrics.width_pixels,
            height = metrics.height_pixels,
            dpi = metrics.density_dpi,
            "Synthetic virtual display created"
        );
        surface.mirroring.store(true, Ordering::Release);

        Ok(SyntheticDisplay {
            mirroring: Arc::clone(&surface.mirroring),
            probe: Arc::clone(&self.probe),
        })
    }

    fn on_terminated(&mut self, signal: TerminationSignal) {
        *lock(&self.termination) = Some(signal);
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.probe.sources_stopped.fetch_add(1, Ordering::SeqCst);

        // Platforms report their own stop through the termination callback too
        let signal = lock(&self.termination).take();
        if let Some(signal) = signal {
            signal.fire();
        }
    }
}

/// Mirrors the synthetic screen into its surface until dropped
pub struct SyntheticDisplay {
    mirroring: Arc<AtomicBool>,
    probe: Arc<SyntheticProbe>,
}

impl Drop for SyntheticDisplay {
    fn drop(&mut self) {
        self.mirroring.store(false, Ordering::Release);
        self.probe.displays_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Image pool filled with a moving gradient
pub struct SyntheticSurface {
    width: u32,
    height: u32,
    row_stride: usize,
    max_images: usize,
    mirroring: Arc<AtomicBool>,
    pacer: Mutex<FramePacer>,
    frame_index: AtomicU64,
    probe: Arc<SyntheticProbe>,
}

impl SyntheticSurface {
    fn render(&self, frame_index: u64) -> Vec<u8> {
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        let mut data = vec![PADDING_BYTE; self.row_stride * self.height as usize];

        for (y, row) in data.chunks_mut(self.row_stride).enumerate() {
            for (x, pixel) in row[..row_bytes].chunks_mut(BYTES_PER_PIXEL).enumerate() {
                pixel.copy_from_slice(&[x as u8, y as u8, frame_index as u8, 0xFF]);
            }
        }
        data
    }
}

impl AcquisitionSurface for SyntheticSurface {
    type Image = SyntheticImage;

    fn acquire_next_image(&self, timeout: Duration) -> Result<Option<SyntheticImage>, CaptureError> {
        if !self.mirroring.load(Ordering::Acquire) {
            thread::sleep(timeout);
            return Ok(None);
        }

        if self.probe.images_outstanding() >= self.max_images {
            return Err(CaptureError::ImageAcquisitionTransient(format!(
                "maxImages ({}) has already been acquired",
                self.max_images
            )));
        }

        {
            let mut pacer = lock(&self.pacer);
            let wait = pacer.wait_for_next_frame();
            if wait > timeout {
                drop(pacer);
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
            pacer.mark_frame_written();
        }

        let frame_index = self.frame_index.fetch_add(1, Ordering::Relaxed);
        Ok(Some(SyntheticImage::from_parts(
            self.render(frame_index),
            self.width,
            self.height,
            self.row_stride,
            false,
            &self.probe,
        )))
    }
}

impl Drop for SyntheticSurface {
    fn drop(&mut self) {
        self.probe.surfaces_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One synthetic image; dropping it releases it
pub struct SyntheticImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    row_stride: usize,
    invalidated: bool,
    probe: Arc<SyntheticProbe>,
}

impl SyntheticImage {
    pub(crate) fn from_parts(
        data: Vec<u8>,
        width: u32,
        height: u32,
        row_stride: usize,
        invalidated: bool,
        probe: &Arc<SyntheticProbe>,
    ) -> Self {
        probe.images_acquired.fetch_add(1, Ordering::SeqCst);
        Self {
            data,
            width,
            height,
            row_stride,
            invalidated,
            probe: Arc::clone(probe),
        }
    }
}

impl SourceImage for SyntheticImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn plane(&self) -> Result<Plane<'_>, CaptureError> {
        if self.invalidated {
            return Err(CaptureError::ImageAcquisitionTransient(
                "image is already closed".to_string(),
            ));
        }

        Ok(Plane {
            data: &self.data,
            pixel_stride: BYTES_PER_PIXEL,
            row_stride: self.row_stride,
        })
    }
}

impl Drop for SyntheticImage {
    fn drop(&mut self) {
        self.probe.images_released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> DisplayMetrics {
        DisplayMetrics::new(8, 4, 160)
    }

    #[test]
    fn test_denied_grant_is_rejected() {
        let backend = SyntheticBackend::new(metrics());
        let result = backend.open(&GrantToken::denied(0));
        assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
    }

    #[test]
    fn test_surface_idle_until_display_mirrors() {
        let backend = SyntheticBackend::new(metrics());
        let mut source = backend.open(&GrantToken::granted(-1, "token")).unwrap();
        let surface = source.create_surface(&metrics(), 3).unwrap();

        let idle = surface.acquire_next_image(Duration::from_millis(5)).unwrap();
        assert!(idle.is_none());

        let display = source
            .create_virtual_display("test", &metrics(), &surface)
            .unwrap();
        let image = surface
            .acquire_next_image(Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert_eq!((image.width(), image.height()), (8, 4));

        drop(image);
        drop(display);
        assert_eq!(backend.probe().images_released(), 1);
        assert_eq!(backend.probe().displays_released(), 1);
    }

    #[test]
    fn test_padded_rows_carry_filler() {
        let options = SyntheticOptions {
            row_padding: 16,
            ..Default::default()
        };
        let backend = SyntheticBackend::with_options(metrics(), options);
        let mut source = backend.open(&GrantToken::granted(-1, "token")).unwrap();
        let surface = source.create_surface(&metrics(), 3).unwrap();
        let _display = source
            .create_virtual_display("padded", &metrics(), &surface)
            .unwrap();

        let image = surface
            .acquire_next_image(Duration::from_millis(200))
            .unwrap()
            .unwrap();
        let plane = image.plane().unwrap();
        assert_eq!(plane.row_stride, 8 * 4 + 16);
        assert_eq!(plane.data[8 * 4], PADDING_BYTE);
    }

    #[test]
    fn test_max_images_enforced() {
        let options = SyntheticOptions {
            fps: 1000,
            ..Default::default()
        };
        let backend = SyntheticBackend::with_options(metrics(), options);
        let mut source = backend.open(&GrantToken::granted(-1, "token")).unwrap();
        let surface = source.create_surface(&metrics(), 1).unwrap();
        let _display = source
            .create_virtual_display("one", &metrics(), &surface)
            .unwrap();

        let held = surface
            .acquire_next_image(Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert!(surface.acquire_next_image(Duration::from_millis(5)).is_err());
        drop(held);
    }

    #[test]
    fn test_stop_fires_termination_once() {
        let backend = SyntheticBackend::new(metrics());
        let mut source = backend.open(&GrantToken::granted(-1, "token")).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        source.on_terminated(TerminationSignal::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        source.stop();
        source.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(backend.probe().sources_stopped(), 1);
        assert!(!backend.revoke());
    }
}
