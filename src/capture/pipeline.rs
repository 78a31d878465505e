// Capture pipeline: acquisition loop, single-slot backpressure and delivery
//
// At most one frame is in flight between the capture worker and the
// subscriber. Images that arrive while a frame is in flight are released
// unread. The in-flight permit travels with the delivery task and is
// released when that task finishes or is dropped, whichever comes first.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::frame::{Frame, BYTES_PER_PIXEL};
use super::repacker::{check_plane, repack};
use super::slot::SubscriberSlot;
use super::stats::PipelineStats;
use crate::dispatch::{run_on, Presenter, Task};
use crate::error::CaptureError;
use crate::platform::{AcquisitionSurface, SourceImage};

/// Back-off after a failed acquisition so a persistent error cannot spin
const ACQUIRE_ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// Exclusive claim on the pipeline's single delivery slot
struct InFlightPermit {
    flag: Arc<AtomicBool>,
}

impl InFlightPermit {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// What happened to one image offered to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Packed and handed to the presentation context
    Scheduled,
    /// Released unread because a frame was already in flight
    Dropped,
    /// Unreadable image, skipped
    Skipped,
    /// The presentation context refused the delivery task
    Rejected,
}

/// Turns captured images into frames for the subscriber slot
pub struct CapturePipeline {
    in_flight: Arc<AtomicBool>,
    slot: Arc<SubscriberSlot>,
    presenter: Arc<dyn Presenter>,
    stats: Arc<PipelineStats>,
    next_sequence: AtomicU64,
    progress_log_interval: u64,
}

impl CapturePipeline {
    pub fn new(
        slot: Arc<SubscriberSlot>,
        presenter: Arc<dyn Presenter>,
        stats: Arc<PipelineStats>,
        progress_log_interval: u64,
    ) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            slot,
            presenter,
            stats,
            next_sequence: AtomicU64::new(0),
            progress_log_interval,
        }
    }

    /// Whether a frame is currently in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Offers a freshly acquired image; never blocks
    ///
    /// The image is released before this returns on every path.
    pub fn on_image_available<I: SourceImage>(&self, image: I) -> FrameOutcome {
        self.stats.record_acquired();

        let Some(permit) = InFlightPermit::try_acquire(&self.in_flight) else {
            drop(image);
            self.stats.record_dropped();
            return FrameOutcome::Dropped;
        };

        let frame = match self.copy_frame(&image) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable image");
                self.stats.record_transient_error();
                return FrameOutcome::Skipped;
            }
        };
        drop(image);

        let slot = Arc::clone(&self.slot);
        let stats = Arc::clone(&self.stats);
        let log_interval = self.progress_log_interval;

        let task: Task = Box::new(move || {
            let _permit = permit;
            let (width, height, sequence) = (frame.width, frame.height, frame.sequence);

            if slot.deliver(frame) {
                let delivered = stats.record_delivered();
                if log_interval > 0 && delivered % log_interval == 0 {
                    info!(delivered, width, height, sequence, "Frames delivered");
                }
            } else {
                debug!(sequence, "No subscriber, frame discarded");
            }
        });

        match run_on(self.presenter.as_ref(), task) {
            Ok(()) => {
                self.stats.record_scheduled();
                FrameOutcome::Scheduled
            }
            Err(e) => {
                warn!(error = %e, "Frame delivery could not be scheduled");
                FrameOutcome::Rejected
            }
        }
    }

    fn copy_frame<I: SourceImage>(&self, image: &I) -> Result<Frame, CaptureError> {
        let (width, height) = (image.width(), image.height());
        let plane = image.plane()?;

        if plane.pixel_stride != BYTES_PER_PIXEL {
            return Err(CaptureError::ImageAcquisitionTransient(format!(
                "unsupported pixel stride {}",
                plane.pixel_stride
            )));
        }

        check_plane(&plane, width as usize, height as usize)?;
        let bytes = repack(&plane, width as usize, height as usize);

        Ok(Frame {
            bytes,
            width,
            height,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            captured_at: Utc::now(),
        })
    }
}

/// Dedicated thread pulling images from an acquisition surface
pub struct CaptureWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl CaptureWorker {
    /// Starts the acquisition loop
    ///
    /// The worker keeps a reference to `surface` until its loop exits.
    pub fn spawn<S: AcquisitionSurface>(
        surface: Arc<S>,
        pipeline: Arc<CapturePipeline>,
        acquire_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("CaptureThread".to_string())
            .spawn(move || {
                info!("Capture worker started");

                while running_thread.load(Ordering::Acquire) {
                    match surface.acquire_next_image(acquire_timeout) {
                        Ok(Some(image)) => {
                            if !running_thread.load(Ordering::Acquire) {
                                break;
                            }
                            pipeline.on_image_available(image);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Failed to acquire image");
                            pipeline.stats().record_transient_error();
                            thread::sleep(ACQUIRE_ERROR_BACKOFF);
                        }
                    }
                }

                let metrics = pipeline.stats().snapshot();
                info!(
                    acquired = metrics.acquired_frames,
                    delivered = metrics.delivered_frames,
                    dropped = metrics.dropped_frames,
                    "Capture worker stopped"
                );
            })
            .map_err(|e| {
                CaptureError::SetupFailed(format!("failed to spawn capture worker: {}", e))
            })?;

        let thread_id = handle.thread().id();

        Ok(Self {
            running,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Stops the loop and waits for it to exit
    ///
    /// From the worker thread itself the loop is only signalled.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return;
        };

        if thread::current().id() == self.thread_id {
            return;
        }

        if handle.join().is_err() {
            error!("Capture worker panicked");
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::synthetic::SyntheticProbe;
    use crate::test_support::{
        invalid_image, packed_image, padded_image, ManualPresenter, RecordingSink,
    };
    use std::panic::{self, AssertUnwindSafe};

    fn pipeline(presenter: Arc<ManualPresenter>) -> (CapturePipeline, Arc<SubscriberSlot>) {
        let slot = Arc::new(SubscriberSlot::new());
        let pipeline = CapturePipeline::new(
            Arc::clone(&slot),
            presenter,
            Arc::new(PipelineStats::new()),
            0,
        );
        (pipeline, slot)
    }

    #[test]
    fn test_burst_with_slow_subscriber_keeps_one_in_flight() {
        let presenter = ManualPresenter::new();
        let (pipeline, slot) = pipeline(Arc::clone(&presenter));
        let sink = RecordingSink::new();
        slot.subscribe(sink.clone()).unwrap();
        let probe = SyntheticProbe::new();

        let outcomes: Vec<FrameOutcome> = (0..10)
            .map(|_| pipeline.on_image_available(packed_image(4, 4, &probe)))
            .collect();

        assert_eq!(outcomes[0], FrameOutcome::Scheduled);
        assert!(outcomes[1..].iter().all(|o| *o == FrameOutcome::Dropped));
        assert_eq!(presenter.pending(), 1);
        assert_eq!(probe.images_released(), 10);
        assert!(pipeline.is_busy());

        assert_eq!(presenter.run_pending(), 1);
        assert_eq!(sink.frame_count(), 1);
        assert!(!pipeline.is_busy());

        let metrics = pipeline.stats().snapshot();
        assert_eq!(metrics.acquired_frames, 10);
        assert_eq!(metrics.dropped_frames, 9);
        assert_eq!(metrics.delivered_frames, 1);
    }

    #[test]
    fn test_next_image_flows_after_delivery() {
        let presenter = ManualPresenter::new();
        let (pipeline, slot) = pipeline(Arc::clone(&presenter));
        let sink = RecordingSink::new();
        slot.subscribe(sink.clone()).unwrap();
        let probe = SyntheticProbe::new();

        for _ in 0..3 {
            assert_eq!(
                pipeline.on_image_available(packed_image(2, 2, &probe)),
                FrameOutcome::Scheduled
            );
            presenter.run_pending();
        }

        let sequences: Vec<u64> = sink.frames().iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_rejected_delivery_releases_permit() {
        let presenter = ManualPresenter::closed();
        let (pipeline, _slot) = pipeline(presenter);
        let probe = SyntheticProbe::new();

        assert_eq!(
            pipeline.on_image_available(packed_image(2, 2, &probe)),
            FrameOutcome::Rejected
        );
        assert!(!pipeline.is_busy());
        // Not dropped: the gate is open again
        assert_eq!(
            pipeline.on_image_available(packed_image(2, 2, &probe)),
            FrameOutcome::Rejected
        );
        assert_eq!(probe.images_released(), 2);
    }

    #[test]
    fn test_panicking_subscriber_releases_permit() {
        let presenter = ManualPresenter::new();
        let (pipeline, slot) = pipeline(Arc::clone(&presenter));
        slot.subscribe(RecordingSink::panicking()).unwrap();
        let probe = SyntheticProbe::new();

        pipeline.on_image_available(packed_image(2, 2, &probe));
        let task = presenter.take_next().unwrap();
        assert!(panic::catch_unwind(AssertUnwindSafe(task)).is_err());

        assert!(!pipeline.is_busy());
        assert_eq!(
            pipeline.on_image_available(packed_image(2, 2, &probe)),
            FrameOutcome::Scheduled
        );
    }

    #[test]
    fn test_unreadable_image_is_skipped_and_released() {
        let presenter = ManualPresenter::new();
        let (pipeline, _slot) = pipeline(Arc::clone(&presenter));
        let probe = SyntheticProbe::new();

        assert_eq!(
            pipeline.on_image_available(invalid_image(&probe)),
            FrameOutcome::Skipped
        );
        assert!(!pipeline.is_busy());
        assert_eq!(presenter.pending(), 0);
        assert_eq!(probe.images_released(), 1);
        assert_eq!(pipeline.stats().snapshot().transient_errors, 1);
    }

    #[test]
    fn test_padded_image_is_delivered_packed() {
        let presenter = ManualPresenter::new();
        let (pipeline, slot) = pipeline(Arc::clone(&presenter));
        let sink = RecordingSink::new();
        slot.subscribe(sink.clone()).unwrap();
        let probe = SyntheticProbe::new();

        pipeline.on_image_available(padded_image(3, 2, 8, &probe));
        presenter.run_pending();

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_valid());
        assert_eq!(frames[0].bytes.len(), 3 * 2 * 4);
        assert!(!frames[0].bytes.contains(&0xEE));
    }

    #[test]
    fn test_frame_without_subscriber_is_discarded() {
        let presenter = ManualPresenter::new();
        let (pipeline, _slot) = pipeline(Arc::clone(&presenter));
        let probe = SyntheticProbe::new();

        assert_eq!(
            pipeline.on_image_available(packed_image(2, 2, &probe)),
            FrameOutcome::Scheduled
        );
        presenter.run_pending();

        assert!(!pipeline.is_busy());
        assert_eq!(pipeline.stats().snapshot().delivered_frames, 0);
    }

    #[test]
    fn test_unsubscribe_before_delivery_discards_frame() {
        let presenter = ManualPresenter::new();
        let (pipeline, slot) = pipeline(Arc::clone(&presenter));
        let sink = RecordingSink::new();
        slot.subscribe(sink.clone()).unwrap();
        let probe = SyntheticProbe::new();

        pipeline.on_image_available(packed_image(2, 2, &probe));
        slot.unsubscribe();
        presenter.run_pending();

        assert_eq!(sink.frame_count(), 0);
        assert!(!pipeline.is_busy());
    }
}
