// Shared helpers for unit tests

use chrono::Utc;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::capture::{Frame, FrameSink, BYTES_PER_PIXEL};
use crate::dispatch::{lock, Presenter, Task};
use crate::error::CaptureError;
use crate::platform::synthetic::{SyntheticImage, SyntheticProbe, PADDING_BYTE};

/// Presenter whose tasks only run when the test says so
pub(crate) struct ManualPresenter {
    tasks: Mutex<VecDeque<Task>>,
    closed: AtomicBool,
}

impl ManualPresenter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// A presenter that rejects every task
    pub(crate) fn closed() -> Arc<Self> {
        let presenter = Self::new();
        presenter.closed.store(true, Ordering::SeqCst);
        presenter
    }

    pub(crate) fn pending(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub(crate) fn take_next(&self) -> Option<Task> {
        lock(&self.tasks).pop_front()
    }

    /// Runs queued tasks, including ones they queue; returns how many ran
    pub(crate) fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.take_next() {
            let _ = panic::catch_unwind(AssertUnwindSafe(task));
            ran += 1;
        }
        ran
    }
}

impl Presenter for ManualPresenter {
    fn post(&self, task: Task) -> Result<(), CaptureError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CaptureError::DispatchClosed);
        }
        lock(&self.tasks).push_back(task);
        Ok(())
    }
}

/// Sink that records everything it receives
#[derive(Default)]
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
    end_of_stream: AtomicUsize,
    panic_on_frame: bool,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_on_frame: true,
            ..Default::default()
        })
    }

    pub(crate) fn frames(&self) -> Vec<Frame> {
        lock(&self.frames).clone()
    }

    pub(crate) fn frame_count(&self) -> usize {
        lock(&self.frames).len()
    }

    pub(crate) fn end_of_stream_count(&self) -> usize {
        self.end_of_stream.load(Ordering::SeqCst)
    }
}

impl FrameSink for RecordingSink {
    fn on_frame(&self, frame: Frame) {
        if self.panic_on_frame {
            panic!("subscriber failed on frame {}", frame.sequence);
        }
        lock(&self.frames).push(frame);
    }

    fn end_of_stream(&self) {
        self.end_of_stream.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn test_frame(sequence: u64) -> Frame {
    Frame {
        bytes: vec![0; 2 * 2 * BYTES_PER_PIXEL],
        width: 2,
        height: 2,
        sequence,
        captured_at: Utc::now(),
    }
}

pub(crate) fn padded_image(
    width: u32,
    height: u32,
    padding: usize,
    probe: &Arc<SyntheticProbe>,
) -> SyntheticImage {
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let row_stride = row_bytes + padding;
    let mut data = vec![PADDING_BYTE; row_stride * height as usize];
    for row in data.chunks_mut(row_stride) {
        row[..row_bytes].fill(0x11);
    }
    SyntheticImage::from_parts(data, width, height, row_stride, false, probe)
}

pub(crate) fn packed_image(width: u32, height: u32, probe: &Arc<SyntheticProbe>) -> SyntheticImage {
    padded_image(width, height, 0, probe)
}

pub(crate) fn invalid_image(probe: &Arc<SyntheticProbe>) -> SyntheticImage {
    SyntheticImage::from_parts(Vec::new(), 2, 2, 8, true, probe)
}

/// Polls `condition` until it holds or two seconds pass
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
