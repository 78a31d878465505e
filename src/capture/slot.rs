// Single-subscriber slot with a once-only end-of-stream

use std::sync::{Arc, Mutex};

use super::frame::{Frame, FrameSink};
use crate::dispatch::lock;
use crate::error::CaptureError;

struct SlotState {
    sink: Option<Arc<dyn FrameSink>>,
    closed: bool,
}

/// Holds at most one sink; no frames are queued here
///
/// The sink is read at delivery time, so a frame scheduled before an
/// unsubscribe is discarded rather than delivered to a stale sink.
pub struct SubscriberSlot {
    state: Mutex<SlotState>,
}

impl SubscriberSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                sink: None,
                closed: false,
            }),
        }
    }

    /// Replaces the current sink
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) -> Result<(), CaptureError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(CaptureError::SessionClosed);
        }
        state.sink = Some(sink);
        Ok(())
    }

    /// Clears the sink; returns whether one was set
    pub fn unsubscribe(&self) -> bool {
        lock(&self.state).sink.take().is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Hands `frame` to the current sink, if any and if the slot is open
    pub fn deliver(&self, frame: Frame) -> bool {
        let sink = {
            let state = lock(&self.state);
            if state.closed {
                return false;
            }
            state.sink.clone()
        };

        match sink {
            Some(sink) => {
                sink.on_frame(frame);
                true
            }
            None => false,
        }
    }

    /// Closes the slot and detaches the current sink
    ///
    /// Only the first call returns the end-of-stream notice.
    pub fn close(&self) -> Option<EndOfStream> {
        let mut state = lock(&self.state);
        if state.closed {
            return None;
        }
        state.closed = true;
        Some(EndOfStream {
            sink: state.sink.take(),
        })
    }
}

impl Default for SubscriberSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending end-of-stream for the sink that was current when the slot closed
///
/// Fires on `send` or, failing that, when dropped.
pub struct EndOfStream {
    sink: Option<Arc<dyn FrameSink>>,
}

impl EndOfStream {
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn send(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.end_of_stream();
        }
    }
}

impl Drop for EndOfStream {
    fn drop(&mut self) {
        self.fire();
    }
}
