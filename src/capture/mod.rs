// Screen capture core
//
// This module turns images pulled from a platform acquisition surface into
// packed RGBA frames and hands them, one at a time, to a single subscriber
// on the presentation context.

pub mod frame;
pub mod pipeline;
pub mod repacker;
pub mod session;
pub mod slot;
pub mod stats;

pub use frame::{Frame, FrameMetadata, FramePayload, FrameSink, BYTES_PER_PIXEL};
pub use pipeline::{CapturePipeline, CaptureWorker, FrameOutcome};
pub use repacker::{check_plane, repack};
pub use session::{CaptureSession, SessionId, SessionState, StopReason};
pub use slot::{EndOfStream, SubscriberSlot};
pub use stats::{PipelineMetrics, PipelineStats};
