// Event bridge between the capture core and the webview

use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Emitter};
use tracing::warn;

use crate::capture::{Frame, FramePayload, FrameSink};
use crate::config::OverlayStyle;
use crate::error::OverlayError;
use crate::overlay::{OverlayRegion, OverlaySurface};

pub const FRAME_EVENT: &str = "screen-frame";
pub const END_OF_STREAM_EVENT: &str = "screen-end-of-stream";
pub const OVERLAY_ADDED_EVENT: &str = "overlay-added";
pub const OVERLAY_UPDATED_EVENT: &str = "overlay-updated";
pub const OVERLAY_REMOVED_EVENT: &str = "overlay-removed";

/// Frame subscriber that forwards frames to the webview
pub struct WebviewFrameSink {
    app: AppHandle,
}

impl WebviewFrameSink {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl FrameSink for WebviewFrameSink {
    fn on_frame(&self, frame: Frame) {
        let payload = FramePayload::from(&frame);
        if let Err(e) = self.app.emit(FRAME_EVENT, payload) {
            warn!(error = %e, sequence = frame.sequence, "Failed to emit frame");
        }
    }

    fn end_of_stream(&self) {
        if let Err(e) = self.app.emit(END_OF_STREAM_EVENT, ()) {
            warn!(error = %e, "Failed to emit end of stream");
        }
    }
}

/// Overlay view owned by the webview, addressed by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebviewOverlayId(u64);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OverlayEvent<'a> {
    id: WebviewOverlayId,
    region: OverlayRegion,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a OverlayStyle>,
}

/// Overlay surface drawn by the webview
///
/// The frontend positions each view absolutely, anchored top-left.
pub struct WebviewOverlaySurface {
    app: AppHandle,
    next_id: u64,
}

impl WebviewOverlaySurface {
    pub fn new(app: AppHandle) -> Self {
        Self { app, next_id: 1 }
    }

    fn emit(&self, event: &str, payload: OverlayEvent<'_>) -> Result<(), OverlayError> {
        self.app
            .emit(event, payload)
            .map_err(|e| OverlayError::Surface(format!("Failed to emit {}: {}", event, e)))
    }
}

impl OverlaySurface for WebviewOverlaySurface {
    type View = WebviewOverlayId;

    fn add_view(
        &mut self,
        style: &OverlayStyle,
        region: &OverlayRegion,
    ) -> Result<WebviewOverlayId, OverlayError> {
        let id = WebviewOverlayId(self.next_id);
        self.emit(
            OVERLAY_ADDED_EVENT,
            OverlayEvent {
                id,
                region: *region,
                style: Some(style),
            },
        )?;
        self.next_id += 1;
        Ok(id)
    }

    fn update_view_layout(
        &mut self,
        view: &WebviewOverlayId,
        region: &OverlayRegion,
    ) -> Result<(), OverlayError> {
        self.emit(
            OVERLAY_UPDATED_EVENT,
            OverlayEvent {
                id: *view,
                region: *region,
                style: None,
            },
        )
    }

    fn remove_view(&mut self, view: WebviewOverlayId) {
        let removed = self.emit(
            OVERLAY_REMOVED_EVENT,
            OverlayEvent {
                id: view,
                region: OverlayRegion::PLACEHOLDER,
                style: None,
            },
        );
        if let Err(e) = removed {
            warn!(error = %e, "Overlay removal not delivered");
        }
    }
}
