use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tauri::{AppHandle, Emitter};
use tracing::info;

use super::events::{WebviewFrameSink, WebviewOverlaySurface};
use crate::capture::{PipelineMetrics, SessionId, SessionState};
use crate::overlay::ReconcileReport;
use crate::platform::synthetic::SyntheticBackend;
use crate::platform::GrantToken;
use crate::service::CaptureService;

pub type SharedCaptureService = Arc<CaptureService<SyntheticBackend, WebviewOverlaySurface>>;

/// Returned to the frontend when a session starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
}

/// Starts capturing with the grant obtained by the frontend
#[tauri::command]
pub async fn start_capture(
    grant: GrantToken,
    app_handle: AppHandle,
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<SessionInfo, String> {
    let session = service.start(&grant).map_err(|e| e.user_message())?;

    let info = SessionInfo {
        id: session.id(),
        state: session.state(),
    };
    info!(session = %info.id, "Capture started from frontend");

    app_handle
        .emit("capture-started", &info)
        .map_err(|e| format!("Failed to emit capture-started event: {}", e))?;

    Ok(info)
}

/// Stops the current session; a no-op when none is running
#[tauri::command]
pub async fn stop_capture(
    app_handle: AppHandle,
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<(), String> {
    let metrics = service.metrics();
    service.stop();

    app_handle
        .emit("capture-stopped", metrics)
        .map_err(|e| format!("Failed to emit capture-stopped event: {}", e))?;

    Ok(())
}

/// Routes frames of the current session to the webview
#[tauri::command]
pub async fn subscribe_frames(
    app_handle: AppHandle,
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<(), String> {
    service
        .subscribe(Arc::new(WebviewFrameSink::new(app_handle)))
        .map_err(|e| e.user_message())
}

#[tauri::command]
pub async fn unsubscribe_frames(
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<(), String> {
    service.unsubscribe();
    Ok(())
}

#[tauri::command]
pub async fn get_capture_metrics(
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<Option<PipelineMetrics>, String> {
    Ok(service.metrics())
}

#[tauri::command]
pub async fn get_session_state(
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<SessionState, String> {
    Ok(service.session_state())
}

/// Replaces the redaction overlays with `regions`, a `[{x, y, w, h}]` list
#[tauri::command]
pub async fn apply_overlays(
    regions: Value,
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<ReconcileReport, String> {
    let reply = service
        .apply_overlays_json(&regions)
        .map_err(|e| e.to_string())?;

    reply
        .await
        .map_err(|_| "Overlay update was dropped".to_string())?
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn clear_overlays(
    service: tauri::State<'_, SharedCaptureService>,
) -> Result<usize, String> {
    let reply = service.clear_overlays().map_err(|e| e.to_string())?;

    reply
        .await
        .map_err(|_| "Overlay clear was dropped".to_string())?
        .map_err(|e| e.to_string())
}
