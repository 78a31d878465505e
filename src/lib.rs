pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod overlay;
pub mod platform;
pub mod service;

#[cfg(feature = "tauri-app")]
mod commands;

#[cfg(test)]
mod test_support;

pub use capture::{CaptureSession, Frame, FramePayload, FrameSink, SessionState, StopReason};
pub use config::{CaptureConfig, OverlayStyle, ServiceConfig};
pub use dispatch::{DispatchQueue, Presenter};
pub use error::{CaptureError, OverlayError};
pub use overlay::{MaskLayer, OverlayReconciler, OverlayRegion, OverlaySurface};
pub use platform::{CaptureBackend, GrantToken};
pub use service::CaptureService;

#[cfg(feature = "tauri-app")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    logging::init();

    tauri::Builder::default()
        .setup(|app| {
            let service = commands::build_service(app.handle())?;
            app.manage(service);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::capture::start_capture,
            commands::capture::stop_capture,
            commands::capture::subscribe_frames,
            commands::capture::unsubscribe_frames,
            commands::capture::get_capture_metrics,
            commands::capture::get_session_state,
            commands::capture::apply_overlays,
            commands::capture::clear_overlays
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
