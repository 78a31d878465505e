// Tauri command surface
//
// Desktop hosts have no system capture grant flow, so the shell drives the
// synthetic backend sized to the primary monitor.

pub mod capture;
pub mod events;
pub mod presenter;

use std::sync::Arc;
use tauri::AppHandle;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::CaptureError;
use crate::platform::synthetic::SyntheticBackend;
use crate::platform::DisplayMetrics;
use crate::service::CaptureService;
use capture::SharedCaptureService;
use events::WebviewOverlaySurface;
use presenter::TauriPresenter;

const FALLBACK_METRICS: DisplayMetrics = DisplayMetrics {
    width_pixels: 1280,
    height_pixels: 720,
    density_dpi: 96,
};

fn primary_display_metrics(app: &AppHandle) -> DisplayMetrics {
    match app.primary_monitor() {
        Ok(Some(monitor)) => {
            let size = monitor.size();
            DisplayMetrics::new(
                size.width,
                size.height,
                (monitor.scale_factor() * 96.0).round() as u32,
            )
        }
        Ok(None) => FALLBACK_METRICS,
        Err(e) => {
            warn!(error = %e, "Could not query primary monitor");
            FALLBACK_METRICS
        }
    }
}

/// Builds the managed capture service; call from the `setup` hook
pub fn build_service(app: &AppHandle) -> Result<SharedCaptureService, CaptureError> {
    let metrics = primary_display_metrics(app);
    info!(
        width = metrics.width_pixels,
        height = metrics.height_pixels,
        "Capture service using synthetic display"
    );

    let service = CaptureService::new(
        Arc::new(SyntheticBackend::new(metrics)),
        Arc::new(TauriPresenter::new(app.clone())),
        WebviewOverlaySurface::new(app.clone()),
        ServiceConfig::default(),
    )?;
    Ok(Arc::new(service))
}
