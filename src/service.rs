// Command surface over capture sessions and redaction overlays
//
// Holds at most one live session. Starting a new one stops the previous
// session first, and every session that ends takes the overlays with it.
// Overlay work always runs on the presentation context; callers get a
// receiver for its outcome.

use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::capture::{CaptureSession, FrameSink, PipelineMetrics, SessionState, StopReason};
use crate::config::ServiceConfig;
use crate::dispatch::{lock, run_on, Presenter, Task};
use crate::error::{CaptureError, OverlayError};
use crate::overlay::{OverlayReconciler, OverlayRegion, OverlaySurface, ReconcileReport};
use crate::platform::{CaptureBackend, GrantToken};

/// Outcome of overlay work queued on the presentation context
pub type OverlayReply<T> = oneshot::Receiver<Result<T, OverlayError>>;

type SharedOverlays<S> = Arc<Mutex<OverlayReconciler<S>>>;

/// Capture and overlay entry points for a host application
pub struct CaptureService<B: CaptureBackend, S: OverlaySurface> {
    backend: Arc<B>,
    presenter: Arc<dyn Presenter>,
    config: ServiceConfig,
    current: Mutex<Option<CaptureSession<B::Source>>>,
    overlays: SharedOverlays<S>,
}

impl<B, S> CaptureService<B, S>
where
    B: CaptureBackend,
    S: OverlaySurface + 'static,
{
    pub fn new(
        backend: Arc<B>,
        presenter: Arc<dyn Presenter>,
        surface: S,
        config: ServiceConfig,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        let overlays = OverlayReconciler::new(surface, config.overlay.clone());

        Ok(Self {
            backend,
            presenter,
            config,
            current: Mutex::new(None),
            overlays: Arc::new(Mutex::new(overlays)),
        })
    }

    /// Starts capturing with `grant`, replacing any running session
    pub fn start(&self, grant: &GrantToken) -> Result<CaptureSession<B::Source>, CaptureError> {
        let mut current = lock(&self.current);

        if let Some(previous) = current.take() {
            if !previous.state().is_terminal() {
                info!(session = %previous.id(), "Replacing running capture session");
                previous.stop_with(StopReason::Replaced);
            }
        }

        let session = CaptureSession::new(Arc::clone(&self.presenter), self.config.capture.clone());
        let overlays: Weak<Mutex<OverlayReconciler<S>>> = Arc::downgrade(&self.overlays);
        let presenter = Arc::clone(&self.presenter);
        session.on_stopped(move |state, reason| {
            let task: Task = Box::new(move || {
                if let Some(overlays) = overlays.upgrade() {
                    let removed = lock(&overlays).clear();
                    debug!(?state, ?reason, removed, "Overlays cleared with session");
                }
            });
            if let Err(e) = run_on(presenter.as_ref(), task) {
                warn!(error = %e, "Overlays left in place, presentation context closed");
            }
        });

        session.request()?;
        session.activate(self.backend.as_ref(), grant)?;

        *current = Some(session.clone());
        Ok(session)
    }

    /// Stops the current session, if any; safe to repeat
    pub fn stop(&self) {
        let session = lock(&self.current).take();
        if let Some(session) = session {
            session.stop();
        }
    }

    pub fn current_session(&self) -> Option<CaptureSession<B::Source>> {
        lock(&self.current).clone()
    }

    /// State of the current session; Idle when none was started
    pub fn session_state(&self) -> SessionState {
        self.current_session()
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn metrics(&self) -> Option<PipelineMetrics> {
        self.current_session().map(|s| s.metrics())
    }

    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) -> Result<(), CaptureError> {
        self.current_session()
            .ok_or(CaptureError::SessionClosed)?
            .subscribe(sink)
    }

    /// Detaches the current sink; returns whether one was attached
    pub fn unsubscribe(&self) -> bool {
        self.current_session()
            .map(|session| session.unsubscribe())
            .unwrap_or(false)
    }

    /// Queues a reconciliation of the overlays against `regions`
    ///
    /// Regions are validated here, so a negative size fails before anything
    /// is queued.
    pub fn apply_overlays(
        &self,
        regions: Vec<OverlayRegion>,
    ) -> Result<OverlayReply<ReconcileReport>, OverlayError> {
        for (index, region) in regions.iter().enumerate() {
            region.validate(index)?;
        }

        self.post_overlay_work(move |overlays| overlays.apply(&regions))
    }

    /// Same as [`apply_overlays`](Self::apply_overlays) for an untyped box list
    pub fn apply_overlays_json(
        &self,
        value: &Value,
    ) -> Result<OverlayReply<ReconcileReport>, OverlayError> {
        self.apply_overlays(OverlayRegion::list_from_json(value))
    }

    /// Queues removal of every overlay; the reply carries how many went
    pub fn clear_overlays(&self) -> Result<OverlayReply<usize>, OverlayError> {
        self.post_overlay_work(|overlays| Ok(overlays.clear()))
    }

    fn post_overlay_work<T, F>(&self, work: F) -> Result<OverlayReply<T>, OverlayError>
    where
        T: Send + 'static,
        F: FnOnce(&mut OverlayReconciler<S>) -> Result<T, OverlayError> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let overlays = Arc::clone(&self.overlays);

        let task: Task = Box::new(move || {
            let outcome = work(&mut lock(&overlays));
            if let Err(e) = &outcome {
                warn!(error = %e, "Overlay update failed");
            }
            // The caller may have stopped waiting
            let _ = reply.send(outcome);
        });

        run_on(self.presenter.as_ref(), task).map_err(|_| OverlayError::DispatchClosed)?;
        Ok(receiver)
    }

    pub fn overlay_count(&self) -> usize {
        lock(&self.overlays).len()
    }

    /// Runs `f` against the overlay surface
    pub fn with_overlay_surface<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(lock(&self.overlays).surface())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

impl<B: CaptureBackend, S: OverlaySurface> Drop for CaptureService<B, S> {
    fn drop(&mut self) {
        let session = lock(&self.current).take();
        if let Some(session) = session {
            session.stop();
        }
    }
}
