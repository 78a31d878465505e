// Capture session lifecycle
//
// Idle -> Requested -> Active -> Stopping -> Stopped
//            |            \-> Error (setup failure, terminal)
//            \-> Stopped (grant denied)
//
// A session owns the capture source, the acquisition surface, the virtual
// display and the worker thread while Active, and releases them on the way
// to a terminal state. Stop may arrive from the caller, from the platform
// revoking the source, or from a setup failure, on any thread.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{error, info, warn};

use super::frame::FrameSink;
use super::pipeline::{CapturePipeline, CaptureWorker};
use super::slot::SubscriberSlot;
use super::stats::{PipelineMetrics, PipelineStats};
use crate::config::CaptureConfig;
use crate::dispatch::{lock, run_on, Presenter};
use crate::error::CaptureError;
use crate::platform::{CaptureBackend, CaptureSource, GrantToken, TerminationSignal};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Current status of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Requested,
    Active,
    Stopping,
    Stopped,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }

    /// Check if transition to a new state is valid
    pub fn can_transition_to(&self, next: SessionState) -> Result<(), CaptureError> {
        use SessionState::*;

        match (self, next) {
            (Idle, Requested)
            | (Requested, Active)
            | (Requested, Stopped)
            | (Requested, Error)
            | (Idle, Stopping)
            | (Requested, Stopping)
            | (Active, Stopping)
            | (Stopping, Stopped) => Ok(()),
            (from, to) => Err(CaptureError::InvalidTransition { from: *from, to }),
        }
    }
}

/// Why a session left its running states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// The caller asked to stop
    Requested,
    /// The platform revoked the capture source
    ExternalTermination,
    /// The grant was refused
    PermissionDenied,
    /// Surface or virtual display setup failed
    SetupFailed,
    /// A newer session took over the display
    Replaced,
}

/// Identifier of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Called once when the session reaches a terminal state
pub type StopListener = Box<dyn FnOnce(SessionState, StopReason) + Send>;

/// Platform resources held while a session is set up or active
struct Resources<C: CaptureSource> {
    source: C,
    surface: Option<Arc<C::Surface>>,
    display: Option<C::Display>,
    worker: Option<CaptureWorker>,
}

impl<C: CaptureSource> Resources<C> {
    /// Releases in dependency order: the worker stops before its surface goes away
    fn release(self) {
        let Resources {
            mut source,
            surface,
            display,
            worker,
        } = self;

        if let Some(mut worker) = worker {
            worker.shutdown();
        }
        drop(display);
        drop(surface);
        source.stop();
    }
}

struct Core<C: CaptureSource> {
    state: SessionState,
    stop_reason: Option<StopReason>,
    resources: Option<Resources<C>>,
    listeners: Vec<StopListener>,
}

struct Shared<C: CaptureSource> {
    id: SessionId,
    core: Mutex<Core<C>>,
    slot: Arc<SubscriberSlot>,
    presenter: Arc<dyn Presenter>,
    stats: Arc<PipelineStats>,
    config: CaptureConfig,
}

/// Handle to a capture session; clones refer to the same session
pub struct CaptureSession<C: CaptureSource> {
    shared: Arc<Shared<C>>,
}

impl<C: CaptureSource> Clone for CaptureSession<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: CaptureSource> CaptureSession<C> {
    /// Creates an Idle session delivering on `presenter`
    pub fn new(presenter: Arc<dyn Presenter>, config: CaptureConfig) -> Self {
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));

        Self {
            shared: Arc::new(Shared {
                id,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    stop_reason: None,
                    resources: None,
                    listeners: Vec::new(),
                }),
                slot: Arc::new(SubscriberSlot::new()),
                presenter,
                stats: Arc::new(PipelineStats::new()),
                config,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.core).state
    }

    /// Why the session ended, once it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        lock(&self.shared.core).stop_reason
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.shared.stats.snapshot()
    }

    /// Marks the permission request as in progress
    pub fn request(&self) -> Result<(), CaptureError> {
        let mut core = lock(&self.shared.core);
        core.state.can_transition_to(SessionState::Requested)?;
        core.state = SessionState::Requested;
        info!(session = %self.id(), "Capture permission requested");
        Ok(())
    }

    /// Consumes the grant and brings the session up
    ///
    /// A refused grant leaves the session Stopped. A setup failure leaves it
    /// in Error after all partially acquired resources are released.
    pub fn activate<B>(&self, backend: &B, grant: &GrantToken) -> Result<(), CaptureError>
    where
        B: CaptureBackend<Source = C>,
    {
        {
            let core = lock(&self.shared.core);
            if core.state != SessionState::Requested {
                return Err(CaptureError::InvalidTransition {
                    from: core.state,
                    to: SessionState::Active,
                });
            }
        }

        let mut source = match backend.open(grant) {
            Ok(source) => source,
            Err(err @ CaptureError::PermissionDenied(_)) => {
                warn!(session = %self.id(), error = %err, "Capture grant refused");
                self.finish_without_stopping(None, SessionState::Stopped, StopReason::PermissionDenied);
                return Err(err);
            }
            Err(err) => {
                let err = into_setup_failure(err);
                error!(session = %self.id(), error = %err, "Capture source unavailable");
                self.finish_without_stopping(None, SessionState::Error, StopReason::SetupFailed);
                return Err(err);
            }
        };

        let weak: Weak<Shared<C>> = Arc::downgrade(&self.shared);
        source.on_terminated(TerminationSignal::new(move || {
            if let Some(shared) = weak.upgrade() {
                CaptureSession { shared }.stop_with(StopReason::ExternalTermination);
            }
        }));

        let mut resources = Resources {
            source,
            surface: None,
            display: None,
            worker: None,
        };

        if let Err(err) = self.bring_up(backend, &mut resources) {
            let err = into_setup_failure(err);
            error!(session = %self.id(), error = %err, "Capture setup failed");
            self.finish_without_stopping(Some(resources), SessionState::Error, StopReason::SetupFailed);
            return Err(err);
        }

        let mut core = lock(&self.shared.core);
        if core.state != SessionState::Requested {
            // Stopped or revoked while setting up
            let state = core.state;
            drop(core);
            resources.release();
            warn!(session = %self.id(), ?state, "Session ended during setup");
            return Err(CaptureError::SessionClosed);
        }

        core.state = SessionState::Active;
        core.resources = Some(resources);
        drop(core);

        let metrics = backend.display_metrics();
        info!(
            session = %self.id(),
            width = metrics.width_pixels,
            height = metrics.height_pixels,
            "Capture session active"
        );
        Ok(())
    }

    /// Allocates the surface, binds the pipeline and creates the virtual display
    fn bring_up<B>(&self, backend: &B, resources: &mut Resources<C>) -> Result<(), CaptureError>
    where
        B: CaptureBackend<Source = C>,
    {
        let config = &self.shared.config;
        let metrics = backend.display_metrics();
        metrics.validate()?;

        let surface = Arc::new(resources.source.create_surface(&metrics, config.max_images)?);
        resources.surface = Some(Arc::clone(&surface));

        let pipeline = Arc::new(CapturePipeline::new(
            Arc::clone(&self.shared.slot),
            Arc::clone(&self.shared.presenter),
            Arc::clone(&self.shared.stats),
            config.progress_log_interval,
        ));
        resources.worker = Some(CaptureWorker::spawn(
            Arc::clone(&surface),
            pipeline,
            config.acquire_timeout(),
        )?);

        let display = resources.source.create_virtual_display(
            &config.virtual_display_name,
            &metrics,
            &surface,
        )?;
        resources.display = Some(display);
        Ok(())
    }

    /// Installs the sink that receives frames
    ///
    /// Fails once the session has ended; a session the platform revoked
    /// reports `ExternalTermination`.
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) -> Result<(), CaptureError> {
        if self.shared.slot.is_closed() {
            return Err(self.closed_error());
        }
        self.shared.slot.subscribe(sink)
    }

    /// Detaches the sink; returns whether one was attached
    pub fn unsubscribe(&self) -> bool {
        self.shared.slot.unsubscribe()
    }

    fn closed_error(&self) -> CaptureError {
        match self.stop_reason() {
            Some(StopReason::ExternalTermination) => CaptureError::ExternalTermination,
            _ => CaptureError::SessionClosed,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.slot.is_subscribed()
    }

    /// Stops the session; no-op once stopping has begun
    pub fn stop(&self) {
        self.stop_with(StopReason::Requested);
    }

    pub(crate) fn stop_with(&self, reason: StopReason) {
        let resources = {
            let mut core = lock(&self.shared.core);
            if core.state.can_transition_to(SessionState::Stopping).is_err() {
                return;
            }
            core.state = SessionState::Stopping;
            core.stop_reason = Some(reason);
            core.resources.take()
        };

        info!(session = %self.id(), ?reason, "Stopping capture session");
        self.tear_down(resources);
        self.complete(Some(SessionState::Stopped), reason);
    }

    /// Registers a listener for the terminal transition
    ///
    /// Runs immediately when the session already ended.
    pub fn on_stopped<F>(&self, listener: F)
    where
        F: FnOnce(SessionState, StopReason) + Send + 'static,
    {
        let mut core = lock(&self.shared.core);
        if core.state.is_terminal() {
            let state = core.state;
            let reason = core.stop_reason.unwrap_or(StopReason::Requested);
            drop(core);
            listener(state, reason);
            return;
        }
        core.listeners.push(Box::new(listener));
    }

    /// Enters a terminal state straight from Requested
    fn finish_without_stopping(
        &self,
        resources: Option<Resources<C>>,
        final_state: SessionState,
        reason: StopReason,
    ) {
        {
            let mut core = lock(&self.shared.core);
            if core.state.can_transition_to(final_state).is_err() {
                // A concurrent stop got there first; it owns the teardown
                drop(core);
                if let Some(resources) = resources {
                    resources.release();
                }
                return;
            }
            core.state = final_state;
            core.stop_reason = Some(reason);
        }

        self.tear_down(resources);
        self.complete(None, reason);
    }

    /// Ends the stream for the current subscriber and releases resources
    fn tear_down(&self, resources: Option<Resources<C>>) {
        if let Some(notice) = self.shared.slot.close() {
            // A refused task drops the notice, which then fires here
            let delivered = run_on(
                self.shared.presenter.as_ref(),
                Box::new(move || notice.send()),
            );
            if let Err(e) = delivered {
                warn!(session = %self.id(), error = %e, "End of stream delivered off the presentation context");
            }
        }

        if let Some(resources) = resources {
            resources.release();
        }
    }

    fn complete(&self, final_state: Option<SessionState>, reason: StopReason) {
        let (state, listeners) = {
            let mut core = lock(&self.shared.core);
            if let Some(final_state) = final_state {
                core.state = final_state;
            }
            (core.state, mem::take(&mut core.listeners))
        };

        let metrics = self.metrics();
        info!(
            session = %self.id(),
            ?state,
            ?reason,
            delivered = metrics.delivered_frames,
            dropped = metrics.dropped_frames,
            "Capture session ended"
        );

        for listener in listeners {
            listener(state, reason);
        }
    }
}

fn into_setup_failure(err: CaptureError) -> CaptureError {
    match err {
        CaptureError::SetupFailed(_) => err,
        other => CaptureError::SetupFailed(other.to_string()),
    }
}

impl<C: CaptureSource> fmt::Debug for CaptureSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
