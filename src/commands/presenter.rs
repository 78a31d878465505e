// Tauri main thread as the presentation context

use std::thread::{self, ThreadId};
use tauri::AppHandle;

use crate::dispatch::{Presenter, Task};
use crate::error::CaptureError;

/// Posts tasks to the Tauri event loop thread
pub struct TauriPresenter {
    app: AppHandle,
    main_thread: ThreadId,
}

impl TauriPresenter {
    /// Must be created on the main thread, e.g. from the `setup` hook
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            main_thread: thread::current().id(),
        }
    }
}

impl Presenter for TauriPresenter {
    fn post(&self, task: Task) -> Result<(), CaptureError> {
        self.app
            .run_on_main_thread(task)
            .map_err(|_| CaptureError::DispatchClosed)
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.main_thread
    }
}
