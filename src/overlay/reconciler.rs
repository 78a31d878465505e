// Incremental overlay reconciliation
//
// Handles are bound to list positions. Growing the list adds views at the
// tail, shrinking removes views from the tail, and every surviving handle
// is moved in place. A handle that keeps its index keeps its view.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use super::region::OverlayRegion;
use super::OverlaySurface;
use crate::config::OverlayStyle;
use crate::error::OverlayError;

/// Stable identity of one overlay handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayId(u64);

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay-{}", self.0)
    }
}

/// A live overlay view bound to one list position
#[derive(Debug)]
pub struct OverlayHandle<V> {
    id: OverlayId,
    view: V,
    region: OverlayRegion,
}

impl<V> OverlayHandle<V> {
    pub fn id(&self) -> OverlayId {
        self.id
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Geometry last applied to the view
    pub fn region(&self) -> OverlayRegion {
        self.region
    }
}

/// Surface operations performed by one `apply`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub created: usize,
    pub destroyed: usize,
    pub updated: usize,
}

impl ReconcileReport {
    /// Views added or removed; zero when the list length is unchanged
    pub fn churn(&self) -> usize {
        self.created + self.destroyed
    }
}

/// Owns the overlay handles drawn on one surface
pub struct OverlayReconciler<S: OverlaySurface> {
    surface: S,
    style: OverlayStyle,
    handles: Vec<OverlayHandle<S::View>>,
    next_id: u64,
}

impl<S: OverlaySurface> OverlayReconciler<S> {
    pub fn new(surface: S, style: OverlayStyle) -> Self {
        Self {
            surface,
            style,
            handles: Vec::new(),
            next_id: 1,
        }
    }

    /// Brings the handles in line with `regions`
    ///
    /// Negative sizes are rejected before anything changes. When the surface
    /// refuses a new view or a layout update, the views added by this call
    /// are removed again. Handles that existed before the call keep whatever
    /// layout updates already went through.
    pub fn apply(&mut self, regions: &[OverlayRegion]) -> Result<ReconcileReport, OverlayError> {
        for (index, region) in regions.iter().enumerate() {
            region.validate(index)?;
        }

        let mut report = ReconcileReport::default();
        let current = self.handles.len();

        if regions.len() > current {
            self.grow(regions.len() - current)?;
            report.created = regions.len() - current;
        } else if regions.len() < current {
            report.destroyed = self.truncate(regions.len());
        }

        let mut failed = None;
        for (handle, region) in self.handles.iter_mut().zip(regions) {
            if handle.region == *region {
                continue;
            }
            if let Err(e) = self.surface.update_view_layout(&handle.view, region) {
                failed = Some(e);
                break;
            }
            handle.region = *region;
            report.updated += 1;
        }

        if let Some(e) = failed {
            warn!(error = %e, "overlay layout update failed, rolling back new views");
            self.truncate(current.min(regions.len()));
            return Err(e);
        }

        debug!(
            overlays = self.handles.len(),
            created = report.created,
            destroyed = report.destroyed,
            updated = report.updated,
            "overlays reconciled"
        );
        Ok(report)
    }

    fn grow(&mut self, count: usize) -> Result<(), OverlayError> {
        let start = self.handles.len();

        for _ in 0..count {
            match self
                .surface
                .add_view(&self.style, &OverlayRegion::PLACEHOLDER)
            {
                Ok(view) => {
                    let id = OverlayId(self.next_id);
                    self.next_id += 1;
                    self.handles.push(OverlayHandle {
                        id,
                        view,
                        region: OverlayRegion::PLACEHOLDER,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "overlay surface refused a view, rolling back");
                    self.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Removes handles from the tail down to `len`; returns how many went
    fn truncate(&mut self, len: usize) -> usize {
        let mut removed = 0;
        while self.handles.len() > len {
            if let Some(handle) = self.handles.pop() {
                self.surface.remove_view(handle.view);
                removed += 1;
            }
        }
        removed
    }

    /// Removes every overlay; returns how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.truncate(0);
        if removed > 0 {
            debug!(removed, "overlays cleared");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[OverlayHandle<S::View>] {
        &self.handles
    }

    pub fn ids(&self) -> Vec<OverlayId> {
        self.handles.iter().map(|h| h.id).collect()
    }

    /// Geometry of every overlay in list order
    pub fn regions(&self) -> Vec<OverlayRegion> {
        self.handles.iter().map(|h| h.region).collect()
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

impl<S: OverlaySurface> Drop for OverlayReconciler<S> {
    fn drop(&mut self) {
        self.clear();
    }
}
