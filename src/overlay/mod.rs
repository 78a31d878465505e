// Redaction overlays
//
// A reconciler keeps one overlay per caller-supplied region on a shared
// overlay surface, reusing existing overlays across updates.

pub mod mask;
pub mod reconciler;
pub mod region;

pub use mask::{MaskLayer, MaskViewId, SurfaceOps};
pub use reconciler::{OverlayHandle, OverlayId, OverlayReconciler, ReconcileReport};
pub use region::OverlayRegion;

use crate::config::OverlayStyle;
use crate::error::OverlayError;

/// Shared layer that overlay views are attached to
///
/// Views are anchored at their top-left corner.
pub trait OverlaySurface: Send {
    type View: Send;

    /// Attaches a new view at `region`
    fn add_view(&mut self, style: &OverlayStyle, region: &OverlayRegion)
        -> Result<Self::View, OverlayError>;

    /// Moves or resizes an attached view in place
    fn update_view_layout(
        &mut self,
        view: &Self::View,
        region: &OverlayRegion,
    ) -> Result<(), OverlayError>;

    /// Detaches a view
    fn remove_view(&mut self, view: Self::View);
}
