// Software overlay surface that paints redaction boxes onto RGBA images

use image::{ImageBuffer, Pixel, Rgba};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use super::region::OverlayRegion;
use super::OverlaySurface;
use crate::config::OverlayStyle;
use crate::error::OverlayError;

/// Handle to a view attached to a [`MaskLayer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaskViewId(u64);

/// Running totals of operations performed on a surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceOps {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
struct MaskView {
    region: OverlayRegion,
    fill: Rgba<u8>,
    // Kept for hosts that draw text; not rasterized here
    label: String,
}

/// In-memory overlay layer
///
/// Views are painted in the order they were added.
#[derive(Debug, Default)]
pub struct MaskLayer {
    views: BTreeMap<MaskViewId, MaskView>,
    next_id: u64,
    ops: SurfaceOps,
}

impl MaskLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn contains(&self, view: MaskViewId) -> bool {
        self.views.contains_key(&view)
    }

    pub fn region_of(&self, view: MaskViewId) -> Option<OverlayRegion> {
        self.views.get(&view).map(|v| v.region)
    }

    pub fn label_of(&self, view: MaskViewId) -> Option<&str> {
        self.views.get(&view).map(|v| v.label.as_str())
    }

    pub fn ops(&self) -> SurfaceOps {
        self.ops
    }

    /// Blends every view's fill into `image`, clipped to its bounds
    pub fn composite<C>(&self, image: &mut ImageBuffer<Rgba<u8>, C>)
    where
        C: Deref<Target = [u8]> + DerefMut,
    {
        let (width, height) = image.dimensions();

        for view in self.views.values() {
            let Some((x0, y0, w, h)) = view.region.clip(width, height) else {
                continue;
            };
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    image.get_pixel_mut(x, y).blend(&view.fill);
                }
            }
        }
    }
}

impl OverlaySurface for MaskLayer {
    type View = MaskViewId;

    fn add_view(
        &mut self,
        style: &OverlayStyle,
        region: &OverlayRegion,
    ) -> Result<MaskViewId, OverlayError> {
        let id = MaskViewId(self.next_id);
        self.next_id += 1;
        self.views.insert(
            id,
            MaskView {
                region: *region,
                fill: Rgba(style.fill_rgba()),
                label: style.label.clone(),
            },
        );
        self.ops.added += 1;
        Ok(id)
    }

    fn update_view_layout(
        &mut self,
        view: &MaskViewId,
        region: &OverlayRegion,
    ) -> Result<(), OverlayError> {
        let entry = self
            .views
            .get_mut(view)
            .ok_or_else(|| OverlayError::Surface(format!("unknown view {:?}", view)))?;
        entry.region = *region;
        self.ops.updated += 1;
        Ok(())
    }

    fn remove_view(&mut self, view: MaskViewId) {
        if self.views.remove(&view).is_some() {
            self.ops.removed += 1;
        }
    }
}
