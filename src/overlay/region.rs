// Redaction region geometry and parsing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::OverlayError;

/// A rectangle in screen coordinates; identity is its position in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OverlayRegion {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl OverlayRegion {
    /// Geometry a freshly created overlay starts with
    pub const PLACEHOLDER: OverlayRegion = OverlayRegion {
        x: 0,
        y: 0,
        w: 0,
        h: 0,
    };

    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Rejects negative sizes; `index` is the region's list position
    pub fn validate(&self, index: usize) -> Result<(), OverlayError> {
        if self.w < 0 || self.h < 0 {
            return Err(OverlayError::InvalidRegion {
                index,
                reason: format!("negative size {}x{}", self.w, self.h),
            });
        }
        Ok(())
    }

    /// Reads one `{x, y, w, h}` object with numeric fields
    ///
    /// Fractional values are truncated toward zero. Returns `None` for
    /// anything else.
    pub fn from_json_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let field = |name: &str| -> Option<i32> {
            let number = object.get(name)?;
            match number.as_i64() {
                Some(n) => i32::try_from(n).ok(),
                None => {
                    let f = number.as_f64()?;
                    if f.is_finite() && f >= i32::MIN as f64 && f <= i32::MAX as f64 {
                        Some(f as i32)
                    } else {
                        None
                    }
                }
            }
        };

        Some(Self {
            x: field("x")?,
            y: field("y")?,
            w: field("w")?,
            h: field("h")?,
        })
    }

    /// Parses a list of regions, dropping malformed entries
    ///
    /// A value that is not an array yields an empty list.
    pub fn list_from_json(value: &Value) -> Vec<Self> {
        let Some(entries) = value.as_array() else {
            debug!("overlay payload is not an array");
            return Vec::new();
        };

        let regions: Vec<Self> = entries.iter().filter_map(Self::from_json_value).collect();
        if regions.len() != entries.len() {
            debug!(
                dropped = entries.len() - regions.len(),
                "malformed overlay regions ignored"
            );
        }
        regions
    }

    /// Intersection with a `width` x `height` canvas as `(x, y, w, h)`
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.w <= 0 || self.h <= 0 {
            return None;
        }

        let left = i64::from(self.x).max(0);
        let top = i64::from(self.y).max(0);
        let right = (i64::from(self.x) + i64::from(self.w)).min(i64::from(width));
        let bottom = (i64::from(self.y) + i64::from(self.h)).min(i64::from(height));

        if left >= right || top >= bottom {
            return None;
        }

        Some((
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}
