// Runtime configuration for capture sessions and redaction overlays

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CaptureError;

/// Capture pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Maximum images the acquisition surface holds at once
    pub max_images: usize,
    /// How long the worker waits for an image before re-checking for shutdown
    pub acquire_timeout_ms: u64,
    /// Name given to the virtual display
    pub virtual_display_name: String,
    /// Log pipeline progress every N delivered frames (0 disables)
    pub progress_log_interval: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_images: 3,
            acquire_timeout_ms: 100,
            virtual_display_name: "ScreenCapture".to_string(),
            progress_log_interval: 30,
        }
    }
}

impl CaptureConfig {
    /// Create a new configuration builder
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::new()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate this configuration
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.max_images == 0 {
            return Err(CaptureError::InvalidConfig(
                "max_images must be greater than 0".to_string(),
            ));
        }

        if self.max_images > 16 {
            return Err(CaptureError::InvalidConfig(
                "max_images must not exceed 16".to_string(),
            ));
        }

        if self.acquire_timeout_ms == 0 || self.acquire_timeout_ms > 5_000 {
            return Err(CaptureError::InvalidConfig(
                "acquire_timeout_ms must be between 1 and 5000".to_string(),
            ));
        }

        if self.virtual_display_name.trim().is_empty() {
            return Err(CaptureError::InvalidConfig(
                "virtual_display_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for CaptureConfig
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CaptureConfig::default(),
        }
    }

    pub fn max_images(mut self, max_images: usize) -> Self {
        self.config.max_images = max_images;
        self
    }

    pub fn acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.config.acquire_timeout_ms = ms;
        self
    }

    pub fn virtual_display_name(mut self, name: impl Into<String>) -> Self {
        self.config.virtual_display_name = name.into();
        self
    }

    pub fn progress_log_interval(mut self, frames: u64) -> Self {
        self.config.progress_log_interval = frames;
        self
    }

    pub fn build(self) -> Result<CaptureConfig, CaptureError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CaptureConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Presentation of a single redaction overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayStyle {
    /// Fill color as 0xAARRGGBB
    pub fill_argb: u32,
    /// Label centered in the overlay
    pub label: String,
    /// Label color as 0xAARRGGBB
    pub text_argb: u32,
    /// Label size in scale-independent pixels
    pub text_size_sp: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            fill_argb: 0xCC00_0000,
            label: "Content blocked".to_string(),
            text_argb: 0xFFFF_FFFF,
            text_size_sp: 18.0,
        }
    }
}

impl OverlayStyle {
    /// Fill color as RGBA bytes
    pub fn fill_rgba(&self) -> [u8; 4] {
        let [a, r, g, b] = self.fill_argb.to_be_bytes();
        [r, g, b, a]
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub capture: CaptureConfig,
    pub overlay: OverlayStyle,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        self.capture.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_images, 3);
        assert_eq!(config.acquire_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_builder_rejects_zero_images() {
        let result = CaptureConfig::builder().max_images(0).build();
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_blank_display_name() {
        let result = CaptureConfig::builder().virtual_display_name("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"capture":{"maxImages":2}}"#).unwrap();
        assert_eq!(config.capture.max_images, 2);
        assert_eq!(config.capture.virtual_display_name, "ScreenCapture");
        assert_eq!(config.overlay.label, "Content blocked");
    }

    #[test]
    fn test_fill_rgba() {
        let style = OverlayStyle::default();
        assert_eq!(style.fill_rgba(), [0, 0, 0, 0xCC]);
    }
}
