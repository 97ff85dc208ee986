//! Application configuration.

use std::path::Path;

use serde::Deserialize;
use tessera_core::constants::{DEFAULT_CLEAR_COLOR, MAX_FRAMES_IN_FLIGHT};

/// Application configuration.
///
/// Every field may be omitted from a TOML file; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frame slots recorded while the GPU works on earlier ones.
    pub frames_in_flight: usize,
    /// Colour the render pass clears to.
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Tessera".to_string(),
            width: 800,
            height: 600,
            vsync: false,
            validation: cfg!(debug_assertions),
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Load a config from TOML. `Ok(None)` if the file does not exist.
    pub fn from_toml(path: impl AsRef<Path>) -> tessera_core::Result<Option<Self>> {
        tessera_core::load_toml(path)
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight (at least one).
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::config::parse_toml;

    #[test]
    fn empty_toml_is_default() {
        let config: AppConfig = parse_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn toml_overrides_fields() {
        let config: AppConfig = parse_toml(
            r#"
            title = "demo"
            width = 1024
            vsync = true
            clear_color = [0.0, 0.0, 0.0, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.title, "demo");
        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 600);
        assert!(config.vsync);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn wrong_type_is_an_error() {
        let result: Result<AppConfig, _> = parse_toml("width = \"wide\"");
        assert!(result.is_err());
    }

    #[test]
    fn builder_clamps_frames_in_flight() {
        let config = AppConfig::new("t").with_size(10, 20).with_frames_in_flight(0);
        assert_eq!(config.frames_in_flight, 1);
        assert_eq!((config.width, config.height), (10, 20));
    }

    #[test]
    fn missing_file_yields_none() {
        assert!(AppConfig::from_toml("no/such/tessera.toml").unwrap().is_none());
    }
}
