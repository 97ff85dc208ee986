//! TOML configuration loading.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Load a TOML document into `T`.
///
/// Returns `Ok(None)` when the file does not exist, so callers can fall back
/// to defaults. Any other I/O failure or a parse error is reported.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    parse_toml(&text)
        .map(Some)
        .map_err(|message| Error::Config {
            path: path.to_path_buf(),
            message,
        })
}

/// Parse a TOML string, flattening the parser error into a message.
pub fn parse_toml<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    toml::from_str(text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Window {
        title: String,
        #[serde(default)]
        vsync: bool,
    }

    #[test]
    fn missing_file_is_none() {
        let loaded: Option<Window> = load_toml("definitely/not/here.toml").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn parse_applies_serde_defaults() {
        let window: Window = parse_toml("title = \"demo\"").unwrap();
        assert_eq!(
            window,
            Window {
                title: "demo".to_string(),
                vsync: false
            }
        );
    }

    #[test]
    fn parse_error_is_reported() {
        let result: std::result::Result<Window, _> = parse_toml("title = ");
        assert!(result.is_err());
    }
}
