//! Path utilities for the model store
//!
//! Standard locations for downloaded model artifacts, with `~` expansion for
//! paths that come from the environment or the command line.

use std::env;
use std::path::{Path, PathBuf};

/// Default models directory relative to the user's home
const MODELS_DIR_NAME: &str = ".cache/upscaler/models";

/// Get the default models directory path
///
/// Returns `$HOME/.cache/upscaler/models` on Unix systems, or the equivalent
/// on other platforms.
///
/// # Examples
///
/// ```
/// use upscaler_shared::default_models_dir;
///
/// let models_path = default_models_dir();
/// println!("Models directory: {}", models_path.display());
/// ```
pub fn default_models_dir() -> PathBuf {
    get_home_dir().join(MODELS_DIR_NAME)
}

/// Get the user's home directory
///
/// Falls back to current directory if HOME cannot be determined.
fn get_home_dir() -> PathBuf {
    if let Ok(home) = env::var("HOME") {
        PathBuf::from(home)
    } else if let Some(home_dir) = dirs::home_dir() {
        home_dir
    } else {
        PathBuf::from(".")
    }
}

/// Expand a path that starts with `~` to use the user's home directory
///
/// # Examples
///
/// ```
/// use upscaler_shared::expand_home_dir;
///
/// let path = expand_home_dir("~/models/fsrcnn-x2.pb");
/// assert!(!path.to_string_lossy().starts_with('~'));
/// ```
pub fn expand_home_dir<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            return get_home_dir().join(stripped);
        } else if path_str == "~" {
            return get_home_dir();
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_models_dir() {
        let models_dir = default_models_dir();
        assert!(models_dir.to_string_lossy().ends_with("models"));
    }

    #[test]
    fn test_expand_home_dir() {
        let expanded = expand_home_dir("~/test");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("test"));

        let absolute = expand_home_dir("/absolute/path");
        assert_eq!(absolute, PathBuf::from("/absolute/path"));

        let relative = expand_home_dir("relative/path");
        assert_eq!(relative, PathBuf::from("relative/path"));
    }
}
