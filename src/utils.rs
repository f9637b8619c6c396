use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Environment variable naming the directory with bundled assets
pub const ASSETS_ROOT_VAR: &str = "MOTION_TARGET_ASSETS_ROOT";

/// Default tracking configuration looked up under the assets root
pub const TRACKING_CONFIG_NAME: &str = "tracking-config.json";

/// Create `dir` if needed; an existing non-directory is an error
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "not a directory"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Creating output directory {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
        }
        Err(e) => Err(Error::io(dir, e)),
    }
}

pub fn assets_root() -> Option<PathBuf> {
    std::env::var_os(ASSETS_ROOT_VAR).map(PathBuf::from)
}

/// Resolve `name` under `root`, warning when it does not exist
pub fn find_asset(root: Option<&Path>, name: &str) -> Option<PathBuf> {
    let Some(root) = root else {
        warn!("{} is not set, cannot locate {}", ASSETS_ROOT_VAR, name);
        return None;
    };
    let path = root.join(name);
    if path.is_file() {
        Some(path)
    } else {
        warn!("Asset {} not found", path.display());
        None
    }
}

/// Load a JSON document, e.g. a tracking context configuration
pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::json(path.display().to_string(), e))
}

/// Seconds as given on the command line to whole nanoseconds
pub fn seconds_to_nanos(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1e9).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a/b");
        prepare_output_dir(&out).unwrap();
        assert!(out.is_dir());
        prepare_output_dir(&out).unwrap();
    }

    #[test]
    fn output_path_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("taken");
        fs::write(&file, b"").unwrap();
        assert!(matches!(prepare_output_dir(&file), Err(Error::Io { .. })));
    }

    #[test]
    fn finds_existing_asset_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(TRACKING_CONFIG_NAME), "{}").unwrap();

        assert_eq!(
            find_asset(Some(dir.path()), TRACKING_CONFIG_NAME),
            Some(dir.path().join(TRACKING_CONFIG_NAME))
        );
        assert_eq!(find_asset(Some(dir.path()), "missing.json"), None);
        assert_eq!(find_asset(None, TRACKING_CONFIG_NAME), None);
    }

    #[test]
    fn seconds_convert_to_nanos() {
        assert_eq!(seconds_to_nanos(0.5), 500_000_000);
        assert_eq!(seconds_to_nanos(1.0 / 30.0), 33_333_333);
        assert_eq!(seconds_to_nanos(-1.0), 0);
        assert_eq!(seconds_to_nanos(f64::NAN), 0);
    }
}
