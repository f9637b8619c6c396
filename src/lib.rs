pub mod capture;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod tracking;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// Fewest buffers per plane role a recording can be replayed with
///
/// While the IO thread reads the next frame, the previous one is still
/// referenced by the device's latest-frame slot and the coordinator's frame
/// cache, so a single buffer would never come back to the pool.
pub const MIN_BUFFER_POOL_SIZE: usize = 2;

/// Prefix of environment overrides, e.g. `MOTION_TARGET__PIPELINE__BEGIN_FRAME`
pub const ENV_PREFIX: &str = "MOTION_TARGET";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub path: PathBuf,
    /// Deliver exactly one recording frame per request
    pub lockstep_io: bool,
    /// Buffers per plane role shared between the IO thread and frame holders
    pub buffer_pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub begin_frame: u32,
    /// Exclusive; defaults to the recording's last frame
    pub end_frame: Option<u32>,
    /// Minimum nanoseconds between written targets
    pub time_step_ns: u64,
    /// JSON file with device property overrides
    pub device_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub index_name: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            lockstep_io: true,
            buffer_pool_size: 4,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            begin_frame: 1,
            end_frame: None,
            time_step_ns: 0,
            device_config: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            index_name: "target.index".into(),
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML settings file, then environment
    pub fn load(settings: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = settings {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.pipeline.end_frame {
            if end < self.pipeline.begin_frame {
                return Err(Error::InvalidWindow {
                    begin: self.pipeline.begin_frame,
                    end,
                });
            }
        }
        self.recording.validate()
    }
}

impl RecordingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_pool_size < MIN_BUFFER_POOL_SIZE {
            return Err(Error::InvalidSetting(format!(
                "buffer_pool_size is {}, replay needs at least {}",
                self.buffer_pool_size, MIN_BUFFER_POOL_SIZE
            )));
        }
        Ok(())
    }
}

/// Summary of one coordinator run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub frames_submitted: u64,
    pub targets_written: u64,
    pub frames_skipped: u64,
    pub tracking_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_track_from_frame_one() {
        let config = Config::default();
        assert_eq!(config.pipeline.begin_frame, 1);
        assert_eq!(config.pipeline.end_frame, None);
        assert!(config.recording.lockstep_io);
        assert_eq!(config.output.index_name, "target.index");
        config.validate().unwrap();
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[pipeline]\nbegin_frame = 5\nend_frame = 9\ntime_step_ns = 250\n\n[recording]\nbuffer_pool_size = 2\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pipeline.begin_frame, 5);
        assert_eq!(config.pipeline.end_frame, Some(9));
        assert_eq!(config.pipeline.time_step_ns, 250);
        assert_eq!(config.recording.buffer_pool_size, 2);
        assert!(config.recording.lockstep_io);
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(Some(&dir.path().join("absent.toml"))),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn single_buffer_pool_is_rejected() {
        let mut config = Config::default();
        config.recording.buffer_pool_size = 1;
        assert!(matches!(config.validate(), Err(Error::InvalidSetting(_))));

        config.recording.buffer_pool_size = MIN_BUFFER_POOL_SIZE;
        config.validate().unwrap();
    }

    #[test]
    fn end_before_begin_is_rejected() {
        let mut config = Config::default();
        config.pipeline.begin_frame = 4;
        config.pipeline.end_frame = Some(3);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidWindow { begin: 4, end: 3 })
        ));
    }
}
