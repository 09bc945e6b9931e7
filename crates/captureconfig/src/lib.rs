use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FRAME_SIZE: u32 = 512;
pub const DEFAULT_FPS: f64 = 60.0;
pub const DEFAULT_TICK_RATE: f64 = 20.0;
pub const DEFAULT_OUTPUT_DIR: &str = "odscap-out";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadbackSetting {
    #[default]
    Deferred,
    Immediate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    pub version: u32,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub shaders: Option<ShaderPaths>,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureSection {
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_interval: Option<Duration>,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f64,
    #[serde(default)]
    pub readback: ReadbackSetting,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            frames: default_frames(),
            fps: None,
            frame_interval: None,
            tick_rate: default_tick_rate(),
            readback: ReadbackSetting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputSection {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

fn default_frame_size() -> u32 {
    DEFAULT_FRAME_SIZE
}

fn default_frames() -> u32 {
    1
}

fn default_tick_rate() -> f64 {
    DEFAULT_TICK_RATE
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            version: 1,
            capture: CaptureSection::default(),
            shaders: None,
            output: OutputSection::default(),
        }
    }
}

impl CaptureConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CaptureConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a config file. Relative shader paths are resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        if let (Some(shaders), Some(base)) = (config.shaders.as_mut(), path.parent()) {
            shaders.vertex = base.join(&shaders.vertex);
            shaders.fragment = base.join(&shaders.fragment);
        }
        Ok(config)
    }

    /// Frames per second, from `fps` or derived from `frame_interval`.
    pub fn frame_rate(&self) -> f64 {
        match (self.capture.fps, self.capture.frame_interval) {
            (Some(fps), _) => fps,
            (None, Some(interval)) => 1.0 / interval.as_secs_f64(),
            (None, None) => DEFAULT_FPS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let capture = &self.capture;
        if capture.frame_size == 0 {
            return Err(ConfigError::Invalid(
                "capture.frame_size must be greater than zero".into(),
            ));
        }
        if capture.frames == 0 {
            return Err(ConfigError::Invalid(
                "capture.frames must be greater than zero".into(),
            ));
        }
        if capture.fps.is_some() && capture.frame_interval.is_some() {
            return Err(ConfigError::Invalid(
                "capture.fps and capture.frame_interval are mutually exclusive".into(),
            ));
        }
        if let Some(fps) = capture.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(ConfigError::Invalid("capture.fps must be > 0".into()));
            }
        }
        if let Some(interval) = capture.frame_interval {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(
                    "capture.frame_interval must be greater than zero".into(),
                ));
            }
        }
        if !capture.tick_rate.is_finite() || capture.tick_rate <= 0.0 {
            return Err(ConfigError::Invalid("capture.tick_rate must be > 0".into()));
        }

        if let Some(shaders) = &self.shaders {
            if shaders.vertex.as_os_str().is_empty() || shaders.fragment.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "shaders.vertex and shaders.fragment must both be set".into(),
                ));
            }
        }

        if self.output.directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "output.directory may not be empty".into(),
            ));
        }

        Ok(())
    }
}
