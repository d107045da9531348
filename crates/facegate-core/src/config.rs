use crate::access::LoopSettings;
use crate::enroll::DEFAULT_SAMPLE_QUOTA;
use crate::policy::{ProfileLevel, SecurityPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/facegate/config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Kiosk configuration.
///
/// Loaded from an optional TOML file, then overridden by `FACEGATE_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// SCRFD face detection model.
    pub model_path: PathBuf,
    pub store_path: PathBuf,
    /// Directory holding the daily audit files.
    pub log_dir: PathBuf,
    pub cool_down_secs: u64,
    pub poll_interval_ms: u64,
    pub sample_quota: usize,
    /// Profile active at startup (`1-3`, level name or profile name).
    pub default_profile: String,
    pub max_consecutive_frame_failures: u32,
    /// Frames discarded after the camera opens.
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_path: data_dir.join("models").join("det_10g.onnx"),
            store_path: data_dir.join("user_data").join("user_profiles.json"),
            log_dir: data_dir.join("security_logs"),
            cool_down_secs: 5,
            poll_interval_ms: 100,
            sample_quota: DEFAULT_SAMPLE_QUOTA,
            default_profile: "Medio".to_string(),
            max_consecutive_frame_failures: 30,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// File at `$FACEGATE_CONFIG` (or the default path), then environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("FACEGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Override fields from `FACEGATE_*` variables as returned by `lookup`.
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEGATE_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_DEFAULT_PROFILE") {
            self.default_profile = v;
        }
        env_parse(&lookup, "FACEGATE_COOL_DOWN_SECS", &mut self.cool_down_secs);
        env_parse(&lookup, "FACEGATE_SAMPLE_QUOTA", &mut self.sample_quota);
        env_parse(
            &lookup,
            "FACEGATE_MAX_FRAME_FAILURES",
            &mut self.max_consecutive_frame_failures,
        );
        env_parse(&lookup, "FACEGATE_WARMUP_FRAMES", &mut self.warmup_frames);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_quota == 0 {
            return Err(ConfigError::Invalid("sample_quota must be at least 1".into()));
        }
        if self.max_consecutive_frame_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_frame_failures must be at least 1".into(),
            ));
        }
        self.profile_level()?;
        Ok(())
    }

    pub fn profile_level(&self) -> Result<ProfileLevel, ConfigError> {
        self.default_profile
            .parse()
            .map_err(|e: crate::policy::UnknownProfile| ConfigError::Invalid(e.to_string()))
    }

    pub fn security_policy(&self) -> Result<SecurityPolicy, ConfigError> {
        Ok(SecurityPolicy::new(self.profile_level()?))
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            cool_down: Duration::from_secs(self.cool_down_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            sample_quota: self.sample_quota,
            max_consecutive_frame_failures: self.max_consecutive_frame_failures,
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *field = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
        }
    }
}

/// `$XDG_DATA_HOME/facegate`, falling back to `~/.local/share/facegate`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}
