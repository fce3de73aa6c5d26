//! Runtime settings shared by the daemon and the CLI.
//!
//! Resolution order, later wins: built-in defaults, an optional TOML file
//! (`FACEGATE_CONFIG`), `FACEGATE_*` environment variables. Binaries apply
//! their command-line flags on top.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::gate::StartupMode;
use crate::matcher::DEFAULT_TOLERANCE;

pub const CONFIG_ENV: &str = "FACEGATE_CONFIG";

const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
const SYSTEM_MODEL_DIR: &str = "/usr/share/facegate/models";
const TEMPLATE_FILE: &str = "template.bin";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid tolerance {0}: must be finite and non-negative")]
    InvalidTolerance(f32),
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Maximum Euclidean distance for a match.
    pub tolerance: f32,
    /// Location of the enrolled template file.
    pub template_path: PathBuf,
    /// V4L2 camera index (`/dev/video<N>`).
    pub camera_index: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Startup policy; `None` lets each binary pick its own default.
    pub startup_mode: Option<StartupMode>,
    /// Frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Give up a camera unlock after this many seconds; 0 waits forever.
    pub unlock_timeout_secs: u64,
}

/// Every key optional; absent keys keep the lower layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    tolerance: Option<f32>,
    template_path: Option<PathBuf>,
    camera_index: Option<u32>,
    model_dir: Option<PathBuf>,
    startup_mode: Option<StartupMode>,
    warmup_frames: Option<usize>,
    unlock_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults_from(&|key: &str| std::env::var(key).ok())
    }
}

impl Settings {
    /// Load from the config file (explicit path, else `FACEGATE_CONFIG`) and the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(config_file, &|key: &str| std::env::var(key).ok())
    }

    fn load_from(
        config_file: Option<&Path>,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut settings = Self::defaults_from(lookup);

        let file = config_file
            .map(Path::to_path_buf)
            .or_else(|| lookup(CONFIG_ENV).map(PathBuf::from));
        if let Some(path) = file {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            settings.apply_toml(&path, &text)?;
            tracing::debug!(path = %path.display(), "config file applied");
        }

        settings.apply_env(lookup);
        settings.validate()?;
        Ok(settings)
    }

    fn defaults_from(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            template_path: default_template_path(lookup),
            camera_index: 0,
            model_dir: PathBuf::from(SYSTEM_MODEL_DIR),
            startup_mode: None,
            warmup_frames: 4,
            unlock_timeout_secs: 0,
        }
    }

    fn apply_toml(&mut self, path: &Path, text: &str) -> Result<(), ConfigError> {
        let file: FileSettings = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = file.template_path {
            self.template_path = v;
        }
        if let Some(v) = file.camera_index {
            self.camera_index = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.startup_mode {
            self.startup_mode = Some(v);
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.unlock_timeout_secs {
            self.unlock_timeout_secs = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        self.tolerance = env_parse(lookup, "FACEGATE_TOLERANCE", self.tolerance);
        if let Some(v) = lookup("FACEGATE_TEMPLATE_PATH") {
            self.template_path = PathBuf::from(v);
        }
        self.camera_index = env_parse(lookup, "FACEGATE_CAMERA_INDEX", self.camera_index);
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_STARTUP_MODE") {
            match v.parse() {
                Ok(mode) => self.startup_mode = Some(mode),
                Err(err) => tracing::warn!(error = %err, "ignoring FACEGATE_STARTUP_MODE"),
            }
        }
        self.warmup_frames = env_parse(lookup, "FACEGATE_WARMUP_FRAMES", self.warmup_frames);
        self.unlock_timeout_secs =
            env_parse(lookup, "FACEGATE_UNLOCK_TIMEOUT_SECS", self.unlock_timeout_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        Ok(())
    }

    pub fn startup_mode_or(&self, default: StartupMode) -> StartupMode {
        self.startup_mode.unwrap_or(default)
    }

    /// V4L2 device path for the configured camera index.
    pub fn camera_device(&self) -> String {
        format!("/dev/video{}", self.camera_index)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }
}

/// `$XDG_DATA_HOME/facegate/template.bin`, falling back to `$HOME/.local/share`, then `/tmp`.
fn default_template_path(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    let data_dir = lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("facegate").join(TEMPLATE_FILE)
}

fn env_parse<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparsable value, keeping default");
                default
            }
        },
    }
}
