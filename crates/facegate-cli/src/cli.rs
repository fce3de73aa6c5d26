use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use facegate_core::config::ConfigError;
use facegate_core::{Settings, StartupMode};

#[derive(Parser)]
#[command(name = "facegate", version, about = "Single-user face unlock")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides applied on top of the config file and `FACEGATE_*` variables.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// TOML config file (default: $FACEGATE_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Template file location
    #[arg(long, global = true)]
    pub template: Option<PathBuf>,

    /// Maximum embedding distance still accepted as a match
    #[arg(long, global = true)]
    pub tolerance: Option<f32>,

    /// Camera index (/dev/video<N>)
    #[arg(long, global = true)]
    pub camera: Option<u32>,

    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// Behaviour when no template is enrolled: wait or require
    #[arg(long, global = true)]
    pub startup_mode: Option<StartupMode>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enroll the single face in an image file
    Enroll {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Check an image file against the enrolled face
    Verify {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Enroll from the camera: Enter captures, q cancels
    CameraEnroll,
    /// Watch the camera until the enrolled face shows up
    Unlock {
        /// Give up after this many seconds (0 waits forever)
        #[arg(long)]
        timeout: Option<u64>,
        /// Write the last analysed frame, mirrored and annotated, to this file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Show the enrolled template
    Status,
    /// List V4L2 capture devices
    Devices,
}

impl GlobalArgs {
    /// Resolve settings: file and environment first, then these flags.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Settings::load(self.config.as_deref())?;
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut Settings) {
        if let Some(path) = &self.template {
            settings.template_path = path.clone();
        }
        if let Some(tolerance) = self.tolerance {
            settings.tolerance = tolerance;
        }
        if let Some(index) = self.camera {
            settings.camera_index = index;
        }
        if let Some(dir) = &self.model_dir {
            settings.model_dir = dir.clone();
        }
        if let Some(mode) = self.startup_mode {
            settings.startup_mode = Some(mode);
        }
    }
}
