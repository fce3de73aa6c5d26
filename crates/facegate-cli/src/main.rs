use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use facegate_core::{
    AccessGate, EnrollError, EuclideanMatcher, OnnxProvider, Settings, StartupMode, TemplateStore,
};
use facegate_hw::Camera;
use tracing_subscriber::EnvFilter;

mod cli;
mod render;
mod session;
#[cfg(test)]
mod testing;

use cli::{Cli, Commands};
use session::{EnrollOutcome, UnlockOutcome};

/// Denied, timed out or cancelled.
const EXIT_DENIED: u8 = 1;
/// Usage, configuration or startup failure.
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings = cli.global.settings().context("invalid configuration")?;

    match cli.command {
        Commands::Enroll { image } => enroll_image(&settings, &image),
        Commands::Verify { image } => verify_image(&settings, &image),
        Commands::CameraEnroll => camera_enroll(&settings),
        Commands::Unlock { timeout, snapshot } => {
            let secs = timeout.unwrap_or(settings.unlock_timeout_secs);
            unlock(&settings, secs, snapshot.as_deref())
        }
        Commands::Status => status(&settings),
        Commands::Devices => devices(),
    }
}

/// Gate for verification: the configured startup mode decides whether a
/// missing or unreadable template is fatal.
fn verification_gate(settings: &Settings, default_mode: StartupMode) -> Result<AccessGate> {
    let store = Arc::new(TemplateStore::open(settings.template_path.clone()));
    let mode = settings.startup_mode_or(default_mode);
    AccessGate::start(store, EuclideanMatcher::new(settings.tolerance), mode)
        .context("failed to load the enrolled face")
}

/// Gate for enrollment. Always starts in `wait` mode, whatever is configured,
/// so a missing or corrupt template can be replaced.
fn enrollment_gate(settings: &Settings) -> Result<AccessGate> {
    let store = Arc::new(TemplateStore::open(settings.template_path.clone()));
    AccessGate::start(store, EuclideanMatcher::new(settings.tolerance), StartupMode::Wait)
        .context("failed to open the template store")
}

fn load_provider(settings: &Settings) -> Result<OnnxProvider> {
    OnnxProvider::from_settings(settings).with_context(|| {
        format!("failed to load face models from {}", settings.model_dir.display())
    })
}

fn open_camera(settings: &Settings) -> Result<Camera> {
    Camera::open_index(settings.camera_index)
        .with_context(|| format!("could not open camera {}", settings.camera_device()))
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DENIED)
    }
}

fn enroll_image(settings: &Settings, image: &Path) -> Result<ExitCode> {
    let gate = enrollment_gate(settings)?;
    let mut provider = load_provider(settings)?;
    let bytes = read_image(image)?;

    match gate.enroll_encoded(&mut provider, &bytes) {
        Ok(template) => {
            println!("Success! Face saved to {} ({})", gate.store().location(), template.id);
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ (EnrollError::NoFaceFound | EnrollError::MultipleFacesFound { .. })) => {
            println!("{err}");
            Ok(exit_for(false))
        }
        Err(err) => Err(err.into()),
    }
}

fn verify_image(settings: &Settings, image: &Path) -> Result<ExitCode> {
    let gate = verification_gate(settings, StartupMode::Require)?;
    let mut provider = load_provider(settings)?;
    let bytes = read_image(image)?;

    let decision = gate.verify_encoded(&mut provider, &bytes)?;
    println!("{}", render::describe(&decision));
    Ok(exit_for(decision.is_granted()))
}

fn camera_enroll(settings: &Settings) -> Result<ExitCode> {
    let gate = enrollment_gate(settings)?;
    let mut provider = load_provider(settings)?;
    let camera = open_camera(settings)?;
    let mut stream = camera.stream()?;
    stream.warm_up(settings.warmup_frames)?;

    let stdin = std::io::stdin();
    let outcome = session::camera_enroll(
        &gate,
        &mut provider,
        &mut stream,
        &mut stdin.lock(),
        &mut std::io::stdout(),
    )?;
    Ok(exit_for(outcome == EnrollOutcome::Enrolled))
}

fn unlock(settings: &Settings, timeout_secs: u64, snapshot: Option<&Path>) -> Result<ExitCode> {
    let gate = verification_gate(settings, StartupMode::Require)?;
    let mut provider = load_provider(settings)?;
    let camera = open_camera(settings)?;
    let mut stream = camera.stream()?;
    stream.warm_up(settings.warmup_frames)?;

    let deadline = (timeout_secs > 0).then(|| Instant::now() + Duration::from_secs(timeout_secs));
    let outcome = session::unlock(
        &gate,
        &mut provider,
        &mut stream,
        deadline,
        snapshot,
        &mut std::io::stdout(),
    )?;
    Ok(exit_for(outcome == UnlockOutcome::Unlocked))
}

fn status(settings: &Settings) -> Result<ExitCode> {
    let store = TemplateStore::open(settings.template_path.clone());
    println!("template:  {}", store.location());
    println!("tolerance: {}", settings.tolerance);
    println!("camera:    {}", settings.camera_device());
    println!("models:    {}", settings.model_dir.display());

    match store.load() {
        Ok(Some(template)) => {
            println!("state:     enrolled");
            println!("id:        {}", template.id);
            println!("enrolled:  {}", template.enrolled_at.to_rfc3339());
            println!("dimension: {}", template.embedding.dim());
            if let Some(version) = &template.embedding.model_version {
                println!("model:     {version}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(None) => {
            println!("state:     unenrolled");
            Ok(exit_for(false))
        }
        Err(err) => {
            println!("state:     unreadable ({err})");
            Ok(exit_for(false))
        }
    }
}

fn devices() -> Result<ExitCode> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found.");
        return Ok(exit_for(false));
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(ExitCode::SUCCESS)
}
