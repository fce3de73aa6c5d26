//! Camera-driven enrollment and unlock loops.

use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use facegate_core::{AccessGate, Decision, EmbeddingProvider, EnrollError, VerifyError};
use facegate_hw::{CameraError, Frame, FrameStream};

use crate::render;

/// Frames read and dropped before an on-demand capture, flushing buffers
/// queued while the user was deciding.
const STALE_FRAMES: usize = 4;
/// Dark frames tolerated in a row before a capture gives up.
const MAX_DARK_FRAMES: usize = 30;

/// Anything that yields camera frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Drop frames buffered since the last read.
    fn discard(&mut self, count: usize) -> Result<(), CameraError> {
        for _ in 0..count {
            self.next_frame()?;
        }
        Ok(())
    }
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        FrameStream::next_frame(self)
    }

    fn discard(&mut self, count: usize) -> Result<(), CameraError> {
        self.warm_up(count)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled,
    Cancelled,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    TimedOut,
}

/// Next frame that is not dark.
fn next_lit_frame<S: FrameSource + ?Sized>(source: &mut S) -> Result<Frame> {
    for _ in 0..MAX_DARK_FRAMES {
        let frame = source.next_frame().context("failed to capture frame")?;
        if !frame.is_dark {
            return Ok(frame);
        }
        tracing::debug!(seq = frame.sequence, "skipping dark frame");
    }
    anyhow::bail!("camera returned {MAX_DARK_FRAMES} dark frames in a row; is the lens covered?")
}

/// Interactive enrollment: each line from `input` captures a frame, `q` cancels.
///
/// Face-count problems print guidance and wait for another try. A successful
/// enrollment ends the loop.
pub fn camera_enroll<S, P>(
    gate: &AccessGate,
    provider: &mut P,
    source: &mut S,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<EnrollOutcome>
where
    S: FrameSource + ?Sized,
    P: EmbeddingProvider + ?Sized,
{
    writeln!(out, "Look at the camera and press Enter to save your face (q + Enter to quit).")?;
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 || line.trim().eq_ignore_ascii_case("q") {
            writeln!(out, "Enrollment cancelled.")?;
            return Ok(EnrollOutcome::Cancelled);
        }

        source.discard(STALE_FRAMES).context("failed to capture frame")?;
        let frame = next_lit_frame(source)?;
        writeln!(out, "Saving image...")?;

        match gate.enroll(provider, &frame.image) {
            Ok(template) => {
                writeln!(
                    out,
                    "Success! Face saved to {} ({})",
                    gate.store().location(),
                    template.id
                )?;
                return Ok(EnrollOutcome::Enrolled);
            }
            Err(err @ (EnrollError::NoFaceFound | EnrollError::MultipleFacesFound { .. })) => {
                writeln!(out, "{err}")?;
            }
            Err(EnrollError::Provider(err)) => {
                tracing::warn!(seq = frame.sequence, error = %err, "enroll: face analysis failed");
                writeln!(out, "Face analysis failed ({err}). Please try again.")?;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Verify frames until the enrolled face appears or `deadline` passes.
///
/// Every decision is printed. With `snapshot` set, the latest analysed frame
/// is written there mirrored and annotated.
pub fn unlock<S, P>(
    gate: &AccessGate,
    provider: &mut P,
    source: &mut S,
    deadline: Option<Instant>,
    snapshot: Option<&Path>,
    out: &mut dyn Write,
) -> Result<UnlockOutcome>
where
    S: FrameSource + ?Sized,
    P: EmbeddingProvider + ?Sized,
{
    writeln!(out, "Looking for a match...")?;
    let mut last_line = String::new();
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            writeln!(out, "System locked.")?;
            return Ok(UnlockOutcome::TimedOut);
        }

        let frame = source.next_frame().context("failed to capture frame")?;
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let decision = match gate.verify(provider, &frame.image) {
            Ok(decision) => decision,
            Err(VerifyError::Provider(err)) => {
                tracing::warn!(seq = frame.sequence, error = %err, "verify: face analysis failed");
                let line = format!("Face analysis failed ({err})");
                if line != last_line {
                    writeln!(out, "{line}")?;
                    last_line = line;
                }
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let line = render::describe(&decision);
        if line != last_line {
            writeln!(out, "{line}")?;
            last_line = line;
        }
        if let Some(path) = snapshot {
            write_snapshot(&frame, &decision, path)?;
        }

        if decision.is_granted() {
            writeln!(out, "UNLOCKED!")?;
            return Ok(UnlockOutcome::Unlocked);
        }
    }
}

fn write_snapshot(frame: &Frame, decision: &Decision, path: &Path) -> Result<()> {
    render::annotate(&frame.image, decision)
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}
