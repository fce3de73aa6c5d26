//! Enrollment and verification policies around the single template.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::{decode_image, DecodeError};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::store::{StoreError, TemplateStore};
use crate::types::{FaceRegion, Template};

/// How a process treats a missing or unreadable template at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    /// Start unenrolled and wait for an enrollment.
    Wait,
    /// Refuse to start without a readable template.
    Require,
}

impl FromStr for StartupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(StartupMode::Wait),
            "require" => Ok(StartupMode::Require),
            other => Err(format!("unknown startup mode '{other}' (expected wait or require)")),
        }
    }
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupMode::Wait => f.write_str("wait"),
            StartupMode::Require => f.write_str("require"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("no face enrolled at {location}; run enrollment first")]
    NotEnrolled { location: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unenrolled,
    Enrolled,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Unenrolled => "unenrolled",
            GateState::Enrolled => "enrolled",
        }
    }
}

/// Why a verification did not grant access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoFace,
    NoMatch,
}

/// Outcome of a verification that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AccessGranted {
        distance: f32,
        face: FaceRegion,
    },
    Unknown {
        reason: DenyReason,
        distance: Option<f32>,
        face: Option<FaceRegion>,
    },
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::AccessGranted { .. })
    }

    /// Machine-readable tag.
    pub fn code(&self) -> &'static str {
        match self {
            Decision::AccessGranted { .. } => "access_granted",
            Decision::Unknown { .. } => "unknown",
        }
    }

    /// Display tag shown to users.
    pub fn status(&self) -> &'static str {
        match self {
            Decision::AccessGranted { .. } => "Access Granted",
            Decision::Unknown { .. } => "Unknown",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Decision::AccessGranted { .. } => "Access Granted!",
            Decision::Unknown {
                reason: DenyReason::NoFace,
                ..
            } => "No face found in image",
            Decision::Unknown {
                reason: DenyReason::NoMatch,
                ..
            } => "Access Denied: Unknown face",
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            Decision::AccessGranted { distance, .. } => Some(*distance),
            Decision::Unknown { distance, .. } => *distance,
        }
    }

    pub fn face(&self) -> Option<&FaceRegion> {
        match self {
            Decision::AccessGranted { face, .. } => Some(face),
            Decision::Unknown { face, .. } => face.as_ref(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("No face found. Please look at the camera and try again.")]
    NoFaceFound,
    #[error("Multiple faces found ({count}). Only one person at a time, please.")]
    MultipleFacesFound { count: usize },
    #[error("Could not decode image: {0}")]
    Decode(#[from] DecodeError),
    #[error("Could not save template: {0}")]
    Storage(#[from] StoreError),
    #[error("Face analysis failed: {0}")]
    Provider(#[from] ProviderError),
}

impl EnrollError {
    pub fn code(&self) -> &'static str {
        match self {
            EnrollError::NoFaceFound => "no_face_found",
            EnrollError::MultipleFacesFound { .. } => "multiple_faces_found",
            EnrollError::Decode(_) => "decode_error",
            EnrollError::Storage(_) => "storage_error",
            EnrollError::Provider(_) => "provider_error",
        }
    }

    pub fn status(&self) -> &'static str {
        "Error"
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("No face enrolled. Please enroll a face first.")]
    NotEnrolled,
    #[error("Could not decode image: {0}")]
    Decode(#[from] DecodeError),
    #[error("Face analysis failed: {0}")]
    Provider(#[from] ProviderError),
}

impl VerifyError {
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::NotEnrolled => "not_enrolled",
            VerifyError::Decode(_) => "decode_error",
            VerifyError::Provider(_) => "provider_error",
        }
    }

    pub fn status(&self) -> &'static str {
        "Error"
    }
}

/// The enrollment and verification policy pair.
///
/// Cheap to share: clones point at the same template store.
#[derive(Clone)]
pub struct AccessGate {
    store: Arc<TemplateStore>,
    matcher: EuclideanMatcher,
}

impl AccessGate {
    pub fn new(store: Arc<TemplateStore>, matcher: EuclideanMatcher) -> Self {
        Self { store, matcher }
    }

    /// Load the persisted template and apply the startup policy.
    ///
    /// In `Wait` mode any load failure is logged and the gate starts
    /// unenrolled; a corrupt file stays on disk until the next enrollment
    /// replaces it. In `Require` mode a missing or unreadable template fails.
    pub fn start(
        store: Arc<TemplateStore>,
        matcher: EuclideanMatcher,
        mode: StartupMode,
    ) -> Result<Self, StartupError> {
        let location = store.location();
        match (store.load(), mode) {
            (Ok(Some(template)), _) => {
                tracing::info!(
                    id = %template.id,
                    enrolled_at = %template.enrolled_at,
                    %mode,
                    "gate started enrolled"
                );
            }
            (Ok(None), StartupMode::Wait) => {
                tracing::warn!(
                    location = %location,
                    "no face enrolled; waiting for enrollment"
                );
            }
            (Ok(None), StartupMode::Require) => {
                return Err(StartupError::NotEnrolled { location });
            }
            (Err(err), StartupMode::Wait) => {
                tracing::warn!(
                    location = %location,
                    error = %err,
                    "could not load template; starting unenrolled"
                );
            }
            (Err(err), StartupMode::Require) => return Err(err.into()),
        }
        Ok(Self::new(store, matcher))
    }

    pub fn state(&self) -> GateState {
        if self.store.current().is_some() {
            GateState::Enrolled
        } else {
            GateState::Unenrolled
        }
    }

    pub fn template(&self) -> Option<Arc<Template>> {
        self.store.current()
    }

    pub fn tolerance(&self) -> f32 {
        self.matcher.tolerance
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    /// Enroll the single face in `image`, replacing any previous template.
    pub fn enroll<P>(
        &self,
        provider: &mut P,
        image: &RgbImage,
    ) -> Result<Arc<Template>, EnrollError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let faces = provider.detect_faces(image)?;
        let face = match faces.as_slice() {
            [] => return Err(EnrollError::NoFaceFound),
            [face] => face,
            _ => {
                return Err(EnrollError::MultipleFacesFound { count: faces.len() });
            }
        };

        let embedding = provider.embed(image, face)?;
        let template = self.store.save(embedding)?;
        tracing::info!(
            id = %template.id,
            confidence = face.confidence,
            "new face enrolled"
        );
        Ok(template)
    }

    /// Compare the first face in `image` against the enrolled template.
    pub fn verify<P>(&self, provider: &mut P, image: &RgbImage) -> Result<Decision, VerifyError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let template = self.store.current().ok_or(VerifyError::NotEnrolled)?;
        self.verify_against(&template, provider, image)
    }

    /// Decode `bytes`, then [`enroll`](Self::enroll).
    pub fn enroll_encoded<P>(
        &self,
        provider: &mut P,
        bytes: &[u8],
    ) -> Result<Arc<Template>, EnrollError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let image = decode_image(bytes)?;
        self.enroll(provider, &image)
    }

    /// [`verify`](Self::verify) for encoded bytes. The enrollment check runs before decoding.
    pub fn verify_encoded<P>(&self, provider: &mut P, bytes: &[u8]) -> Result<Decision, VerifyError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let template = self.store.current().ok_or(VerifyError::NotEnrolled)?;
        let image = decode_image(bytes)?;
        self.verify_against(&template, provider, &image)
    }

    fn verify_against<P>(
        &self,
        template: &Template,
        provider: &mut P,
        image: &RgbImage,
    ) -> Result<Decision, VerifyError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let faces = provider.detect_faces(image)?;
        let Some(face) = faces.first() else {
            tracing::debug!("verify: no face in image");
            return Ok(Decision::Unknown {
                reason: DenyReason::NoFace,
                distance: None,
                face: None,
            });
        };
        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "verify: several faces, using the first");
        }

        let probe = provider.embed(image, face)?;
        let result = self.matcher.compare(&template.embedding, &probe);
        tracing::info!(
            matched = result.matched,
            distance = result.distance,
            tolerance = self.matcher.tolerance,
            "verify: compared against template"
        );

        Ok(if result.matched {
            Decision::AccessGranted {
                distance: result.distance,
                face: *face,
            }
        } else {
            Decision::Unknown {
                reason: DenyReason::NoMatch,
                distance: Some(result.distance),
                face: Some(*face),
            }
        })
    }
}
