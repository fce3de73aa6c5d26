//! facegate-core: single-template face access gate.
//!
//! Holds the enrolled template, the distance matcher and the enrollment and
//! verification policies. Face detection and embedding sit behind
//! [`EmbeddingProvider`]; [`OnnxProvider`] runs SCRFD and ArcFace via ONNX
//! Runtime.

pub mod config;
pub mod decode;
pub mod detector;
pub mod gate;
pub mod matcher;
pub mod provider;
pub mod recognizer;
pub mod store;
pub mod types;

pub use config::Settings;
pub use gate::{AccessGate, Decision, EnrollError, GateState, StartupMode, VerifyError};
pub use matcher::{is_match, EuclideanMatcher, Matcher};
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderError};
pub use store::{StoreError, TemplateStore};
pub use types::{Embedding, FaceRegion, Template};
