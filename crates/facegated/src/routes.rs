//! HTTP API.
//!
//! - `GET /`             browser UI (webcam capture, enroll and unlock)
//! - `POST /check_face`  verify the first face in `{"image": "<data uri>"}`
//! - `POST /enroll_face` enroll the single face in `{"image": "<data uri>"}`
//! - `GET /status`       gate state and template metadata

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use facegate_core::decode::decode_data_uri;
use facegate_core::{AccessGate, EnrollError, GateState, VerifyError};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, EngineHandle};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Largest request body accepted. A data URI of a full-HD JPEG frame stays
/// well below this; larger bodies are answered with 413.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub gate: AccessGate,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image: Option<String>,
}

/// Body of every `/check_face` and `/enroll_face` reply.
#[derive(Debug, Serialize)]
pub struct GateResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl GateResponse {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: "Error",
            code,
            message: message.into(),
            distance: None,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/check_face", post(check_face))
        .route("/enroll_face", post(enroll_face))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// The `image` field of the request, or the reply to send when it is absent.
///
/// A body that cannot be read as JSON keeps the status axum assigns it
/// (400, 413, 415 or 422) under the `invalid_body` code.
fn image_field(body: Result<Json<ImageRequest>, JsonRejection>) -> Result<String, Response> {
    let image = match body {
        Ok(Json(req)) => req.image,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable request body");
            return Err(reply(
                rejection.status(),
                GateResponse::error("invalid_body", rejection.body_text()),
            ));
        }
    };
    image.ok_or_else(|| {
        reply(
            StatusCode::BAD_REQUEST,
            GateResponse::error("missing_image", "No image data found"),
        )
    })
}

async fn check_face(
    State(state): State<AppState>,
    body: Result<Json<ImageRequest>, JsonRejection>,
) -> Response {
    if state.gate.state() == GateState::Unenrolled {
        return engine_error(VerifyError::NotEnrolled.into());
    }
    let uri = match image_field(body) {
        Ok(uri) => uri,
        Err(response) => return response,
    };
    let bytes = match decode_data_uri(&uri) {
        Ok(bytes) => bytes,
        Err(err) => return engine_error(VerifyError::from(err).into()),
    };

    match state.engine.verify(bytes).await {
        Ok(decision) => reply(
            StatusCode::OK,
            GateResponse {
                status: decision.status(),
                code: decision.code(),
                message: decision.message().to_string(),
                distance: decision.distance(),
            },
        ),
        Err(err) => engine_error(err),
    }
}

async fn enroll_face(
    State(state): State<AppState>,
    body: Result<Json<ImageRequest>, JsonRejection>,
) -> Response {
    let uri = match image_field(body) {
        Ok(uri) => uri,
        Err(response) => return response,
    };
    let bytes = match decode_data_uri(&uri) {
        Ok(bytes) => bytes,
        Err(err) => return engine_error(EnrollError::from(err).into()),
    };

    match state.engine.enroll(bytes).await {
        Ok(template) => {
            tracing::info!(id = %template.id, "enrolled via HTTP");
            reply(
                StatusCode::OK,
                GateResponse {
                    status: "Success",
                    code: "enrolled",
                    message: "Face enrolled successfully!".to_string(),
                    distance: None,
                },
            )
        }
        Err(err) => engine_error(err),
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let template = state.gate.template().map(|t| {
        serde_json::json!({
            "id": t.id.to_string(),
            "enrolled_at": t.enrolled_at.to_rfc3339(),
            "dimension": t.embedding.dim(),
            "model_version": t.embedding.model_version,
        })
    });
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "state": state.gate.state().as_str(),
        "tolerance": state.gate.tolerance(),
        "template": template,
    }))
}

fn reply(code: StatusCode, body: GateResponse) -> Response {
    (code, Json(body)).into_response()
}

/// HTTP status for a failed request: client mistakes are 4xx, our own failures 5xx.
fn error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Verify(VerifyError::NotEnrolled) => StatusCode::CONFLICT,
        EngineError::Verify(VerifyError::Decode(_))
        | EngineError::Enroll(EnrollError::Decode(_))
        | EngineError::Enroll(EnrollError::NoFaceFound)
        | EngineError::Enroll(EnrollError::MultipleFacesFound { .. }) => StatusCode::BAD_REQUEST,
        EngineError::Verify(VerifyError::Provider(_))
        | EngineError::Enroll(EnrollError::Storage(_))
        | EngineError::Enroll(EnrollError::Provider(_))
        | EngineError::Spawn(_)
        | EngineError::ChannelClosed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::Enroll(e) => e.code(),
        EngineError::Verify(e) => e.code(),
        EngineError::Spawn(_) | EngineError::ChannelClosed => "engine_unavailable",
    }
}

fn engine_error(err: EngineError) -> Response {
    let code = error_status(&err);
    if code.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    reply(code, GateResponse::error(error_code(&err), err.to_string()))
}
