//! HTTP route handlers for the Overtone service.
//!
//! Accepts multipart audio uploads and returns registration or match
//! results as JSON. Decoding and fingerprinting are CPU-bound, so every
//! handler hops onto the blocking pool before touching the pipeline.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::audio;
use crate::matcher::MatchResult;
use crate::pipeline::{Engine, PipelineError};

#[derive(Serialize)]
pub struct AddResponse {
    pub success: bool,
    pub message: String,
    pub song_id: i32,
    pub song_name: String,
    pub hash_count: usize,
}

#[derive(Serialize)]
pub struct MatchResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub result: MatchResult,
}

/// Error half of every handler; renders as `{ success, message }`.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "message": self.1 }));
        (self.0, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Audio(_)
            | PipelineError::InvalidAudio
            | PipelineError::EmptyFingerprint => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        ApiError(status, err.to_string())
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, message.into())
}

fn internal(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, message.into())
}

struct Upload {
    bytes: Vec<u8>,
    name: Option<String>,
    file_name: Option<String>,
}

/// Pull the `file` payload (and optional `name` field) out of a multipart
/// body.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload = Upload {
        bytes: Vec::new(),
        name: None,
        file_name: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(e.to_string()))?
                    .to_vec();
            }
            Some("name") => {
                upload.name = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            _ => {}
        }
    }

    if upload.bytes.is_empty() {
        return Err(bad_request("missing or empty 'file' field"));
    }

    Ok(upload)
}

/// `POST /api/add`: register an uploaded clip.
pub async fn add(
    State(engine): State<Arc<Engine>>,
    multipart: Multipart,
) -> Result<Json<AddResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let name = upload
        .name
        .or(upload.file_name)
        .unwrap_or_else(|| "Untitled".to_string());

    let registration = tokio::task::spawn_blocking(move || {
        let samples = audio::load_bytes(&upload.bytes)?;
        engine.register(&samples, &name)
    })
    .await
    .map_err(|e| internal(e.to_string()))??;

    Ok(Json(AddResponse {
        success: true,
        message: "song registered".to_string(),
        song_id: registration.song_id,
        song_name: registration.song_name,
        hash_count: registration.hash_count,
    }))
}

/// `POST /api/match`: identify an uploaded clip.
pub async fn match_song(
    State(engine): State<Arc<Engine>>,
    multipart: Multipart,
) -> Result<Json<MatchResponse>, ApiError> {
    let upload = read_upload(multipart).await?;

    let result = tokio::task::spawn_blocking(move || {
        let samples = audio::load_bytes(&upload.bytes)?;
        engine.identify(&samples)
    })
    .await
    .map_err(|e| internal(e.to_string()))??;

    let message = if result.is_match() {
        format!("matched '{}'", result.song_name)
    } else {
        "no match".to_string()
    };

    Ok(Json(MatchResponse {
        success: true,
        message,
        result,
    }))
}
