//! Admission protocol handlers.
//!
//! `/mutate` runs a chain of fail-fast gates: media type, body read, review
//! decode, mutator call, response normalisation, encode. Each failure maps to
//! an [`AdmissionError`] whose HTTP body is a fixed, generic message; the
//! underlying error is logged here and never sent to the caller.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::admission::types::{AdmissionResponse, AdmissionReview, PatchOperation, PatchType};
use crate::admission::{MutateError, Mutator};
use crate::observability::metrics;

/// Body of `GET /`.
pub const ROOT_MESSAGE: &str = "Hello from mutating-webhook! Mutation available on: /mutate";
/// Body of the health and readiness probes.
pub const PROBE_MESSAGE: &str = "ok";
/// Body of a 415 from `/mutate`.
pub const JSON_EXPECTED: &str = "JSON is expected";

const JSON_MEDIA_TYPE: &str = "application/json";

/// State shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    pub mutator: Arc<dyn Mutator>,
    pub max_body_bytes: usize,
}

/// Why a `Content-Type` header could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaTypeError {
    #[error("missing media type")]
    Missing,

    #[error("invalid media type")]
    Invalid,
}

/// Everything that can go wrong on `/mutate`.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("unsupported media type {0:?}")]
    UnsupportedMediaType(String),

    #[error("bad content type: {0}")]
    MediaType(#[from] MediaTypeError),

    #[error("failed to read request body: {0}")]
    ReadBody(#[source] axum::Error),

    #[error("failed to decode admission review: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("admission review has no request")]
    MissingRequest,

    #[error("mutator failed for {uid}: {source}")]
    Mutate { uid: String, source: MutateError },

    #[error("mutator returned an invalid patch for {uid}: {source}")]
    InvalidResponse {
        uid: String,
        source: serde_json::Error,
    },

    #[error("failed to encode admission review for {uid}: {source}")]
    Encode {
        uid: String,
        source: serde_json::Error,
    },
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The only text a caller ever sees.
    pub fn public_message(&self) -> String {
        match self {
            AdmissionError::UnsupportedMediaType(_) => JSON_EXPECTED.to_string(),
            AdmissionError::MediaType(e) => e.to_string(),
            AdmissionError::ReadBody(_) => "failed to read request body".to_string(),
            AdmissionError::Decode(_) | AdmissionError::MissingRequest => {
                "failed to decode admission review".to_string()
            }
            AdmissionError::Mutate { .. } => "failed to mutate admission request".to_string(),
            AdmissionError::InvalidResponse { .. } => {
                "mutator returned an invalid admission response".to_string()
            }
            AdmissionError::Encode { .. } => "failed to encode admission review".to_string(),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            AdmissionError::UnsupportedMediaType(_) | AdmissionError::MediaType(_) => "bad_media_type",
            AdmissionError::ReadBody(_) => "read_error",
            AdmissionError::Decode(_) | AdmissionError::MissingRequest => "decode_error",
            AdmissionError::Mutate { .. } | AdmissionError::InvalidResponse { .. } => "mutator_error",
            AdmissionError::Encode { .. } => "encode_error",
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}

pub async fn root() -> &'static str {
    ROOT_MESSAGE
}

pub async fn healthz() -> &'static str {
    PROBE_MESSAGE
}

pub async fn ready() -> &'static str {
    PROBE_MESSAGE
}

/// `POST /mutate`.
pub async fn mutate(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let start = Instant::now();

    match review(&state, &headers, body).await {
        Ok(response) => {
            metrics::record_admission("ok", start);
            response
        }
        Err(e) => {
            match &e {
                AdmissionError::UnsupportedMediaType(_) => {
                    tracing::warn!(error = %e, "Rejected admission request")
                }
                _ => tracing::error!(error = %e, "Admission request failed"),
            }
            metrics::record_admission(e.outcome(), start);
            e.into_response()
        }
    }
}

async fn review(state: &AppState, headers: &HeaderMap, body: Body) -> Result<Response, AdmissionError> {
    let media_type = parse_media_type(headers.get(header::CONTENT_TYPE))?;
    if media_type != JSON_MEDIA_TYPE {
        return Err(AdmissionError::UnsupportedMediaType(media_type));
    }

    let bytes = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(AdmissionError::ReadBody)?;

    let mut review: AdmissionReview =
        serde_json::from_slice(&bytes).map_err(AdmissionError::Decode)?;
    let request = review.request.take().ok_or(AdmissionError::MissingRequest)?;
    let uid = request.uid.clone();

    tracing::debug!(
        uid = %uid,
        kind = %request.kind.kind,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // Mutators are synchronous and may be slow; keep them off the reactor.
    let mutator = Arc::clone(&state.mutator);
    let decision = tokio::task::spawn_blocking(move || mutator.mutate(&request))
        .await
        .map_err(|e| AdmissionError::Mutate {
            uid: uid.clone(),
            source: Box::new(e),
        })?
        .map_err(|source| AdmissionError::Mutate {
            uid: uid.clone(),
            source,
        })?;

    let decision = normalize(decision, &uid)?;
    tracing::info!(
        uid = %uid,
        allowed = decision.allowed,
        patched = decision.patch.is_some(),
        "Admission request processed"
    );

    let body = serde_json::to_vec(&AdmissionReview::respond_to(&review, decision))
        .map_err(|source| AdmissionError::Encode {
            uid: uid.clone(),
            source,
        })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_MEDIA_TYPE))],
        body,
    )
        .into_response())
}

/// Enforce the response invariants regardless of what the mutator produced:
/// the uid echoes the request, and patch and patch type are present together
/// or not at all, with the patch being a valid list of edits.
pub fn normalize(mut response: AdmissionResponse, uid: &str) -> Result<AdmissionResponse, AdmissionError> {
    if response.uid != uid {
        if !response.uid.is_empty() {
            tracing::warn!(uid = %uid, returned = %response.uid, "Mutator returned a foreign uid, overriding");
        }
        response.uid = uid.to_string();
    }

    let edits = match response.patch.as_deref() {
        None | Some([]) => 0,
        Some(bytes) => serde_json::from_slice::<Vec<PatchOperation>>(bytes)
            .map_err(|source| AdmissionError::InvalidResponse {
                uid: uid.to_string(),
                source,
            })?
            .len(),
    };

    if edits == 0 {
        response.patch = None;
        response.patch_type = None;
    } else {
        response.patch_type.get_or_insert(PatchType::JsonPatch);
    }
    Ok(response)
}

/// Extract the lower-cased `type/subtype` from a `Content-Type` header.
pub fn parse_media_type(value: Option<&HeaderValue>) -> Result<String, MediaTypeError> {
    let value = value.ok_or(MediaTypeError::Missing)?;
    let value = value.to_str().map_err(|_| MediaTypeError::Invalid)?;

    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    if essence.is_empty() {
        return Err(MediaTypeError::Missing);
    }

    let (kind, subtype) = essence.split_once('/').ok_or(MediaTypeError::Invalid)?;
    if !is_token(kind) || !is_token(subtype) {
        return Err(MediaTypeError::Invalid);
    }

    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (name, _) = param.split_once('=').ok_or(MediaTypeError::Invalid)?;
        if !is_token(name.trim()) {
            return Err(MediaTypeError::Invalid);
        }
    }

    Ok(essence.to_ascii_lowercase())
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
