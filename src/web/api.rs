use super::stream::{follow_batch, read_file_from, FollowRequest};
use crate::batch::{is_valid_service_name, BatchDescriptor, BatchId, ListingError, CURRENT_FILE};
use crate::state::SharedState;
use crate::status::{StatusReporter, StatusSnapshot};
use crate::tail::{FollowMode, RequestContext, TailArgs, TailError, TailStart};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

const LOG_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    #[serde(default)]
    pub start: Option<u64>,
    /// Present (with any value) means follow.
    #[serde(default)]
    pub follow: Option<String>,
}

/// GET /status
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusSnapshot> {
    Json(StatusReporter::new(state).snapshot(None).await)
}

/// GET /logs/:service
pub async fn list_service_batches(
    State(state): State<SharedState>,
    Path(service): Path<String>,
) -> Result<Json<Vec<BatchDescriptor>>, ApiError> {
    let batches = state.list_batches(&service).await?;
    Ok(Json(batches))
}

/// GET /logs/:service/batch/:id?start=N&follow
pub async fn get_batch(
    State(state): State<SharedState>,
    Path((service, id)): Path<(String, String)>,
    Query(query): Query<BatchQuery>,
) -> Result<Response, ApiError> {
    if !is_valid_service_name(&service) {
        return Err(ApiError::NotFound);
    }
    let service_dir = state.service_dir(&service);
    if !tokio::fs::try_exists(&service_dir).await.unwrap_or(false) {
        return Err(ApiError::NotFound);
    }
    let batch_id: BatchId = match id.parse() {
        Ok(id) if id > 0 => id,
        _ => return Err(ApiError::NotFound),
    };

    let batches = state.list_batches(&service).await?;
    let batch = batches
        .iter()
        .find(|b| b.batch_id == batch_id)
        .cloned()
        .ok_or(ApiError::NotFound)?;

    let follow = query.follow.is_some();
    tracing::debug!(
        service = %service,
        batch_id,
        file = %batch.file_name,
        start = ?query.start,
        follow,
        "Serving batch"
    );

    let body = if batch.is_current() && follow {
        let request = FollowRequest {
            service,
            batch_id,
            start: query.start,
        };
        follow_batch(state, request, batches)
    } else {
        let path = service_dir.join(&batch.file_name);
        match read_file_from(&path, query.start).await {
            Ok(stream) => Body::from_stream(stream),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
            Err(e) => return Err(ApiError::Internal(e.to_string())),
        }
    };

    Ok(log_response(body))
}

/// GET /logs/:service/tail
pub async fn tail_current(
    State(state): State<SharedState>,
    Path(service): Path<String>,
) -> Result<Response, ApiError> {
    if !is_valid_service_name(&service) {
        return Err(ApiError::NotFound);
    }
    let current = state.service_dir(&service).join(CURRENT_FILE);
    if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
        return Err(ApiError::NotFound);
    }

    let tail = state.tails.start(
        TailArgs::new(current, TailStart::End, FollowMode::Name),
        RequestContext {
            route: "tail".to_string(),
            service,
            batch_id: None,
        },
    )?;

    Ok(log_response(Body::from_stream(tail)))
}

fn log_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, LOG_CONTENT_TYPE)], body).into_response()
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Internal(String),
}

impl From<ListingError> for ApiError {
    fn from(e: ListingError) -> Self {
        match e {
            ListingError::ServiceNotFound(_) => ApiError::NotFound,
            other => {
                tracing::error!(error = %other, "Batch listing failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<TailError> for ApiError {
    fn from(e: TailError) -> Self {
        tracing::error!(error = %e, "Failed to start tail process");
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response(),
        }
    }
}
