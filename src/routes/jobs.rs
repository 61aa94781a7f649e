use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{SubmitJobRequest, SubmitJobResponse};
use crate::models::prediction::PredictionRecord;
use crate::services::{queue::NewJob, results::ResultStore};

/// POST /api/v1/jobs: queue an image for detection.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), StatusCode> {
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let job_id = state
        .queue
        .enqueue(&NewJob {
            photo_path: request.photo_path,
            chat_id: request.chat_id,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to enqueue job");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    tracing::info!(job_id = %job_id, "Job queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: "queued".to_string(),
        }),
    ))
}

/// GET /api/v1/predictions/{prediction_id}: fetch a stored prediction.
pub async fn get_prediction(
    State(state): State<AppState>,
    Path(prediction_id): Path<String>,
) -> Result<Json<PredictionRecord>, StatusCode> {
    match state.results.get(&prediction_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(prediction_id = %prediction_id, error = %e, "Prediction lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
