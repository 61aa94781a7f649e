use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::backlog::ReporterError;
use crate::error::{Classify, ErrorClass};
use crate::models::backlog::BacklogSample;

/// POST /api/v1/backlog/report: sample and emit the backlog metric now.
pub async fn report_backlog(
    State(state): State<AppState>,
) -> Result<Json<BacklogSample>, (StatusCode, String)> {
    state.reporter.report_once().await.map(Json).map_err(|e| {
        tracing::error!(
            fleet_id = %state.reporter.fleet_id(),
            error = %e,
            "On-demand backlog report failed"
        );
        (status_for(&e), e.to_string())
    })
}

fn status_for(error: &ReporterError) -> StatusCode {
    match error.class() {
        ErrorClass::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}
