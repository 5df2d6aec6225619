//! Incident HTTP API: ingestion, query, status updates, and stats.
//!
//! The ingestion path is the durability boundary of the whole system:
//! persist first, publish second, never the other way around. A dispatch
//! failure after a successful write downgrades the response to a warning;
//! it never rolls the write back.

use crate::dispatch::{DeliveryReport, Event};
use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use beacon_incidents::{
    create_incident, get_incident, incident_stats, list_incidents, update_status,
    validate_submission, Cursor, Incident, IncidentDraft, IncidentFilter, IncidentPage,
    IncidentStats, IncidentSubmission, StoreError,
};
use beacon_types::{FieldError, IncidentStatus, IncidentType, INCIDENTS_CHANNEL};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Runs a store operation on a blocking thread, bounded by the configured
/// operation timeout.
async fn run_store_op<T, F>(state: &Arc<AppState>, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    let op_timeout = Duration::from_millis(state.config.ingest.op_timeout_ms);

    let task = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        op(&conn)
    });

    match tokio::time::timeout(op_timeout, task).await {
        Err(_) => Err(ApiError::Storage(
            "timed out waiting for the incident store".to_string(),
        )),
        Ok(Err(e)) => Err(ApiError::Internal(format!("store task failed: {e}"))),
        Ok(Ok(result)) => result.map_err(ApiError::from),
    }
}

/// Persists a validated draft with bounded retry on transient failures.
///
/// Each attempt is individually bounded by the operation timeout; backoff
/// doubles between attempts. Non-transient errors surface immediately.
async fn persist_with_retry(
    state: &Arc<AppState>,
    draft: IncidentDraft,
) -> Result<Incident, ApiError> {
    let max_attempts = state.config.ingest.max_attempts.max(1);
    let op_timeout = Duration::from_millis(state.config.ingest.op_timeout_ms);
    let mut backoff = Duration::from_millis(state.config.ingest.retry_backoff_ms);

    for attempt in 1..=max_attempts {
        let pool = state.pool.clone();
        let draft = draft.clone();
        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            create_incident(&conn, &draft)
        });

        let result = match tokio::time::timeout(op_timeout, task).await {
            Err(_) => {
                return Err(ApiError::Storage(
                    "timed out waiting for the incident store".to_string(),
                ))
            }
            Ok(Err(e)) => return Err(ApiError::Internal(format!("persistence task failed: {e}"))),
            Ok(Ok(result)) => result,
        };

        match result {
            Ok(incident) => {
                if attempt > 1 {
                    tracing::info!(attempt, incident_id = %incident.incident_id, "incident persisted after retry");
                }
                return Ok(incident);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(attempt, error = %e, "transient storage failure, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) if e.is_transient() => {
                return Err(ApiError::Storage(format!(
                    "storage unavailable after {max_attempts} attempts: {e}"
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Unreachable: every loop arm returns on the final attempt.
    Err(ApiError::Storage("storage unavailable".to_string()))
}

/// Builds the success response, downgrading to a warning when broadcast was
/// degraded. The incident is committed either way.
fn respond_with_dispatch(
    incident: Incident,
    report: DeliveryReport,
    success_status: StatusCode,
) -> (StatusCode, Json<Value>) {
    if report.is_degraded() {
        tracing::warn!(
            incident_id = %incident.incident_id,
            channel = %report.channel,
            failed = report.failed.len(),
            subscribers = report.subscribers,
            "incident committed but broadcast degraded"
        );
        (
            StatusCode::OK,
            Json(json!({
                "incident": incident,
                "warning": {
                    "kind": "dispatch_degraded",
                    "message": format!(
                        "incident stored, but delivery failed for {} of {} subscribers",
                        report.failed.len(),
                        report.subscribers
                    ),
                },
            })),
        )
    } else {
        (success_status, Json(json!({ "incident": incident })))
    }
}

/// POST /api/incidents
pub async fn report_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<IncidentSubmission>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // 1. Pure validation; a bad payload never touches storage.
    let draft = validate_submission(&payload).map_err(ApiError::Validation)?;

    // 2. Durable persistence. Failure here means no event is ever published.
    let incident = persist_with_retry(&state, draft).await?;

    // 3. Fan out the committed event. Dispatch problems are non-fatal.
    let report = state
        .dispatcher
        .publish(INCIDENTS_CHANNEL, Event::reported(incident.clone()))
        .await;

    Ok(respond_with_dispatch(incident, report, StatusCode::CREATED))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub incident_type: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

fn parse_filter(params: &ListParams) -> Result<IncidentFilter, ApiError> {
    let mut errors = Vec::new();

    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(label) => match label.parse::<IncidentStatus>() {
            Ok(status) => Some(status),
            Err(e) => {
                errors.push(FieldError::new("status", e.to_string()));
                None
            }
        },
    };

    let incident_type = match params.incident_type.as_deref() {
        None | Some("") => None,
        Some(label) => match label.parse::<IncidentType>() {
            Ok(ty) => Some(ty),
            Err(e) => {
                errors.push(FieldError::new("type", e.to_string()));
                None
            }
        },
    };

    let cursor = match params.cursor.as_deref() {
        None | Some("") => None,
        Some(token) => match Cursor::parse(token) {
            Some(cursor) => Some(cursor),
            None => {
                errors.push(FieldError::new("cursor", "malformed pagination cursor"));
                None
            }
        },
    };

    if errors.is_empty() {
        Ok(IncidentFilter {
            status,
            incident_type,
            cursor,
        })
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// GET /api/incidents
pub async fn list_incidents_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<IncidentPage>, ApiError> {
    let filter = parse_filter(&params)?;
    let limit = params.limit;

    let page = run_store_op(&state, move |conn| list_incidents(conn, &filter, limit)).await?;
    Ok(Json(page))
}

/// GET /api/incidents/:incidentId
pub async fn get_incident_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    let incident = run_store_op(&state, move |conn| get_incident(conn, &incident_id)).await?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

/// PATCH /api/incidents/:incidentId/status
pub async fn update_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(incident_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let new_status = match payload.status.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(ApiError::Validation(vec![FieldError::new(
                "status",
                "status is required",
            )]))
        }
        Some(label) => label.parse::<IncidentStatus>().map_err(|e| {
            ApiError::Validation(vec![FieldError::new("status", e.to_string())])
        })?,
    };

    let incident =
        run_store_op(&state, move |conn| update_status(conn, &incident_id, new_status)).await?;

    // Status changes fan out on the same channel as new reports, with the
    // same persist-then-publish guarantee.
    let report = state
        .dispatcher
        .publish(INCIDENTS_CHANNEL, Event::status_changed(incident.clone()))
        .await;

    Ok(respond_with_dispatch(incident, report, StatusCode::OK))
}

/// GET /api/incidents/stats
pub async fn get_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<IncidentStats>, ApiError> {
    let stats = run_store_op(&state, incident_stats).await?;
    Ok(Json(stats))
}
