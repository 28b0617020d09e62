//! Wine catalogue handlers.
//!
//! Each mutation commits to the store first and only then publishes exactly
//! one event to the hub. A failed mutation publishes nothing.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path,
    },
    http::StatusCode,
    response::Json,
};
use cellar_db::DbPool;
use cellar_types::{Wine, WineDraft, WineEvent, WineId};
use cellar_wines::{create_wine, delete_wine, get_wine, list_wines, update_wine, WineError};
use std::sync::Arc;

/// Maximum length, in bytes, of any free-text wine field.
const MAX_TEXT_LEN: usize = 256;

impl From<WineError> for ApiError {
    fn from(e: WineError) -> Self {
        match e {
            WineError::NotFound(_) => ApiError::NotFound(e.to_string()),
            WineError::Database(ref err) => {
                tracing::error!(error = %err, "wine operation failed");
                ApiError::InternalServerError("database error".to_string())
            }
        }
    }
}

/// Runs a store operation on the blocking pool with a pooled connection.
async fn with_connection<T, F>(pool: &DbPool, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, WineError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "failed to get db connection");
            ApiError::InternalServerError(format!("db connection failed: {}", e))
        })?;
        op(&conn).map_err(ApiError::from)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "wine task join error");
        ApiError::InternalServerError("task join error".to_string())
    })?
}

fn validate_draft(draft: &WineDraft) -> Result<(), ApiError> {
    if draft.name.trim().is_empty() || draft.name.len() > MAX_TEXT_LEN {
        return Err(ApiError::BadRequest(format!(
            "name must be 1..={MAX_TEXT_LEN} bytes"
        )));
    }
    if draft.production_date.trim().is_empty() || draft.production_date.len() > MAX_TEXT_LEN {
        return Err(ApiError::BadRequest(format!(
            "productionDate must be 1..={MAX_TEXT_LEN} bytes"
        )));
    }
    if draft.origin.len() > MAX_TEXT_LEN {
        return Err(ApiError::BadRequest(format!(
            "origin must be at most {MAX_TEXT_LEN} bytes"
        )));
    }
    if !draft.price.is_finite() || draft.price < 0.0 {
        return Err(ApiError::BadRequest(
            "price must be a non-negative number".to_string(),
        ));
    }
    if !draft.alcohol_degree.is_finite() || !(0.0..=100.0).contains(&draft.alcohol_degree) {
        return Err(ApiError::BadRequest(
            "alcoholDegree must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

/// Path and body extractors, kept as `Result`s so that malformed input is
/// reported as a JSON 400 like every other failure.
type WinePath = Result<Path<WineId>, PathRejection>;
type WineBody = Result<Json<WineDraft>, JsonRejection>;

/// Hands a committed change to the hub.
///
/// The mutation has already happened, so a failure here is logged rather
/// than returned to the client.
fn publish(state: &AppState, event: WineEvent) {
    if let Err(e) = state.hub.broadcast(&event) {
        tracing::error!(
            event_type = event.kind().as_str(),
            wine_id = event.wine_id(),
            error = %e,
            "failed to broadcast wine event"
        );
    }
}

/// GET /wines
pub async fn list_wines_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Wine>>, ApiError> {
    let wines = with_connection(&state.pool, |conn| list_wines(conn)).await?;
    Ok(Json(wines))
}

/// GET /wines/{id}
pub async fn get_wine_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: WinePath,
) -> Result<Json<Wine>, ApiError> {
    let Path(id) = path?;
    let wine = with_connection(&state.pool, move |conn| get_wine(conn, id)).await?;
    Ok(Json(wine))
}

/// POST /wines
pub async fn create_wine_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: WineBody,
) -> Result<(StatusCode, Json<Wine>), ApiError> {
    let Json(draft) = body?;
    validate_draft(&draft)?;

    let wine = with_connection(&state.pool, move |conn| create_wine(conn, &draft)).await?;

    publish(&state, WineEvent::created(wine.clone()));
    tracing::info!(wine_id = wine.id, name = %wine.name, "wine created");
    Ok((StatusCode::CREATED, Json(wine)))
}

/// PUT /wines/{id}
pub async fn update_wine_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: WinePath,
    body: WineBody,
) -> Result<Json<Wine>, ApiError> {
    let Path(id) = path?;
    let Json(draft) = body?;
    validate_draft(&draft)?;

    let wine = with_connection(&state.pool, move |conn| update_wine(conn, id, &draft)).await?;

    publish(&state, WineEvent::updated(wine.clone()));
    tracing::info!(wine_id = id, "wine updated");
    Ok(Json(wine))
}

/// DELETE /wines/{id}
pub async fn delete_wine_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: WinePath,
) -> Result<StatusCode, ApiError> {
    let Path(id) = path?;
    with_connection(&state.pool, move |conn| delete_wine(conn, id)).await?;

    publish(&state, WineEvent::deleted(id));
    tracing::info!(wine_id = id, "wine deleted");
    Ok(StatusCode::NO_CONTENT)
}
