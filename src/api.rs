//! HTTP read API for recorded locations.
//!
//! Filtered pagination over the `locations` table plus a latest-position
//! lookup per device. Request failures come back as JSON error bodies;
//! nothing here can take the process down.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::ApiConfig;
use crate::database::{Database, LocationFilter, StoredLocation};
use crate::errors::GpsRecorderError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("no locations recorded for device {0}")]
    UnknownDevice(String),

    #[error(transparent)]
    Internal(#[from] GpsRecorderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::UnknownDevice(device_id) => (
                StatusCode::NOT_FOUND,
                format!("no locations recorded for device {device_id}"),
            ),
            ApiError::Internal(e) => {
                // Details go to the log, not to the caller.
                error!("Request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationsQuery {
    pub device_id: Option<String>,
    /// Inclusive lower bound on record time, RFC 3339.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on record time, RFC 3339.
    pub end: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    10
}

/// Page metadata returned alongside every location listing.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total_records: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    /// Metadata for `total_records` rows split into pages of `per_page`.
    ///
    /// A `page` beyond the last one is representable; it simply has
    /// neither a next page nor any rows.
    pub fn new(page: u32, per_page: u32, total_records: i64) -> Self {
        let per = i64::from(per_page);
        let total_pages = (total_records + per - 1) / per;
        Self {
            page,
            per_page,
            total_records,
            total_pages,
            has_next: i64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LocationsResponse {
    pub data: Vec<StoredLocation>,
    pub pagination: Pagination,
}

/// Build the API router.
pub fn router(db: Arc<Database>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/v1/locations", get(list_locations))
        .route("/v1/locations/:device_id/latest", get(latest_position))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(db)
}

/// Bind the API listener and serve until shutdown.
pub async fn serve(config: &ApiConfig, db: Arc<Database>) -> Result<(), GpsRecorderError> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(db)).await?;
    Ok(())
}

async fn list_locations(
    State(db): State<Arc<Database>>,
    Query(params): Query<LocationsQuery>,
) -> Result<Json<LocationsResponse>, ApiError> {
    if params.page < 1 {
        return Err(ApiError::BadRequest("page must be at least 1".to_string()));
    }
    if params.per_page < 1 {
        return Err(ApiError::BadRequest(
            "per_page must be at least 1".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (params.start, params.end) {
        if end < start {
            return Err(ApiError::BadRequest(
                "end must not be earlier than start".to_string(),
            ));
        }
    }

    let filter = LocationFilter {
        device_id: params.device_id,
        start: params.start,
        end: params.end,
        page: params.page,
        per_page: params.per_page,
    };
    let (data, total_records) = db.locations(&filter).await?;

    Ok(Json(LocationsResponse {
        data,
        pagination: Pagination::new(params.page, params.per_page, total_records),
    }))
}

async fn latest_position(
    State(db): State<Arc<Database>>,
    Path(device_id): Path<String>,
) -> Result<Json<StoredLocation>, ApiError> {
    match db.latest_position(&device_id).await? {
        Some(location) => Ok(Json(location)),
        None => Err(ApiError::UnknownDevice(device_id)),
    }
}
