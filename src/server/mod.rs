//! HTTP surface: router, shared state and error rendering.

pub mod handlers;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::rejection::PathRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::ServeError;
use crate::features::FeatureCatalog;
use crate::source::RasterCatalog;

/// Read-only resources shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub rasters: Arc<RasterCatalog>,
    /// `None` when no database is configured; export then answers 503.
    pub features: Option<Arc<dyn FeatureCatalog>>,
}

impl AppState {
    #[must_use]
    pub fn new(rasters: RasterCatalog, features: Option<Arc<dyn FeatureCatalog>>) -> Self {
        Self {
            rasters: Arc::new(rasters),
            features,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sources", get(handlers::list_sources))
        .route("/bounds/{*source}", get(handlers::bounds))
        .route("/tiles/{z}/{x}/{y}", get(handlers::tile))
        .route("/export/{table}", get(handlers::export))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl ServeError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidTileCoordinate { .. }
            | Self::DegenerateRescaleRange(_)
            | Self::UnknownColormap(_)
            | Self::ColormapRequiresSingleBand(_)
            | Self::InvalidPath(_)
            | Self::MissingParameter(_)
            | Self::InvalidRescaleSyntax(_) => StatusCode::BAD_REQUEST,
            Self::SourceNotFound(_) | Self::TableNotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedFormat(_) | Self::ReprojectionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::TileOutOfBounds
            | Self::MidStreamFailure(_)
            | Self::EncodeInvariantViolation(_)
            | Self::Decode(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PathRejection> for ServeError {
    fn from(rejection: PathRejection) -> Self {
        Self::InvalidPath(rejection.body_text())
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}
