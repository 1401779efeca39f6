use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::AppState;
use crate::error::{Result, ServeError};
use crate::features::FeatureStream;
use crate::geometry::Crs;
use crate::geometry::projection::reproject_bounds;
use crate::render::encode::{ImageFormat, encode};
use crate::render::{RenderOptions, RgbaBuffer, render};
use crate::source::RasterCatalog;
use crate::xyz_tile::{TileCoordinate, read_tile};

const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

/// Run raster work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServeError::Internal(format!("task join error: {e}")))?
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct SourcesResponse {
    pub sources: Vec<String>,
}

pub async fn list_sources(State(state): State<AppState>) -> Result<Json<SourcesResponse>> {
    let rasters = Arc::clone(&state.rasters);
    let sources = blocking(move || Ok(rasters.list())).await?;
    Ok(Json(SourcesResponse { sources }))
}

#[derive(Debug, Serialize)]
pub struct BoundsResponse {
    pub source: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bounds: [f64; 4],
}

#[instrument(skip(state))]
pub async fn bounds(State(state): State<AppState>, Path(source): Path<String>) -> Result<Json<BoundsResponse>> {
    let rasters = Arc::clone(&state.rasters);
    let id = source.clone();
    let bounds = blocking(move || {
        let raster = rasters.open(&id)?;
        let native = raster.native_bounds();
        if native.crs == Crs::WGS84 {
            Ok(native)
        } else {
            reproject_bounds(&native, native.crs, Crs::WGS84)
        }
    })
    .await?;

    Ok(Json(BoundsResponse {
        source,
        bounds: bounds.to_array(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TileQuery {
    pub source: Option<String>,
    /// Alias for `source`.
    pub filename: Option<String>,
    pub colormap: Option<String>,
    pub rescale: Option<String>,
}

fn png_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, ImageFormat::Png.content_type())], bytes).into_response()
}

fn render_tile(rasters: &RasterCatalog, source: &str, tile: TileCoordinate, options: &RenderOptions) -> Result<Vec<u8>> {
    let tile_size = rasters.tile_size();
    let mut raster = rasters.open(source)?;
    let rgba = match read_tile(&mut raster, tile, tile_size) {
        Ok(window) => render(window, options)?,
        Err(ServeError::TileOutOfBounds) => {
            debug!(%source, zoom = tile.zoom, column = tile.column, row = tile.row, "tile outside raster, returning transparent tile");
            RgbaBuffer::transparent(tile_size, tile_size)
        }
        Err(e) => return Err(e),
    };
    encode(&rgba, ImageFormat::Png)
}

#[instrument(skip(state))]
pub async fn tile(
    State(state): State<AppState>,
    path: std::result::Result<Path<(u32, u32, u32)>, PathRejection>,
    Query(query): Query<TileQuery>,
) -> Result<Response> {
    let Path((z, x, y)) = path?;
    let tile = TileCoordinate::new(z, x, y)?;
    let options = RenderOptions::parse(query.rescale.as_deref(), query.colormap.as_deref())?;
    let source = query
        .source
        .or(query.filename)
        .filter(|s| !s.is_empty())
        .ok_or(ServeError::MissingParameter("source"))?;

    let rasters = Arc::clone(&state.rasters);
    let bytes = blocking(move || render_tile(&rasters, &source, tile, &options)).await?;
    Ok(png_response(bytes))
}

#[instrument(skip(state))]
pub async fn export(State(state): State<AppState>, Path(table): Path<String>) -> Result<Response> {
    let catalog = state
        .features
        .clone()
        .ok_or_else(|| ServeError::DatabaseUnavailable("no database configured".into()))?;

    let resolved = catalog
        .resolve(&table)
        .await?
        .ok_or_else(|| ServeError::TableNotFound(table.clone()))?;
    let cursor = catalog.open_cursor(&resolved).await?;

    let stream = FeatureStream::new(cursor, resolved.qualified()).into_stream();
    Ok(([(header::CONTENT_TYPE, GEOJSON_CONTENT_TYPE)], Body::from_stream(stream)).into_response())
}
