//! Error types for tile rendering and feature export.
//!
//! Every failure site maps to one variant so handlers can pick a status code
//! without inspecting messages.

use thiserror::Error;

/// Errors produced by the tiling pipeline and the feature exporter.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("invalid tile coordinate {zoom}/{column}/{row}")]
    InvalidTileCoordinate { zoom: u32, column: u32, row: u32 },

    #[error("tile does not intersect the raster extent")]
    TileOutOfBounds,

    #[error("raster source not found: {0}")]
    SourceNotFound(String),

    #[error("unsupported raster format: {0}")]
    UnsupportedFormat(String),

    #[error("reprojection failed: {0}")]
    ReprojectionFailed(String),

    #[error("rescale range is degenerate: min and max are both {0}")]
    DegenerateRescaleRange(f64),

    #[error("unknown colormap: {0}")]
    UnknownColormap(String),

    #[error("colormap requires a single-band raster, got {0} bands")]
    ColormapRequiresSingleBand(usize),

    #[error("invalid request path: {0}")]
    InvalidPath(String),

    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid rescale parameter {0:?}: expected \"<min>,<max>\"")]
    InvalidRescaleSyntax(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("feature stream aborted after output began: {0}")]
    MidStreamFailure(String),

    #[error("image buffer is inconsistent: {0}")]
    EncodeInvariantViolation(String),

    #[error("failed to decode raster data: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServeError {
    /// Stable name of the variant, reported alongside the message in JSON errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTileCoordinate { .. } => "InvalidTileCoordinate",
            Self::TileOutOfBounds => "TileOutOfBounds",
            Self::SourceNotFound(_) => "SourceNotFound",
            Self::UnsupportedFormat(_) => "UnsupportedFormat",
            Self::ReprojectionFailed(_) => "ReprojectionFailed",
            Self::DegenerateRescaleRange(_) => "DegenerateRescaleRange",
            Self::UnknownColormap(_) => "UnknownColormap",
            Self::ColormapRequiresSingleBand(_) => "ColormapRequiresSingleBand",
            Self::InvalidPath(_) => "InvalidPath",
            Self::MissingParameter(_) => "MissingParameter",
            Self::InvalidRescaleSyntax(_) => "InvalidRescaleSyntax",
            Self::TableNotFound(_) => "TableNotFound",
            Self::DatabaseUnavailable(_) => "DatabaseUnavailable",
            Self::MidStreamFailure(_) => "MidStreamFailure",
            Self::EncodeInvariantViolation(_) => "EncodeInvariantViolation",
            Self::Decode(_) => "Decode",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<tiff::TiffError> for ServeError {
    fn from(e: tiff::TiffError) -> Self {
        match e {
            tiff::TiffError::FormatError(_) | tiff::TiffError::UnsupportedError(_) => {
                Self::UnsupportedFormat(e.to_string())
            }
            _ => Self::Decode(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for ServeError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseUnavailable(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = ServeError::InvalidTileCoordinate { zoom: 1, column: 2, row: 0 };
        assert_eq!(err.kind(), "InvalidTileCoordinate");
        assert_eq!(err.to_string(), "invalid tile coordinate 1/2/0");

        assert_eq!(ServeError::TableNotFound("x".into()).kind(), "TableNotFound");
    }
}
