//! Display pipeline error types.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used for loader and decoder causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for display pipeline operations.
pub type DisplayResult<T> = std::result::Result<T, DisplayError>;

/// Errors surfaced by image conversion.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// The unit is animated but its content type has no animated decoder.
    #[error("image is animated but in an unsupported format: {content_type}")]
    UnsupportedAnimatedFormat {
        /// Offending content type.
        content_type: String,
    },

    /// The image bytes could not be decoded.
    #[error("failed to decode {format} image: {source}")]
    DecodeFailure {
        /// Detected or declared format name.
        format: String,
        /// Underlying decoder error.
        #[source]
        source: BoxError,
    },

    /// The loader failed to produce image bytes.
    #[error("failed to load image: {source}")]
    LoadFailure {
        /// Underlying loader error.
        #[source]
        source: BoxError,
    },

    /// A persistent cache file or directory could not be read or written.
    #[error("cache io failure at {}: {source}", path.display())]
    CacheIoFailure {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Every placement id of the session has been issued.
    #[error("placement ids exhausted for this session")]
    PlacementIdsExhausted,
}

impl DisplayError {
    /// Creates an unsupported animated format error.
    #[must_use]
    pub fn unsupported_animated(content_type: impl Into<String>) -> Self {
        Self::UnsupportedAnimatedFormat {
            content_type: content_type.into(),
        }
    }

    /// Creates a decode failure.
    #[must_use]
    pub fn decode(format: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::DecodeFailure {
            format: format.into(),
            source: source.into(),
        }
    }

    /// Creates a load failure.
    #[must_use]
    pub fn load(source: impl Into<BoxError>) -> Self {
        Self::LoadFailure {
            source: source.into(),
        }
    }

    /// Creates a cache I/O failure.
    #[must_use]
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheIoFailure {
            path: path.into(),
            source,
        }
    }

    /// Returns whether the error came from the persistent cache.
    #[must_use]
    pub const fn is_cache_io(&self) -> bool {
        matches!(self, Self::CacheIoFailure { .. })
    }
}
