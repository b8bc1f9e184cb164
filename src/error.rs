use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading inputs or configuration.
///
/// The extraction itself never fails; it reports problems as error codes in
/// the result instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid pattern {name}: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
