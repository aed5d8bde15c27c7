use std::fmt;
use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Please select a CSV file to upload.")]
    MissingInput,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Service(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Export(String),
}

impl AppError {
    /// Drops the request URL from transport errors; geocoding URLs carry the API key.
    pub fn from_http(err: reqwest::Error) -> Self {
        AppError::Http(err.without_url())
    }

    /// Process exit status for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::MissingInput => 2,
            _ => 1,
        }
    }
}

/// Why a single row could not be geocoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeocodeFailure {
    NotFound,
    OutOfRange,
    Transport(String),
}

impl fmt::Display for GeocodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeocodeFailure::NotFound => f.write_str("not found"),
            GeocodeFailure::OutOfRange => f.write_str("coordinates out of range"),
            GeocodeFailure::Transport(detail) => write!(f, "transport: {detail}"),
        }
    }
}

/// Per-row resolution failure. Caught by the batch coordinator and never propagated
/// past the row that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("ID {id}: could not extract a place name ({reason})")]
    Extraction { id: String, reason: String },
    #[error("ID {id}: could not find latitude and longitude ({reason})")]
    Geocode { id: String, reason: GeocodeFailure },
}

impl ResolveError {
    pub fn extraction(id: &str, reason: impl Into<String>) -> Self {
        ResolveError::Extraction {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn geocode(id: &str, reason: GeocodeFailure) -> Self {
        ResolveError::Geocode {
            id: id.to_string(),
            reason,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ResolveError::Extraction { id, .. } | ResolveError::Geocode { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::Extraction { .. } => "extraction",
            ResolveError::Geocode { .. } => "geocode",
        }
    }
}
