use thiserror::Error;

use crate::model::PinId;

/// Failures surfaced by store operations.
#[derive(Debug, Error)]
pub enum PinError {
    #[error("request did not complete: {0}")]
    Network(String),
    #[error("not permitted to modify this pin (status {status})")]
    Authorization { status: u16 },
    #[error("server rejected the request (status {status})")]
    Rejected { status: u16 },
    #[error(transparent)]
    Validation(#[from] StagingError),
    #[error("pin {0} is no longer part of the current collection")]
    StaleTarget(PinId),
    #[error("result superseded by a newer request")]
    Superseded,
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl PinError {
    /// Stale results are dropped quietly rather than reported.
    pub fn is_stale(&self) -> bool {
        matches!(self, PinError::StaleTarget(_) | PinError::Superseded)
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, PinError::Authorization { .. })
    }
}

impl From<reqwest::Error> for PinError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PinError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            PinError::Rejected {
                status: status.as_u16(),
            }
        } else {
            PinError::Network(err.to_string())
        }
    }
}

/// Draft problems caught before any request is issued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StagingError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("no map location captured for the new pin")]
    MissingCoordinate,
    #[error("section {index} does not exist ({len} sections)")]
    SectionOutOfBounds { index: usize, len: usize },
    #[error("file is not a supported image (png, jpeg, gif, webp, bmp)")]
    UnsupportedImage,
    #[error("image could not be decoded: {0}")]
    CorruptImage(String),
    #[error("image is {len} bytes, limit is {limit}")]
    ImageTooLarge { len: usize, limit: usize },
    #[error("coordinate out of range: {lat}, {lon}")]
    InvalidCoordinate { lat: String, lon: String },
}
