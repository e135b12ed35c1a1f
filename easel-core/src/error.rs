//! Error types returned by the inference entry points.
//!
//! Inside the loader and the pipeline everything is `anyhow`; [`Error`] is the
//! boundary type callers match on. [`Error::kind`] collapses the variants into
//! the four categories a host cares about.

use serde::Serialize;

use crate::SchedulerKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was malformed.
    Input,
    /// The requested sampling strategy is unknown or unavailable.
    Scheduler,
    /// The pipeline or the output encoder failed.
    Pipeline,
    /// The model could not be loaded.
    Initialization,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode reference image: {source:#}")]
    ImageDecode {
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown scheduler `{0}`")]
    UnknownScheduler(String),

    #[error("scheduler {0} is not available in the loaded pipeline")]
    UnsupportedScheduler(SchedulerKind),

    #[error("image pipeline failed: {source:#}")]
    Pipeline {
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to encode output image: {source}")]
    ImageEncode {
        #[source]
        source: image::ImageError,
    },

    #[error("model initialization failed: {source:#}")]
    Init {
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::ImageDecode { .. } => ErrorKind::Input,
            Self::UnknownScheduler(_) | Self::UnsupportedScheduler(_) => ErrorKind::Scheduler,
            Self::Pipeline { .. } | Self::ImageEncode { .. } => ErrorKind::Pipeline,
            Self::Init { .. } => ErrorKind::Initialization,
        }
    }
}
