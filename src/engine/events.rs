use crate::models::{RequestId, SourceRef};
use crate::services::{DecodeError, ResolveError};
use std::sync::Arc;
use thiserror::Error;

/// Why a load did not produce an image.
///
/// Cloneable so it can travel in [`LoaderEvent::Error`] to every subscriber.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("Failed to decode image: {0}")]
    DecodeFailed(#[source] Arc<DecodeError>),

    #[error("Source unavailable: {uri}: {reason}")]
    SourceUnavailable {
        uri: String,
        #[source]
        reason: Arc<ResolveError>,
    },

    #[error("Load stopped")]
    Stopped,

    #[error("No image available")]
    Empty,

    #[error("Decode worker is not running")]
    WorkerGone,
}

/// Notification emitted by an engine, always from its owning context
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    Done {
        request: RequestId,
        source: SourceRef,
    },
    Error {
        /// `None` when the engine failed with nothing in flight
        request: Option<RequestId>,
        source: Option<SourceRef>,
        error: LoadError,
    },
    Progress {
        request: RequestId,
        fraction: f32,
    },
}

impl LoaderEvent {
    pub fn request(&self) -> Option<RequestId> {
        match self {
            LoaderEvent::Done { request, .. } | LoaderEvent::Progress { request, .. } => Some(*request),
            LoaderEvent::Error { request, .. } => *request,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoaderEvent::Progress { .. })
    }
}
