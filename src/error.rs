//! Renderer error type

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by `load` and `render`.
///
/// None of these are recovered locally; they unwind to the caller of the
/// renderer, which is expected to end the session.
#[derive(Error, Debug)]
pub enum RendererError {
    /// A device allocation or pipeline compilation failed.
    #[error("Failed to create {resource}: {source}")]
    ResourceCreation {
        resource: String,
        #[source]
        source: BackendError,
    },
    /// Tracked state, recorder state or slot index was not what the operation required.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Invalid mip chain: {0}")]
    InvalidMipChain(String),
    #[error("Failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RendererError {
    pub(crate) fn resource_creation(resource: impl Into<String>, source: BackendError) -> Self {
        Self::ResourceCreation {
            resource: resource.into(),
            source,
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

pub type RendererResult<T> = Result<T, RendererError>;
