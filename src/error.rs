//! Error taxonomy for the ingestion and retrieval engine.
//!
//! Most functions return [`anyhow::Result`] and attach context with `?`.
//! Errors that a caller may need to branch on are raised as an
//! [`IndexError`] variant so they can be recovered with
//! `err.downcast_ref::<IndexError>()`.
//!
//! | Variant | Raised by | Policy |
//! |---------|-----------|--------|
//! | [`IndexError::Configuration`] | registry, ingest, config | fatal to the single call, before any mutation |
//! | [`IndexError::TransientBackend`] | embedding, vector store | retried, then degraded or recorded |
//! | [`IndexError::Parse`] | extract (via `From<ExtractError>`), ingest | recorded as an ingest failure, never fatal |
//! | [`IndexError::Consistency`] | stats | surfaced for repair via forced reingest |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("backend unavailable: {0}")]
    TransientBackend(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("consistency error: {0}")]
    Consistency(String),
}

impl IndexError {
    pub fn config(msg: impl Into<String>) -> Self {
        IndexError::Configuration(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        IndexError::TransientBackend(msg.into())
    }

    /// True if `err` (or anything in its chain) is a configuration error.
    pub fn is_configuration(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<IndexError>(),
                Some(IndexError::Configuration(_))
            )
        })
    }
}
