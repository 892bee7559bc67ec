//! Error types for document and relational store access.

use thiserror::Error;

/// Errors surfaced by [`crate::document::DocumentStore`] and the relational
/// repositories. Never retried by the store itself; the caller (ingestion
/// service, correlation engine, ...) decides whether to continue past a
/// failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection to the document store failed: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("document store returned a transport/protocol mismatch: {0}")]
    Transport(String),

    #[error("document or index not found: {0}")]
    NotFound(String),

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("relational store error: {0}")]
    Relational(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
