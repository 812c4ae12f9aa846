//! Error types for the paperpilot library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PaperPilotError`] — **Fatal for one operation**: the document cannot be
//!   found, the source PDF is unreadable, an export write failed. Returned as
//!   `Err(PaperPilotError)` from store, pipeline and service calls. A fatal
//!   error for one document never affects any other document.
//!
//! * [`PageError`] — **Non-fatal**: a single classification sub-step failed
//!   for one page (QR decode, orientation detection). The classifier logs it
//!   and falls back to a safe default (not a separator, rotation 0) and moves
//!   on to the next page.

use crate::model::DocumentStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paperpilot library.
#[derive(Debug, Error)]
pub enum PaperPilotError {
    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No document with this id is held by the store.
    #[error("Document '{id}' not found")]
    DocumentNotFound { id: String },

    /// The page number is outside the document's page list.
    #[error("Page {page} not found in document '{id}' ({total} pages)")]
    PageNotFound { id: String, page: usize, total: usize },

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// The document is still being classified.
    #[error("Document '{id}' is not ready (status: {status:?})")]
    DocumentNotReady { id: String, status: DocumentStatus },

    /// Status transitions are only Processing → Ready and Processing → Error.
    #[error("Document '{id}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// An update tried to change a field that is fixed after creation.
    #[error("Document '{id}': field '{field}' cannot be changed")]
    ImmutableField { id: String, field: &'static str },

    /// Rotation must be one of 0, 90, 180, 270.
    #[error("Invalid rotation {0}: expected 0, 90, 180 or 270")]
    InvalidRotation(i64),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib-path) to the directory containing libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// Building or writing the split output failed. Nothing was written.
    #[error("Export of document '{id}' failed: {detail}")]
    ExportFailed { id: String, detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A snapshot could not be serialised or parsed.
    #[error("Snapshot error for '{path}': {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Watcher errors ────────────────────────────────────────────────────
    /// The directory watch could not be registered.
    #[error("Failed to watch '{path}': {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panicked, runtime shut down).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaperPilotError {
    /// Wrap an `io::Error` together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PaperPilotError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "unknown document / out-of-range page" family that the
    /// API layer reports as not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PaperPilotError::DocumentNotFound { .. } | PaperPilotError::PageNotFound { .. }
        )
    }
}

/// A non-fatal error for a single page classification sub-step.
///
/// Never escapes the classifier: it is logged and replaced by a default.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// QR detection or decoding failed.
    #[error("Page {page}: separator decode failed: {detail}")]
    DecodeFailed { page: usize, detail: String },

    /// The orientation tool failed or produced output we could not parse.
    #[error("Page {page}: orientation detection failed: {detail}")]
    OrientationFailed { page: usize, detail: String },
}
