//! # paperpilot
//!
//! Split scanned multi-document PDF batches into clean, separate PDFs.
//!
//! ## Why this crate?
//!
//! Feeding a stack of paper through a document scanner produces one long PDF.
//! Cutting it back into individual documents by hand is tedious, so the
//! batch is prepared instead: a printed separator sheet goes between
//! documents, blank backsides are left in. This crate watches a drop
//! directory, recognises the separator sheets and blank pages, straightens
//! sideways pages, and on request writes one PDF per document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Watch     notify event or startup scan
//!  ├─ 2. Settle    wait until the file size stops changing
//!  ├─ 3. Accept    new document (Processing), source moved to its working area
//!  ├─ 4. Render    rasterise pages via pdfium (worker pool)
//!  ├─ 5. Classify  separator QR → blank page → orientation (tesseract)
//!  ├─ 6. Review    API layer corrects page status/rotation, renames
//!  └─ 7. Export    one PDF per separated group → output dir; document removed
//! ```
//!
//! Every state change goes through [`DocumentStore`], which persists a JSON
//! snapshot per document and then announces the change to live subscribers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperpilot::{PaperPilot, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .input_dir("scans/in")
//!         .output_dir("scans/out")
//!         .work_dir("scans/work")
//!         .build()?;
//!     let pilot = PaperPilot::open(config).await?;
//!
//!     let mut events = pilot.subscribe();
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{} {}", event.kind(), event.document_id());
//!         }
//!     });
//!
//!     pilot.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paperpilot` binary (clap + anyhow + tracing-subscriber) |
//!
//! ## External tools
//!
//! Rendering needs the pdfium shared library (see
//! [`PipelineConfig::pdfium_lib_path`]). Orientation detection runs the
//! `tesseract` command and is skipped gracefully when it is missing.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod separator;
pub mod service;
pub mod store;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EventQueuePolicy, OverflowPolicy, PipelineConfig, PipelineConfigBuilder};
pub use error::{PageError, PaperPilotError};
pub use events::{DocumentEvent, EventBroadcaster, Subscription};
pub use model::{Document, DocumentStatus, Page, PageStatus, Rotation};
pub use pipeline::export::ExportReport;
pub use pipeline::orientation::{OrientationDetector, OrientationEstimate};
pub use pipeline::render::{PageRasterizer, PageVisitor};
pub use service::{PageUpdate, PaperPilot};
pub use store::{DocumentStore, Rehydration};
