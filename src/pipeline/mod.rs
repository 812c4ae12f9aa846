//! Pipeline stages from input file to exported PDFs.
//!
//! Each submodule implements exactly one step, so every step is testable on
//! its own and the heavy backends (pdfium, tesseract) sit behind traits that
//! tests replace with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! watch ──▶ stability ──▶ ingest ──▶ render ──▶ classify ──▶ (store) ──▶ export
//! (notify)  (size poll)   (record,   (pdfium)   (QR, blank,              (lopdf)
//!                          copy)                 orientation)
//! ```
//!
//! 1. [`watch`]     — notify watch + startup scan feeding a one-way queue
//! 2. [`stability`] — wait until the writer has finished the file
//! 3. [`ingest`]    — create the document record and move the file into its
//!    working area, then drive classification on the worker pool
//! 4. [`render`]    — rasterise pages; runs on a blocking worker because
//!    pdfium is not async-safe
//! 5. [`classify`]  — separator → blank → orientation, per page
//! 6. [`orientation`] — tesseract OSD wrapper used by `classify`
//! 7. [`export`]    — partition pages into output PDFs, all-or-nothing

pub mod classify;
pub mod export;
pub mod ingest;
pub mod orientation;
pub mod render;
pub mod stability;
pub mod watch;
