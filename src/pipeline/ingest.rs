//! Acceptance of a stabilised input file into the pipeline.
//!
//! ```text
//! wait_until_stable ─▶ create record (Processing, persisted)
//!                   ─▶ copy to {id}/original.pdf, remove input file
//!                   ─▶ classify on the worker pool
//!                   ─▶ commit Ready (full page list) or Error
//! ```
//!
//! The record exists before any heavy work starts, so a crash mid-way leaves
//! an inspectable entry that rehydration turns into `Error`.

use crate::config::PipelineConfig;
use crate::error::PaperPilotError;
use crate::model::{Document, DocumentStatus};
use crate::pipeline::classify::{classify_document, PageClassifier};
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::stability::{wait_until_stable, Stability};
use crate::store::DocumentStore;
use crate::worker::WorkerPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the source copy inside a document's working area.
pub const ORIGINAL_FILE: &str = "original.pdf";

/// Turns input files into classified documents.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<DocumentStore>,
    workers: WorkerPool,
    rasterizer: Arc<dyn PageRasterizer>,
    classifier: PageClassifier,
    stability_interval: Duration,
    stability_timeout: Duration,
    jpeg_quality: u8,
}

impl Ingestor {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<DocumentStore>,
        workers: WorkerPool,
        rasterizer: Arc<dyn PageRasterizer>,
        classifier: PageClassifier,
    ) -> Self {
        Self {
            store,
            workers,
            rasterizer,
            classifier,
            stability_interval: config.stability_interval,
            stability_timeout: config.stability_timeout,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Full ingestion of one input file.
    ///
    /// Returns the document in its final state (`Ready` or `Error`), or
    /// `None` when the file vanished before it settled or the document was
    /// deleted while it was being classified.
    pub async fn ingest(&self, path: &Path) -> Result<Option<Document>, PaperPilotError> {
        let stability =
            wait_until_stable(path, self.stability_interval, self.stability_timeout).await;
        if !stability.should_ingest() {
            return Ok(None);
        }
        if let Stability::Stable(bytes) = stability {
            debug!("'{}' ready ({} bytes)", path.display(), bytes);
        }

        let doc = self.accept(path).await?;
        if doc.status == DocumentStatus::Error {
            return Ok(Some(doc));
        }
        self.classify(&doc.id).await
    }

    /// Create the record and move the file into the working area.
    ///
    /// A failure after the record exists marks it `Error` instead of
    /// returning `Err`.
    pub async fn accept(&self, path: &Path) -> Result<Document, PaperPilotError> {
        let id = Uuid::new_v4().to_string();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{id}.pdf"));

        let doc = Document::new(&id, filename);
        self.store.create(doc.clone()).await?;
        info!(doc_id = %id, file = %doc.original_filename, "Document accepted");

        let dest = self.source_path(&id);
        if let Err(e) = move_into_work_area(path, &dest).await {
            error!(doc_id = %id, "Could not take over '{}': {}", path.display(), e);
            return self.set_error(&id).await;
        }
        Ok(doc)
    }

    /// Classify an accepted document and commit the outcome.
    pub async fn classify(&self, id: &str) -> Result<Option<Document>, PaperPilotError> {
        let doc_id = id.to_string();
        let pdf_path = self.source_path(id);
        let doc_dir = self.store.document_dir(id);
        let rasterizer = Arc::clone(&self.rasterizer);
        let classifier = self.classifier.clone();
        let quality = self.jpeg_quality;

        let outcome = self
            .workers
            .run("classify", move || {
                classify_document(
                    &doc_id,
                    &pdf_path,
                    &doc_dir,
                    rasterizer.as_ref(),
                    &classifier,
                    quality,
                )
            })
            .await
            .and_then(|r| r);

        let committed = match outcome {
            Ok(pages) => {
                self.store
                    .modify(id, move |d| {
                        d.pages = pages;
                        d.status = DocumentStatus::Ready;
                        Ok(())
                    })
                    .await
            }
            Err(e) => {
                error!(doc_id = id, "Classification failed: {}", e);
                self.set_error(id).await
            }
        };

        match committed {
            Ok(doc) => {
                info!(
                    doc_id = id,
                    status = ?doc.status,
                    pages = doc.pages.len(),
                    "Document processed"
                );
                Ok(Some(doc))
            }
            Err(e) if e.is_not_found() => {
                info!(doc_id = id, "Document deleted during classification");
                // Rendering may have recreated part of the working area.
                let _ = tokio::fs::remove_dir_all(self.store.document_dir(id)).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn source_path(&self, id: &str) -> PathBuf {
        self.store.document_dir(id).join(ORIGINAL_FILE)
    }

    async fn set_error(&self, id: &str) -> Result<Document, PaperPilotError> {
        self.store
            .modify(id, |d| {
                d.status = DocumentStatus::Error;
                Ok(())
            })
            .await
    }
}

/// Copy `src` to `dest`, then remove `src`. Input and working areas may be
/// on different filesystems, so no rename.
async fn move_into_work_area(src: &Path, dest: &Path) -> Result<(), PaperPilotError> {
    tokio::fs::copy(src, dest)
        .await
        .map_err(|e| PaperPilotError::io(src, e))?;
    if let Err(e) = tokio::fs::remove_file(src).await {
        // Keep a single copy: the input file stays where it was.
        let _ = tokio::fs::remove_file(dest).await;
        warn!("Could not remove '{}' from the input directory", src.display());
        return Err(PaperPilotError::io(src, e));
    }
    Ok(())
}
