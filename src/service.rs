//! [`PaperPilot`]: the operations the API layer calls.
//!
//! One explicitly constructed instance owns the store, the event broadcaster,
//! the worker pool and the ingestion machinery, and hands them to the
//! pipeline by reference. There is no process-wide state: tests build as
//! many independent instances as they like.

use crate::config::PipelineConfig;
use crate::error::PaperPilotError;
use crate::events::{EventBroadcaster, Subscription};
use crate::model::{Document, DocumentStatus, PageStatus, Rotation};
use crate::pipeline::classify::PageClassifier;
use crate::pipeline::export::{write_outputs, ExportReport};
use crate::pipeline::ingest::{Ingestor, ORIGINAL_FILE};
use crate::pipeline::orientation::{OrientationDetector, TesseractOrientation};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::watch::InputWatcher;
use crate::separator;
use crate::store::{DocumentStore, Rehydration};
use crate::worker::WorkerPool;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Requested change to one page. `None` fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageUpdate {
    pub status: Option<PageStatus>,
    pub rotation: Option<Rotation>,
}

/// A running PaperPilot instance.
pub struct PaperPilot {
    config: PipelineConfig,
    store: Arc<DocumentStore>,
    workers: WorkerPool,
    ingestor: Ingestor,
    exporting: Arc<Mutex<HashSet<String>>>,
}

impl PaperPilot {
    /// Open an instance with the production backends: pdfium for rendering
    /// and tesseract for orientation (when enabled).
    ///
    /// Creates missing directories, verifies pdfium can be loaded, and
    /// rehydrates documents left from a previous run.
    pub async fn open(config: PipelineConfig) -> Result<Self, PaperPilotError> {
        let rasterizer = PdfiumRasterizer::new(&config);
        rasterizer.check()?;
        let orientation: Option<Arc<dyn OrientationDetector>> = if config.orientation_enabled {
            Some(Arc::new(TesseractOrientation::new(&config.tesseract_cmd)))
        } else {
            None
        };
        Self::with_components(config, Arc::new(rasterizer), orientation).await
    }

    /// Open an instance with caller-supplied rendering and orientation backends.
    pub async fn with_components(
        config: PipelineConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        orientation: Option<Arc<dyn OrientationDetector>>,
    ) -> Result<Self, PaperPilotError> {
        Self::assemble(config, rasterizer, orientation, Rehydration::Recover).await
    }

    /// Open the working area of a service that may be running elsewhere,
    /// for one-shot queries and edits.
    ///
    /// Loading writes nothing: documents still being classified by the live
    /// service stay `Processing` instead of being recovered as `Error`.
    /// pdfium is not loaded.
    pub async fn attach(config: PipelineConfig) -> Result<Self, PaperPilotError> {
        let rasterizer = Arc::new(PdfiumRasterizer::new(&config));
        Self::assemble(config, rasterizer, None, Rehydration::ReadOnly).await
    }

    async fn assemble(
        config: PipelineConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        orientation: Option<Arc<dyn OrientationDetector>>,
        rehydration: Rehydration,
    ) -> Result<Self, PaperPilotError> {
        config.ensure_dirs()?;

        let events = Arc::new(EventBroadcaster::new(config.event_queue));
        let store = Arc::new(DocumentStore::new(&config.work_dir, events));
        store.rehydrate(rehydration).await?;

        let workers = WorkerPool::new(config.worker_concurrency);
        let classifier = PageClassifier::new(&config, orientation);
        let ingestor = Ingestor::new(
            &config,
            Arc::clone(&store),
            workers.clone(),
            rasterizer,
            classifier,
        );

        info!(
            input = %config.input_dir.display(),
            output = %config.output_dir.display(),
            work = %config.work_dir.display(),
            workers = workers.concurrency(),
            "PaperPilot ready"
        );
        Ok(Self {
            config,
            store,
            workers,
            ingestor,
            exporting: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// All documents, newest first.
    pub async fn list_documents(&self) -> Vec<Document> {
        self.store.list().await
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, PaperPilotError> {
        self.store.require(id).await
    }

    // ── Edits ────────────────────────────────────────────────────────────

    /// Set the name used for exported files. An empty name reverts to the
    /// original file name.
    pub async fn rename_document(&self, id: &str, name: &str) -> Result<Document, PaperPilotError> {
        let name = name.trim();
        let display_name = (!name.is_empty()).then(|| name.to_string());
        self.store
            .modify(id, move |d| {
                d.display_name = display_name;
                Ok(())
            })
            .await
    }

    /// Correct one page's status and/or rotation.
    pub async fn update_page(
        &self,
        id: &str,
        page_number: usize,
        update: PageUpdate,
    ) -> Result<Document, PaperPilotError> {
        self.store
            .modify(id, move |d| {
                let page = d.page_mut(page_number)?;
                if let Some(status) = update.status {
                    page.status = status;
                }
                if let Some(rotation) = update.rotation {
                    page.rotation = rotation;
                }
                Ok(())
            })
            .await
    }

    // ── Terminal operations ──────────────────────────────────────────────

    /// Split the document into output PDFs, then delete it.
    ///
    /// `Ok(None)` when the document does not exist (already exported or
    /// deleted) or another export of it is in progress. On error the
    /// document is untouched and no output file remains.
    pub async fn export_document(&self, id: &str) -> Result<Option<ExportReport>, PaperPilotError> {
        let Some(_guard) = ExportGuard::acquire(&self.exporting, id) else {
            debug!(doc_id = id, "Export already in progress");
            return Ok(None);
        };
        let Some(doc) = self.store.get(id).await else {
            debug!(doc_id = id, "Export of unknown document ignored");
            return Ok(None);
        };
        if doc.status == DocumentStatus::Processing {
            return Err(PaperPilotError::DocumentNotReady {
                id: doc.id,
                status: doc.status,
            });
        }

        let source = self.store.document_dir(id).join(ORIGINAL_FILE);
        let output_dir = self.config.output_dir.clone();
        let base = doc.export_base_name();
        let report = self
            .workers
            .run("export", move || {
                write_outputs(&doc.id, &base, &doc.pages, &source, &output_dir)
            })
            .await??;

        self.store.delete(id).await?;
        info!(
            doc_id = id,
            files = report.outputs.len(),
            pages = report.total_pages(),
            "Document exported"
        );
        Ok(Some(report))
    }

    /// Remove a document and its working area. `false` if it did not exist.
    pub async fn delete_document(&self, id: &str) -> Result<bool, PaperPilotError> {
        self.store.delete(id).await
    }

    // ── Separator sheet ──────────────────────────────────────────────────

    /// The printable separator sheet as PDF bytes.
    pub fn separator_sheet(&self) -> Result<Vec<u8>, PaperPilotError> {
        separator::separator_sheet(&self.config.separator_token)
    }

    /// Write the separator sheet into the working root and return its path.
    pub async fn write_separator_sheet(&self) -> Result<PathBuf, PaperPilotError> {
        separator::write_separator_sheet(&self.config.work_dir, &self.config.separator_token).await
    }

    // ── Live events and ingestion ────────────────────────────────────────

    /// Subscribe to document events. Drop the handle to unsubscribe.
    pub fn subscribe(&self) -> Subscription {
        self.store.events().subscribe()
    }

    /// Ingest one file directly, bypassing the watcher. Returns once the
    /// document is classified.
    pub async fn ingest_file(&self, path: &Path) -> Result<Option<Document>, PaperPilotError> {
        self.ingestor.ingest(path).await
    }

    /// Watch the input directory until `shutdown` resolves.
    ///
    /// Files already present are ingested first. On shutdown no new files
    /// are accepted and ingestions in flight run to completion.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), PaperPilotError>
    where
        F: Future<Output = ()>,
    {
        let watcher = InputWatcher::start(&self.config)?;
        watcher.run(self.ingestor.clone(), shutdown).await;
        info!("Watcher stopped");
        Ok(())
    }
}

/// Marks a document as being exported until dropped.
struct ExportGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl ExportGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            id: id.to_string(),
        })
    }
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(&self.id);
    }
}
