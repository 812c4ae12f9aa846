//! Document State Store: the single authoritative table of documents.
//!
//! Every mutation goes through one commit path that, while holding the
//! table's write lock:
//!
//! 1. validates the change against the lifecycle rules,
//! 2. rewrites the document's `state.json` snapshot (temp file + rename),
//! 3. swaps the in-memory value,
//! 4. announces the change on the [`EventBroadcaster`].
//!
//! A reader therefore never sees a value that is not yet durable, and a
//! subscriber never hears about one. Callers only ever get clones; to change
//! a document they hand a whole new value back ([`DocumentStore::update`]) or
//! edit it in place under the lock ([`DocumentStore::modify`]). Two callers
//! editing the same document concurrently are not reconciled: the last
//! commit wins.

use crate::error::PaperPilotError;
use crate::events::{DocumentEvent, EventBroadcaster};
use crate::model::{Document, DocumentStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// File name of the per-document snapshot inside its working area.
pub const SNAPSHOT_FILE: &str = "state.json";

/// Which event a commit announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitKind {
    Created,
    Updated,
}

/// How [`DocumentStore::rehydrate`] treats documents found in `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rehydration {
    /// Owning service: an interrupted document becomes `Error`, on disk too.
    Recover,
    /// Another process looking at the working area: load as found, write nothing.
    ReadOnly,
}

/// In-memory document table mirrored to per-document snapshots.
pub struct DocumentStore {
    work_dir: PathBuf,
    docs: RwLock<HashMap<String, Document>>,
    events: Arc<EventBroadcaster>,
}

impl DocumentStore {
    /// An empty store rooted at `work_dir`. Call [`rehydrate`](Self::rehydrate)
    /// to load documents left over from a previous run.
    pub fn new(work_dir: impl Into<PathBuf>, events: Arc<EventBroadcaster>) -> Self {
        Self {
            work_dir: work_dir.into(),
            docs: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Working area of one document.
    pub fn document_dir(&self, id: &str) -> PathBuf {
        self.work_dir.join(id)
    }

    /// Path of one document's snapshot.
    pub fn snapshot_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join(SNAPSHOT_FILE)
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// All documents, newest first.
    pub async fn list(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.docs.read().await.values().cloned().collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        docs
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().await.get(id).cloned()
    }

    /// Like [`get`](Self::get) but with a `DocumentNotFound` error.
    pub async fn require(&self, id: &str) -> Result<Document, PaperPilotError> {
        self.get(id)
            .await
            .ok_or_else(|| PaperPilotError::DocumentNotFound { id: id.to_string() })
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    // ── Mutations ─────────────────────────────────────────────────────────

    /// Register a new document and persist its first snapshot.
    ///
    /// The working area directory is created if missing.
    pub async fn create(&self, doc: Document) -> Result<(), PaperPilotError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(&doc.id) {
            return Err(PaperPilotError::Internal(format!(
                "Document '{}' already exists",
                doc.id
            )));
        }
        let dir = self.document_dir(&doc.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PaperPilotError::io(&dir, e))?;
        self.commit(&mut docs, doc, CommitKind::Created).await
    }

    /// Replace a document wholesale (read-modify-write by the caller).
    pub async fn update(&self, doc: Document) -> Result<(), PaperPilotError> {
        let mut docs = self.docs.write().await;
        let current = docs
            .get(&doc.id)
            .ok_or_else(|| PaperPilotError::DocumentNotFound { id: doc.id.clone() })?;
        validate_update(current, &doc)?;
        self.commit(&mut docs, doc, CommitKind::Updated).await
    }

    /// Edit a document in place under the store lock and commit the result.
    ///
    /// If `edit` fails nothing is committed.
    pub async fn modify<F>(&self, id: &str, edit: F) -> Result<Document, PaperPilotError>
    where
        F: FnOnce(&mut Document) -> Result<(), PaperPilotError>,
    {
        let mut docs = self.docs.write().await;
        let current = docs
            .get(id)
            .ok_or_else(|| PaperPilotError::DocumentNotFound { id: id.to_string() })?;
        let mut next = current.clone();
        edit(&mut next)?;
        validate_update(current, &next)?;
        self.commit(&mut docs, next.clone(), CommitKind::Updated)
            .await?;
        Ok(next)
    }

    /// Remove a document and its whole working area.
    ///
    /// Returns `false` (and does nothing) when the id is unknown.
    pub async fn delete(&self, id: &str) -> Result<bool, PaperPilotError> {
        let mut docs = self.docs.write().await;
        if !docs.contains_key(id) {
            debug!(doc_id = id, "Delete of unknown document ignored");
            return Ok(false);
        }
        let dir = self.document_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PaperPilotError::io(&dir, e)),
        }
        docs.remove(id);
        drop(docs);

        info!(doc_id = id, "Document deleted");
        self.events
            .broadcast(DocumentEvent::DocumentDeleted(id.to_string()));
        Ok(true)
    }

    async fn commit(
        &self,
        docs: &mut HashMap<String, Document>,
        doc: Document,
        kind: CommitKind,
    ) -> Result<(), PaperPilotError> {
        write_snapshot(&self.snapshot_path(&doc.id), &doc).await?;
        docs.insert(doc.id.clone(), doc.clone());
        debug!(doc_id = %doc.id, status = ?doc.status, "Document committed");

        let event = match kind {
            CommitKind::Created => DocumentEvent::DocumentCreated(doc),
            CommitKind::Updated => DocumentEvent::DocumentUpdated(doc),
        };
        self.events.broadcast(event);
        Ok(())
    }

    // ── Startup ───────────────────────────────────────────────────────────

    /// Load every readable snapshot under the working root.
    ///
    /// Unreadable or corrupt snapshots are logged and skipped. With
    /// [`Rehydration::Recover`], a document still marked `Processing` was
    /// interrupted mid-classification; it is moved to `Error` so it can be
    /// inspected and deleted. [`Rehydration::ReadOnly`] never writes, so it is
    /// safe next to a live service that may still be classifying.
    ///
    /// Returns the number of documents loaded.
    pub async fn rehydrate(&self, mode: Rehydration) -> Result<usize, PaperPilotError> {
        let mut entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PaperPilotError::io(&self.work_dir, e)),
        };

        let mut docs = self.docs.write().await;
        let mut loaded = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to scan '{}': {}", self.work_dir.display(), e);
                    break;
                }
            };
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let snapshot = dir.join(SNAPSHOT_FILE);
            if !snapshot.exists() {
                continue;
            }

            let mut doc = match read_snapshot(&snapshot).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Skipping unreadable snapshot: {}", e);
                    continue;
                }
            };

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if doc.id != dir_name {
                warn!(
                    doc_id = %doc.id,
                    "Skipping snapshot in '{}': id does not match its directory",
                    dir.display()
                );
                continue;
            }

            if mode == Rehydration::Recover && doc.status == DocumentStatus::Processing {
                warn!(doc_id = %doc.id, "Document was interrupted during classification; marking as error");
                doc.status = DocumentStatus::Error;
                if let Err(e) = write_snapshot(&snapshot, &doc).await {
                    warn!(doc_id = %doc.id, "Could not persist recovered status: {}", e);
                }
            }

            docs.insert(doc.id.clone(), doc);
            loaded += 1;
        }

        info!(
            "Rehydrated {} document(s) from '{}'",
            loaded,
            self.work_dir.display()
        );
        Ok(loaded)
    }
}

/// Enforce the lifecycle rules between the stored value and its replacement.
fn validate_update(current: &Document, next: &Document) -> Result<(), PaperPilotError> {
    let immutable = |field: &'static str| PaperPilotError::ImmutableField {
        id: current.id.clone(),
        field,
    };

    if next.original_filename != current.original_filename {
        return Err(immutable("original_filename"));
    }
    if next.created_at != current.created_at {
        return Err(immutable("created_at"));
    }
    if !current.status.can_transition_to(next.status) {
        return Err(PaperPilotError::InvalidTransition {
            id: current.id.clone(),
            from: current.status,
            to: next.status,
        });
    }
    if !next.pages_are_ordered() {
        return Err(immutable("pages"));
    }

    // After classification only per-page status and rotation may change.
    if current.status != DocumentStatus::Processing {
        let same_shape = current.pages.len() == next.pages.len()
            && current.pages.iter().zip(&next.pages).all(|(a, b)| {
                a.image_path == b.image_path
                    && a.original_width == b.original_width
                    && a.original_height == b.original_height
            });
        if !same_shape {
            return Err(immutable("pages"));
        }
    }
    Ok(())
}

/// Write a snapshot atomically: temp file in the same directory, then rename.
pub async fn write_snapshot(path: &Path, doc: &Document) -> Result<(), PaperPilotError> {
    let json = serde_json::to_vec_pretty(doc).map_err(|e| PaperPilotError::Snapshot {
        path: path.to_path_buf(),
        source: e,
    })?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| PaperPilotError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PaperPilotError::io(path, e))?;
    Ok(())
}

/// Read and parse one snapshot.
pub async fn read_snapshot(path: &Path) -> Result<Document, PaperPilotError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PaperPilotError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PaperPilotError::Snapshot {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventQueuePolicy;
    use crate::model::{Page, PageStatus, Rotation};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DocumentStore {
        DocumentStore::new(
            dir.path(),
            Arc::new(EventBroadcaster::new(EventQueuePolicy::Unbounded)),
        )
    }

    fn pages(n: usize) -> Vec<Page> {
        (0..n)
            .map(|i| Page {
                page_number: i,
                image_path: format!("doc/images/page_{i}.jpg"),
                status: PageStatus::Valid,
                rotation: Rotation::R0,
                original_width: 100,
                original_height: 140,
            })
            .collect()
    }

    #[tokio::test]
    async fn create_persists_and_announces() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut sub = store.events().subscribe();

        let doc = Document::new("doc-1", "batch.pdf");
        store.create(doc.clone()).await.unwrap();

        assert!(store.snapshot_path("doc-1").exists());
        let on_disk = read_snapshot(&store.snapshot_path("doc-1")).await.unwrap();
        assert_eq!(on_disk, doc);
        assert_eq!(
            sub.try_recv().unwrap(),
            DocumentEvent::DocumentCreated(doc)
        );
    }

    #[tokio::test]
    async fn ready_documents_only_accept_page_edits() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create(Document::new("d", "a.pdf")).await.unwrap();

        store
            .modify("d", |doc| {
                doc.pages = pages(2);
                doc.status = DocumentStatus::Ready;
                Ok(())
            })
            .await
            .unwrap();

        // Page status / rotation edits are fine.
        let edited = store
            .modify("d", |doc| {
                let p = doc.page_mut(1)?;
                p.status = PageStatus::Split;
                p.rotation = Rotation::R90;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(edited.pages[1].rotation, Rotation::R90);

        // Going back to Processing is not.
        let err = store
            .modify("d", |doc| {
                doc.status = DocumentStatus::Processing;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaperPilotError::InvalidTransition { .. }));

        // Nor is replacing the page list.
        let mut doc = store.get("d").await.unwrap();
        doc.pages.pop();
        assert!(matches!(
            store.update(doc).await,
            Err(PaperPilotError::ImmutableField { field: "pages", .. })
        ));

        // Failed edits leave the stored value alone.
        assert_eq!(store.get("d").await.unwrap().pages.len(), 2);
    }

    #[tokio::test]
    async fn update_of_unknown_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.update(Document::new("ghost", "x.pdf")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create(Document::new("d", "a.pdf")).await.unwrap();
        let mut sub = store.events().subscribe();

        assert!(store.delete("d").await.unwrap());
        assert!(!store.document_dir("d").exists());
        assert!(!store.delete("d").await.unwrap());
        assert!(!store.delete("never-existed").await.unwrap());

        assert_eq!(
            sub.try_recv().unwrap(),
            DocumentEvent::DocumentDeleted("d".into())
        );
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn rehydrate_skips_corrupt_snapshots() {
        let dir = TempDir::new().unwrap();
        {
            let first = store(&dir);
            let mut doc = Document::new("good", "a.pdf");
            first.create(doc.clone()).await.unwrap();
            doc.pages = pages(3);
            doc.status = DocumentStatus::Ready;
            first.update(doc).await.unwrap();
        }
        let bad = dir.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(SNAPSHOT_FILE), b"{ not json").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let second = store(&dir);
        assert_eq!(second.rehydrate(Rehydration::Recover).await.unwrap(), 1);
        let doc = second.get("good").await.unwrap();
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.status, DocumentStatus::Ready);
    }

    #[tokio::test]
    async fn rehydrate_marks_interrupted_documents_as_error() {
        let dir = TempDir::new().unwrap();
        store(&dir)
            .create(Document::new("stuck", "a.pdf"))
            .await
            .unwrap();

        let second = store(&dir);
        second.rehydrate(Rehydration::Recover).await.unwrap();
        assert_eq!(
            second.get("stuck").await.unwrap().status,
            DocumentStatus::Error
        );
        let on_disk = read_snapshot(&second.snapshot_path("stuck")).await.unwrap();
        assert_eq!(on_disk.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn read_only_rehydration_leaves_processing_snapshots_alone() {
        let dir = TempDir::new().unwrap();
        let live = store(&dir);
        live.create(Document::new("busy", "a.pdf")).await.unwrap();
        let before = std::fs::read(live.snapshot_path("busy")).unwrap();

        let viewer = store(&dir);
        assert_eq!(viewer.rehydrate(Rehydration::ReadOnly).await.unwrap(), 1);
        assert_eq!(
            viewer.get("busy").await.unwrap().status,
            DocumentStatus::Processing
        );
        assert_eq!(std::fs::read(live.snapshot_path("busy")).unwrap(), before);
    }

    #[tokio::test]
    async fn snapshot_round_trip_is_field_for_field() {
        let dir = TempDir::new().unwrap();
        let mut doc = Document::new("rt", "scan 01.pdf");
        doc.display_name = Some("Contract".into());
        doc.status = DocumentStatus::Ready;
        doc.pages = pages(2);
        doc.pages[0].rotation = Rotation::R270;
        doc.pages[1].status = PageStatus::Delete;

        let path = dir.path().join(SNAPSHOT_FILE);
        write_snapshot(&path, &doc).await.unwrap();
        let loaded = read_snapshot(&path).await.unwrap();
        assert_eq!(loaded, doc);

        let original_json = std::fs::read_to_string(&path).unwrap();
        let reserialised = serde_json::to_string_pretty(&loaded).unwrap();
        assert_eq!(reserialised, original_json);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut older = Document::new("older", "a.pdf");
        older.created_at = older.created_at - chrono::Duration::seconds(60);
        store.create(older).await.unwrap();
        store.create(Document::new("newer", "b.pdf")).await.unwrap();

        let ids: Vec<String> = store.list().await.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["newer".to_string(), "older".to_string()]);
    }
}
