//! Integration tests for the `PaperPilot` service.
//!
//! Rendering is replaced by a scripted rasterizer so these run without
//! pdfium; source PDFs are real (built with lopdf) so export is exercised
//! end to end.

use image::{imageops, DynamicImage, GrayImage, Luma};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, Stream};
use paperpilot::separator::ModuleMatrix;
use paperpilot::{
    Document, DocumentEvent, DocumentStatus, OrientationDetector, OrientationEstimate, PageError,
    PageRasterizer, PageStatus, PageUpdate, PageVisitor, PaperPilot, PaperPilotError,
    PipelineConfig, Rotation,
};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Sheet {
    Text,
    Blank,
    Marker,
}

/// Renders a fixed sequence of synthetic pages regardless of the input file.
struct ScriptedRasterizer(Vec<Sheet>);

impl PageRasterizer for ScriptedRasterizer {
    fn render_each(
        &self,
        _pdf_path: &Path,
        visit: &mut PageVisitor<'_>,
    ) -> Result<usize, PaperPilotError> {
        for (i, sheet) in self.0.iter().enumerate() {
            visit(i, render(*sheet))?;
        }
        Ok(self.0.len())
    }
}

fn render(sheet: Sheet) -> DynamicImage {
    let (w, h) = (240, 340);
    let img = match sheet {
        Sheet::Blank => GrayImage::from_pixel(w, h, Luma([248])),
        Sheet::Text => GrayImage::from_fn(w, h, |_, y| {
            if (y / 5) % 3 == 0 {
                Luma([30])
            } else {
                Luma([240])
            }
        }),
        Sheet::Marker => {
            let code = ModuleMatrix::encode("SPLIT_HERE").unwrap().to_image(5);
            let mut page = GrayImage::from_pixel(w, h, Luma([255]));
            imageops::overlay(&mut page, &code, 20, 60);
            page
        }
    };
    DynamicImage::ImageLuma8(img)
}

/// Upside-down with high confidence on page 0, a weak guess elsewhere.
struct FirstPageUpsideDown;

impl OrientationDetector for FirstPageUpsideDown {
    fn detect(&self, _page: usize, image_path: &Path) -> Result<OrientationEstimate, PageError> {
        let first = image_path.ends_with("page_0.jpg");
        Ok(OrientationEstimate {
            rotation: if first { Rotation::R180 } else { Rotation::R90 },
            confidence: if first { 6.0 } else { 0.5 },
        })
    }
}

/// `RUST_LOG=paperpilot=debug cargo test` shows pipeline logs per test.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    _dir: TempDir,
    config: PipelineConfig,
}

impl Harness {
    fn new() -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .input_dir(dir.path().join("input"))
            .output_dir(dir.path().join("output"))
            .work_dir(dir.path().join("temp"))
            .stability_interval(Duration::from_millis(10))
            .stability_timeout(Duration::from_millis(500))
            .orientation_threshold(2.0)
            .worker_concurrency(2)
            .build()
            .unwrap();
        Self { _dir: dir, config }
    }

    async fn open(&self, script: &[Sheet]) -> PaperPilot {
        PaperPilot::with_components(
            self.config.clone(),
            Arc::new(ScriptedRasterizer(script.to_vec())),
            Some(Arc::new(FirstPageUpsideDown)),
        )
        .await
        .unwrap()
    }

    /// Drop an `n`-page PDF into the input directory.
    fn drop_pdf(&self, name: &str, n: u32) -> PathBuf {
        let path = self.config.input_dir.join(name);
        std::fs::write(&path, make_pdf(n)).unwrap();
        path
    }

    fn outputs(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.config.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn make_pdf(n: u32) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for i in 0..n {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {}", i + 1))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => n as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn statuses(doc: &Document) -> Vec<PageStatus> {
    doc.pages.iter().map(|p| p.status).collect()
}

fn pdf_pages(path: &Path) -> usize {
    lopdf::Document::load(path).unwrap().get_pages().len()
}

// ── Ingestion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_classifies_every_page() {
    use Sheet::*;
    let h = Harness::new();
    let pilot = h.open(&[Text, Text, Marker, Text, Blank]).await;
    let src = h.drop_pdf("batch.pdf", 5);

    let doc = pilot.ingest_file(&src).await.unwrap().unwrap();

    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(
        statuses(&doc),
        vec![
            PageStatus::Valid,
            PageStatus::Valid,
            PageStatus::Split,
            PageStatus::Valid,
            PageStatus::Delete
        ]
    );
    // Confident detection applied, weak one ignored.
    assert_eq!(doc.pages[0].rotation, Rotation::R180);
    assert_eq!(doc.pages[1].rotation, Rotation::R0);
    assert!(doc.pages.iter().enumerate().all(|(i, p)| p.page_number == i));
    assert_eq!(doc.pages[3].image_path, format!("{}/images/page_3.jpg", doc.id));
    assert_eq!((doc.pages[0].original_width, doc.pages[0].original_height), (240, 340));

    assert!(!src.exists());
    assert_eq!(pilot.get_document(&doc.id).await.unwrap(), doc);
}

#[tokio::test]
async fn create_event_precedes_update_event() {
    let h = Harness::new();
    let pilot = h.open(&[Sheet::Text]).await;
    let mut sub = pilot.subscribe();

    let src = h.drop_pdf("one.pdf", 1);
    let doc = pilot.ingest_file(&src).await.unwrap().unwrap();

    let first = sub.recv().await.unwrap();
    let second = sub.recv().await.unwrap();
    assert_eq!(first.kind(), "document_created");
    assert_eq!(second.kind(), "document_updated");
    assert_eq!(first.document_id(), doc.id);
    assert_eq!(second.document_id(), doc.id);
    match second {
        DocumentEvent::DocumentUpdated(d) => assert_eq!(d.status, DocumentStatus::Ready),
        other => panic!("unexpected event {other:?}"),
    }
}

// ── Edits ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn page_edits_and_rename_are_persisted() {
    use Sheet::*;
    let h = Harness::new();
    let pilot = h.open(&[Text, Blank]).await;
    let doc = pilot
        .ingest_file(&h.drop_pdf("scan_001.pdf", 2))
        .await
        .unwrap()
        .unwrap();

    pilot
        .update_page(
            &doc.id,
            1,
            PageUpdate {
                status: Some(PageStatus::Valid),
                rotation: Some(Rotation::R90),
            },
        )
        .await
        .unwrap();
    let renamed = pilot.rename_document(&doc.id, "  Tax 2024.pdf ").await.unwrap();
    assert_eq!(renamed.display_name.as_deref(), Some("Tax 2024.pdf"));
    assert_eq!(renamed.export_base_name(), "Tax 2024");
    assert_eq!(renamed.pages[1].status, PageStatus::Valid);
    assert_eq!(renamed.pages[1].rotation, Rotation::R90);

    // The snapshot on disk matches what the store serves.
    let snapshot = h
        .config
        .work_dir
        .join(&doc.id)
        .join(paperpilot::store::SNAPSHOT_FILE);
    let on_disk: Document = serde_json::from_slice(&std::fs::read(snapshot).unwrap()).unwrap();
    assert_eq!(on_disk, renamed);

    let cleared = pilot.rename_document(&doc.id, "   ").await.unwrap();
    assert_eq!(cleared.display_name, None);
    assert_eq!(cleared.export_base_name(), "scan_001");
}

#[tokio::test]
async fn unknown_ids_and_pages_are_not_found() {
    let h = Harness::new();
    let pilot = h.open(&[Sheet::Text]).await;
    let doc = pilot
        .ingest_file(&h.drop_pdf("a.pdf", 1))
        .await
        .unwrap()
        .unwrap();

    let err = pilot.get_document("nope").await.unwrap_err();
    assert!(err.is_not_found());
    let err = pilot.rename_document("nope", "x").await.unwrap_err();
    assert!(matches!(err, PaperPilotError::DocumentNotFound { .. }));
    let err = pilot
        .update_page(&doc.id, 7, PageUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaperPilotError::PageNotFound { page: 7, total: 1, .. }
    ));
}

// ── Export ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn export_splits_at_separators_and_consumes_the_document() {
    use Sheet::*;
    let h = Harness::new();
    let pilot = h.open(&[Text, Text, Marker, Text]).await;
    let doc = pilot
        .ingest_file(&h.drop_pdf("batch.pdf", 4))
        .await
        .unwrap()
        .unwrap();
    let mut sub = pilot.subscribe();

    let report = pilot.export_document(&doc.id).await.unwrap().unwrap();

    assert_eq!(report.page_counts, vec![2, 1]);
    assert_eq!(h.outputs(), vec!["batch_00.pdf", "batch_01.pdf"]);
    assert_eq!(pdf_pages(&report.outputs[0]), 2);
    assert_eq!(pdf_pages(&report.outputs[1]), 1);

    assert!(pilot.get_document(&doc.id).await.unwrap_err().is_not_found());
    assert!(!h.config.work_dir.join(&doc.id).exists());
    let event = sub.recv().await.unwrap();
    assert_eq!(event, DocumentEvent::DocumentDeleted(doc.id.clone()));

    // Second export and delete of the same id are no-ops.
    assert!(pilot.export_document(&doc.id).await.unwrap().is_none());
    assert!(!pilot.delete_document(&doc.id).await.unwrap());
}

#[tokio::test]
async fn leading_separator_gives_single_named_output() {
    use Sheet::*;
    let h = Harness::new();
    let pilot = h.open(&[Marker, Text]).await;
    let doc = pilot
        .ingest_file(&h.drop_pdf("x.pdf", 2))
        .await
        .unwrap()
        .unwrap();
    pilot.rename_document(&doc.id, "Contract").await.unwrap();

    let report = pilot.export_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(report.page_counts, vec![1]);
    assert_eq!(h.outputs(), vec!["Contract.pdf"]);
}

#[tokio::test]
async fn all_blank_exports_nothing_but_deletes() {
    use Sheet::*;
    let h = Harness::new();
    let pilot = h.open(&[Blank, Blank]).await;
    let doc = pilot
        .ingest_file(&h.drop_pdf("empty.pdf", 2))
        .await
        .unwrap()
        .unwrap();

    let report = pilot.export_document(&doc.id).await.unwrap().unwrap();
    assert!(report.outputs.is_empty());
    assert!(h.outputs().is_empty());
    assert!(pilot.list_documents().await.is_empty());
}

#[tokio::test]
async fn failed_export_leaves_document_intact() {
    let h = Harness::new();
    let pilot = h.open(&[Sheet::Text]).await;
    let doc = pilot
        .ingest_file(&h.drop_pdf("a.pdf", 1))
        .await
        .unwrap()
        .unwrap();
    std::fs::remove_file(h.config.work_dir.join(&doc.id).join("original.pdf")).unwrap();

    let err = pilot.export_document(&doc.id).await.unwrap_err();
    assert!(matches!(err, PaperPilotError::ExportFailed { .. }));
    assert!(h.outputs().is_empty());
    assert_eq!(pilot.get_document(&doc.id).await.unwrap(), doc);
}

#[tokio::test]
async fn export_waits_for_classification() {
    let h = Harness::new();
    let pilot = h.open(&[]).await;
    let doc = Document::new("pending", "a.pdf");
    pilot.store().create(doc).await.unwrap();

    let err = pilot.export_document("pending").await.unwrap_err();
    assert!(matches!(err, PaperPilotError::DocumentNotReady { .. }));
    assert!(pilot.get_document("pending").await.is_ok());
}

// ── Restart ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn restart_rehydrates_documents() {
    use Sheet::*;
    let h = Harness::new();
    let (ready, interrupted) = {
        let pilot = h.open(&[Text, Marker, Text]).await;
        let ready = pilot
            .ingest_file(&h.drop_pdf("keep.pdf", 3))
            .await
            .unwrap()
            .unwrap();
        let interrupted = Document::new("crashed", "crash.pdf");
        pilot.store().create(interrupted.clone()).await.unwrap();
        (ready, interrupted)
    };

    let pilot = h.open(&[]).await;
    assert_eq!(pilot.get_document(&ready.id).await.unwrap(), ready);
    let recovered = pilot.get_document(&interrupted.id).await.unwrap();
    assert_eq!(recovered.status, DocumentStatus::Error);
    assert_eq!(pilot.list_documents().await.len(), 2);
}

#[tokio::test]
async fn attached_instance_does_not_recover_live_documents() {
    let h = Harness::new();
    let live = h.open(&[]).await;
    let busy = Document::new("busy", "scan.pdf");
    live.store().create(busy.clone()).await.unwrap();
    let snapshot = live.store().snapshot_path("busy");
    let before = std::fs::read(&snapshot).unwrap();

    let viewer = PaperPilot::attach(h.config.clone()).await.unwrap();
    let seen = viewer.get_document("busy").await.unwrap();
    assert_eq!(seen.status, DocumentStatus::Processing);
    assert_eq!(std::fs::read(&snapshot).unwrap(), before);
    assert_eq!(
        live.get_document("busy").await.unwrap().status,
        DocumentStatus::Processing
    );
}

#[tokio::test]
async fn corrupt_snapshot_is_skipped() {
    let h = Harness::new();
    let ok_id = {
        let pilot = h.open(&[Sheet::Text]).await;
        pilot
            .ingest_file(&h.drop_pdf("a.pdf", 1))
            .await
            .unwrap()
            .unwrap()
            .id
    };
    let broken = h.config.work_dir.join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("state.json"), b"{\"id\": \"broken\", ").unwrap();

    let pilot = h.open(&[]).await;
    let ids: Vec<String> = pilot.list_documents().await.into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![ok_id]);
}

// ── Watcher ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn watcher_ingests_existing_and_new_files() {
    let h = Harness::new();
    let pilot = Arc::new(h.open(&[Sheet::Text]).await);
    let mut sub = pilot.subscribe();

    // Present before the watcher starts: picked up by the startup scan.
    h.drop_pdf("early.pdf", 1);
    std::fs::write(h.config.input_dir.join("notes.txt"), b"ignored").unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = {
        let pilot = Arc::clone(&pilot);
        tokio::spawn(async move {
            pilot
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    let mut ready = Vec::new();
    let mut dropped_late = false;
    let collect = async {
        while ready.len() < 2 {
            match sub.recv().await {
                Some(DocumentEvent::DocumentUpdated(d)) if d.status == DocumentStatus::Ready => {
                    ready.push(d.original_filename.clone());
                    if !dropped_late {
                        h.drop_pdf("late.pdf", 1);
                        dropped_late = true;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(20), collect)
        .await
        .expect("watcher did not ingest both files");

    stop_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();

    ready.sort();
    assert_eq!(ready, vec!["early.pdf", "late.pdf"]);
    assert!(h.config.input_dir.join("notes.txt").exists());
    assert!(!h.config.input_dir.join("early.pdf").exists());
}

// ── Separator sheet ──────────────────────────────────────────────────────────

#[tokio::test]
async fn separator_sheet_is_served_and_written() {
    let h = Harness::new();
    let pilot = h.open(&[]).await;

    let bytes = pilot.separator_sheet().unwrap();
    assert_eq!(lopdf::Document::load_mem(&bytes).unwrap().get_pages().len(), 1);

    let path = pilot.write_separator_sheet().await.unwrap();
    assert_eq!(path, h.config.work_dir.join("split_sheet.pdf"));
    assert_eq!(lopdf::Document::load(&path).unwrap().get_pages().len(), 1);
}
