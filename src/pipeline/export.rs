//! Export: partition a classified document into finished output PDFs.
//!
//! Two stages:
//!
//! 1. [`plan_export`] walks the pages once and groups `Valid` pages into
//!    output groups. `Delete` pages vanish; a `Split` page closes the current
//!    group if it holds anything and is otherwise ignored; empty groups are
//!    dropped. Pure and cheap, so the partition rules are tested without PDFs.
//!
//! 2. [`write_outputs`] builds every output in memory with lopdf (clone the
//!    source, drop the pages not in the group, prune orphaned objects), then
//!    writes them to temporary files inside the output directory and moves
//!    them into place. Existing files are never replaced: a taken name gets a
//!    `-1`, `-2`, … suffix. If anything fails, every file written so far is
//!    removed: an export either produces all of its outputs or none.
//!
//! Rotation is the page's effective `/Rotate` (own or inherited) plus the
//! stored rotation, so the user's correction is applied exactly once on top
//! of however the scanner saved the page.

use crate::error::PaperPilotError;
use crate::model::{Page, PageStatus, Rotation};
use lopdf::{Document as PdfDocument, Object, ObjectId};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Names tried per output before giving up on finding a free one.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// One source page placed into an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSelection {
    /// 0-indexed page of the source PDF.
    pub page_number: usize,
    pub rotation: Rotation,
}

/// What an export produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub document_id: String,
    /// Written files, in output order.
    pub outputs: Vec<PathBuf>,
    /// Page count of each output, parallel to `outputs`.
    pub page_counts: Vec<usize>,
}

impl ExportReport {
    pub fn total_pages(&self) -> usize {
        self.page_counts.iter().sum()
    }
}

// ── Partition ────────────────────────────────────────────────────────────

/// Group the `Valid` pages into outputs, in page order.
pub fn plan_export(pages: &[Page]) -> Vec<Vec<PageSelection>> {
    let mut groups = Vec::new();
    let mut current: Vec<PageSelection> = Vec::new();

    for page in pages {
        match page.status {
            PageStatus::Delete => {}
            PageStatus::Split => {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
            }
            PageStatus::Valid => current.push(PageSelection {
                page_number: page.page_number,
                rotation: page.rotation,
            }),
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// File names for `count` outputs: `{base}.pdf` for one, `{base}_00.pdf`,
/// `{base}_01.pdf`, … for several.
pub fn output_names(base: &str, count: usize) -> Vec<String> {
    match count {
        0 => Vec::new(),
        1 => vec![format!("{base}.pdf")],
        n => {
            let width = ((n - 1).to_string().len()).max(2);
            (0..n).map(|i| format!("{base}_{i:0width$}.pdf")).collect()
        }
    }
}

// ── PDF construction ─────────────────────────────────────────────────────

/// Build one output PDF holding `selection` from `source`.
fn build_output(source: &PdfDocument, selection: &[PageSelection]) -> Result<Vec<u8>, String> {
    let page_ids = source.get_pages();
    let page_count = page_ids.len();

    let mut out = source.clone();

    for sel in selection {
        let number = sel.page_number as u32 + 1;
        let page_id = *page_ids.get(&number).ok_or_else(|| {
            format!(
                "page {} does not exist in source ({} pages)",
                sel.page_number, page_count
            )
        })?;
        if sel.rotation != Rotation::R0 {
            let rotate = (effective_rotate(source, page_id) + sel.rotation.degrees()).rem_euclid(360);
            out.get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| format!("page {} is not a dictionary: {}", sel.page_number, e))?
                .set("Rotate", Object::Integer(rotate));
        }
    }

    // Delete in reverse so the remaining page numbers stay valid.
    let keep: Vec<u32> = selection.iter().map(|s| s.page_number as u32 + 1).collect();
    let mut to_delete: Vec<u32> = (1..=page_count as u32)
        .filter(|p| !keep.contains(p))
        .collect();
    to_delete.reverse();
    for page_num in to_delete {
        out.delete_pages(&[page_num]);
    }

    out.prune_objects();
    out.compress();

    let mut buffer = Vec::new();
    out.save_to(&mut buffer)
        .map_err(|e| format!("save failed: {}", e))?;
    Ok(buffer)
}

/// `/Rotate` of a page, following `/Parent` for inherited values.
fn effective_rotate(doc: &PdfDocument, page_id: ObjectId) -> i64 {
    let mut node = Some(page_id);
    // Guard against cyclic page trees in damaged files.
    for _ in 0..32 {
        let Some(id) = node else { break };
        let Ok(dict) = doc.get_dictionary(id) else { break };
        if let Ok(rotate) = dict.get(b"Rotate").and_then(Object::as_i64) {
            return rotate.rem_euclid(360);
        }
        node = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    0
}

// ── Writing ──────────────────────────────────────────────────────────────

/// Build and write every output of one document. Blocking.
///
/// Returns the report; on error nothing is left in `output_dir`.
pub fn write_outputs(
    document_id: &str,
    base_name: &str,
    pages: &[Page],
    source_pdf: &Path,
    output_dir: &Path,
) -> Result<ExportReport, PaperPilotError> {
    let fail = |detail: String| PaperPilotError::ExportFailed {
        id: document_id.to_string(),
        detail,
    };

    let groups = plan_export(pages);
    let names = output_names(base_name, groups.len());
    if groups.is_empty() {
        info!(doc_id = document_id, "No valid pages: nothing to export");
        return Ok(ExportReport {
            document_id: document_id.to_string(),
            outputs: Vec::new(),
            page_counts: Vec::new(),
        });
    }

    let source = PdfDocument::load(source_pdf)
        .map_err(|e| fail(format!("cannot read '{}': {}", source_pdf.display(), e)))?;

    // Everything in memory first: a bad page aborts before any file exists.
    let mut buffers = Vec::with_capacity(groups.len());
    for (group, name) in groups.iter().zip(&names) {
        let bytes = build_output(&source, group).map_err(|e| fail(format!("{name}: {e}")))?;
        debug!(doc_id = document_id, output = %name, pages = group.len(), "Output built");
        buffers.push(bytes);
    }

    // Stage as temporary files next to their destinations.
    let mut staged = Vec::with_capacity(buffers.len());
    for bytes in &buffers {
        let mut tmp = NamedTempFile::new_in(output_dir).map_err(|e| {
            fail(format!("cannot stage in '{}': {e}", output_dir.display()))
        })?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| fail(format!("staging write failed: {e}")))?;
        staged.push(tmp);
    }

    // Publish. Unpersisted temp files delete themselves on drop.
    let mut written: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (tmp, name) in staged.into_iter().zip(&names) {
        match publish(tmp, output_dir, name) {
            Ok(dest) => written.push(dest),
            Err(e) => {
                remove_all(&written);
                return Err(fail(format!("cannot write '{name}': {e}")));
            }
        }
    }

    let page_counts: Vec<usize> = groups.iter().map(Vec::len).collect();
    info!(
        doc_id = document_id,
        outputs = written.len(),
        pages = page_counts.iter().sum::<usize>(),
        "Export written"
    );
    Ok(ExportReport {
        document_id: document_id.to_string(),
        outputs: written,
        page_counts,
    })
}

/// Move a staged file to `name` in `dir`, never replacing an existing file.
///
/// A taken name falls back to `{stem}-1.pdf`, `{stem}-2.pdf`, …
fn publish(mut tmp: NamedTempFile, dir: &Path, name: &str) -> io::Result<PathBuf> {
    let stem = name.strip_suffix(".pdf").unwrap_or(name);
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let dest = match attempt {
            0 => dir.join(name),
            n => dir.join(format!("{stem}-{n}.pdf")),
        };
        match tmp.persist_noclobber(&dest) {
            Ok(_) => {
                if attempt > 0 {
                    info!(
                        wanted = name,
                        output = %dest.display(),
                        "Output name taken, using next free name"
                    );
                }
                return Ok(dest);
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(e.error),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for '{name}' after {MAX_NAME_ATTEMPTS} attempts"),
    ))
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not roll back '{}': {}", path.display(), e);
        }
    }
}
