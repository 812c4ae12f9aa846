//! CLI binary for paperpilot.
//!
//! A thin shim over the library crate: maps flags and environment variables
//! to `PipelineConfig`, runs the watcher service, and exposes the document
//! operations for scripting and inspection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use paperpilot::{
    Document, DocumentEvent, EventQueuePolicy, OverflowPolicy, PageStatus, PageUpdate,
    PaperPilot, PipelineConfig, Rotation,
};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"Examples:
  paperpilot run                          Watch data/input, log live events
  paperpilot list                         Show documents, newest first
  paperpilot page <ID> 3 --status split   Mark page 3 as a separator
  paperpilot page <ID> 0 --rotation 180   Turn page 0 upside down
  paperpilot rename <ID> "Invoice 2024"   Name the exported file(s)
  paperpilot export <ID>                  Write the split PDFs, remove the document
  paperpilot split-sheet -o sheet.pdf     Printable separator page

Environment:
  INPUT_DIR, OUTPUT_DIR, TEMP_DIR and OCR_ROTATION_THRESHOLD are honoured,
  as are the PAPERPILOT_* variables listed with each option.
  Set RUST_LOG to override the log filter.

Commands other than `run` edit the same working directory as a running
service; prefer one writer at a time.

PDF engine:
  Rendering needs libpdfium. Point PDFIUM_LIB_PATH at the directory that
  contains it, or place it next to the binary or in the system library path.
"#;

/// Split scanned PDF batches into separate documents.
#[derive(Parser, Debug)]
#[command(
    name = "paperpilot",
    version,
    about = "Split scanned PDF batches into separate documents",
    long_about = "Watches an input directory for scanned PDF batches, classifies every page \
(separator sheet, blank, content), straightens rotated pages, and exports one PDF per \
document once the classification has been reviewed.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory watched for incoming scans.
    #[arg(long, global = true, env = "INPUT_DIR", default_value = "data/input")]
    input_dir: PathBuf,

    /// Directory receiving exported PDFs.
    #[arg(long, global = true, env = "OUTPUT_DIR", default_value = "data/output")]
    output_dir: PathBuf,

    /// Root of the per-document working areas.
    #[arg(long, global = true, env = "TEMP_DIR", default_value = "data/temp")]
    work_dir: PathBuf,

    /// Minimum orientation confidence to apply a detected rotation.
    #[arg(long, global = true, env = "OCR_ROTATION_THRESHOLD", default_value_t = 0.0)]
    rotation_threshold: f32,

    /// Disable tesseract orientation detection.
    #[arg(long, global = true, env = "PAPERPILOT_NO_ORIENTATION")]
    no_orientation: bool,

    /// Command used for orientation detection.
    #[arg(long, global = true, env = "PAPERPILOT_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Rendering DPI (72–600).
    #[arg(long, global = true, env = "PAPERPILOT_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Grayscale standard deviation below which a page is blank.
    #[arg(long, global = true, env = "PAPERPILOT_BLANK_THRESHOLD", default_value_t = 10.0)]
    blank_threshold: f64,

    /// Payload of the separator QR code.
    #[arg(long, global = true, env = "PAPERPILOT_SEPARATOR_TOKEN", default_value = "SPLIT_HERE")]
    separator_token: String,

    /// Parallel classification/export jobs (default: CPU count).
    #[arg(long, global = true, env = "PAPERPILOT_WORKERS")]
    workers: Option<usize>,

    /// Cap each live-event subscriber queue at this many events.
    #[arg(long, global = true, env = "PAPERPILOT_EVENT_QUEUE")]
    event_queue: Option<usize>,

    /// What a full event queue discards.
    #[arg(long, global = true, env = "PAPERPILOT_EVENT_OVERFLOW", value_enum, default_value = "drop-newest")]
    event_overflow: OverflowArg,

    /// Directory containing the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, env = "PAPERPILOT_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAPERPILOT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAPERPILOT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the input directory and process scans until Ctrl-C.
    Run,
    /// List documents, newest first.
    List,
    /// Show one document with its pages.
    Show { id: String },
    /// Set the base name of the exported file(s). Empty reverts to the original name.
    Rename { id: String, name: String },
    /// Correct a page's status and/or rotation.
    Page {
        id: String,
        /// 0-indexed page number.
        page: usize,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Clockwise rotation in degrees: 0, 90, 180 or 270.
        #[arg(long, allow_negative_numbers = true)]
        rotation: Option<i64>,
    },
    /// Export a document into the output directory and remove it.
    Export { id: String },
    /// Delete a document without exporting it.
    Delete { id: String },
    /// Write the printable separator sheet.
    SplitSheet {
        /// Destination file (default: split_sheet.pdf in the working directory).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StatusArg {
    Valid,
    Delete,
    Split,
}

impl From<StatusArg> for PageStatus {
    fn from(v: StatusArg) -> Self {
        match v {
            StatusArg::Valid => PageStatus::Valid,
            StatusArg::Delete => PageStatus::Delete,
            StatusArg::Split => PageStatus::Split,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OverflowArg {
    DropNewest,
    DropOldest,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(v: OverflowArg) -> Self {
        match v {
            OverflowArg::DropNewest => OverflowPolicy::DropNewest,
            OverflowArg::DropOldest => OverflowPolicy::DropOldest,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Watcher service ──────────────────────────────────────────────────
    let command = match cli.command {
        Command::Run => return run_service(config, cli.json, cli.quiet).await,
        command => command,
    };

    // ── One-shot commands ────────────────────────────────────────────────
    // These may run next to a live `run`: attach without recovering or rendering.
    let pilot = PaperPilot::attach(config)
        .await
        .context("Failed to open the working directory")?;

    match command {
        Command::Run => {}
        Command::List => {
            let docs = pilot.list_documents().await;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&docs).context("Failed to serialise documents")?
                );
            } else if docs.is_empty() {
                eprintln!("{}", dim("No documents."));
            } else {
                for doc in &docs {
                    println!("{}", summary_line(doc));
                }
            }
        }
        Command::Show { id } => {
            let doc = pilot.get_document(&id).await?;
            print_document(&doc, cli.json)?;
        }
        Command::Rename { id, name } => {
            let doc = pilot.rename_document(&id, &name).await?;
            print_document(&doc, cli.json)?;
        }
        Command::Page {
            id,
            page,
            status,
            rotation,
        } => {
            let rotation = rotation.map(Rotation::try_from).transpose()?;
            let update = PageUpdate {
                status: status.map(Into::into),
                rotation,
            };
            let doc = pilot.update_page(&id, page, update).await?;
            print_document(&doc, cli.json)?;
        }
        Command::Export { id } => match pilot.export_document(&id).await? {
            Some(report) if cli.json => println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            ),
            Some(report) => {
                for (path, pages) in report.outputs.iter().zip(&report.page_counts) {
                    println!("{}  {} page(s)", bold(&path.display().to_string()), pages);
                }
                if !cli.quiet {
                    eprintln!(
                        "{}  {} file(s), {} page(s)",
                        green("✔"),
                        report.outputs.len(),
                        report.total_pages()
                    );
                }
            }
            None => eprintln!("{}", dim(&format!("No document '{id}' (nothing exported)"))),
        },
        Command::Delete { id } => {
            if pilot.delete_document(&id).await? {
                if !cli.quiet {
                    eprintln!("{}  deleted {}", green("✔"), id);
                }
            } else {
                eprintln!("{}", dim(&format!("No document '{id}'")));
            }
        }
        Command::SplitSheet { output } => {
            let path = match output {
                Some(path) => {
                    let bytes = pilot.separator_sheet()?;
                    tokio::fs::write(&path, bytes)
                        .await
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    path
                }
                None => pilot.write_separator_sheet().await?,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}

/// Rehydrate, watch the input directory and print live events until Ctrl-C.
async fn run_service(config: PipelineConfig, json: bool, quiet: bool) -> Result<()> {
    let pilot = PaperPilot::open(config)
        .await
        .context("Failed to start PaperPilot")?;

    let mut events = pilot.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if !quiet {
                print_event(&event, json);
            }
        }
    });

    pilot
        .run(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Watcher failed")
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .input_dir(&cli.input_dir)
        .output_dir(&cli.output_dir)
        .work_dir(&cli.work_dir)
        .orientation_threshold(cli.rotation_threshold)
        .orientation_enabled(!cli.no_orientation)
        .tesseract_cmd(&cli.tesseract)
        .dpi(cli.dpi)
        .blank_threshold(cli.blank_threshold)
        .separator_token(&cli.separator_token);

    if let Some(n) = cli.workers {
        builder = builder.worker_concurrency(n);
    }
    if let Some(capacity) = cli.event_queue {
        builder = builder.event_queue(EventQueuePolicy::Bounded {
            capacity,
            overflow: cli.event_overflow.into(),
        });
    }
    if let Some(ref dir) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(dir);
    }

    builder.build().context("Invalid configuration")
}

fn summary_line(doc: &Document) -> String {
    let status = format!("{:?}", doc.status).to_lowercase();
    let status = match doc.status {
        paperpilot::DocumentStatus::Ready => green(&status),
        paperpilot::DocumentStatus::Error => red(&status),
        paperpilot::DocumentStatus::Processing => dim(&status),
    };
    format!(
        "{}  {:<10}  {:>3} pages ({} valid, {} blank, {} split)  {}  {}",
        doc.id,
        status,
        doc.pages.len(),
        doc.count_pages(PageStatus::Valid),
        doc.count_pages(PageStatus::Delete),
        doc.count_pages(PageStatus::Split),
        bold(&doc.export_base_name()),
        dim(&doc.created_at.format("%Y-%m-%d %H:%M").to_string()),
    )
}

fn print_document(doc: &Document, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(doc).context("Failed to serialise document")?
        );
        return Ok(());
    }
    println!("{}", summary_line(doc));
    for page in &doc.pages {
        println!(
            "  {:>3}  {:<6}  {:>4}  {}",
            page.page_number,
            format!("{:?}", page.status).to_lowercase(),
            page.rotation.to_string(),
            dim(&page.image_path)
        );
    }
    Ok(())
}

fn print_event(event: &DocumentEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("{} event serialisation failed: {e}", red("✘")),
        }
        return;
    }
    match event {
        DocumentEvent::DocumentDeleted(id) => println!("{}  {}", dim(event.kind()), id),
        DocumentEvent::DocumentCreated(doc) | DocumentEvent::DocumentUpdated(doc) => {
            println!("{}  {}", dim(event.kind()), summary_line(doc))
        }
    }
}
