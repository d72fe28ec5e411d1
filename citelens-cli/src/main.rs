use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use citelens_blob::open_blob_store;
use citelens_core::{
    parse_citation, BrowsedFile, CancelToken, CanvasSize, Citation, DocumentMeta, EngineConfig,
    FileOwnerIndex, Highlight, HighlightLocator, LocateRequest, MatchContext, OcrLayoutResolver,
    OcrPage, OcrQuery, OpenDocumentState, Resolution, ResultMatcher, SearchResult,
};
use citelens_render::{bind_pdfium, paint_highlight, write_png, HighlightStyle, PdfiumDocument};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "citelens",
    version,
    about = "Resolve chat citations to documents and highlight the cited passage"
)]
struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse citation tokens and print what was recognised
    Parse {
        #[arg(required = true)]
        tokens: Vec<String>,
    },
    /// Resolve a citation token to a document and page
    Resolve {
        token: String,
        /// JSON array of search results the answer was generated from
        #[arg(long)]
        results: Option<PathBuf>,
        /// JSON array of files in the folder being browsed
        #[arg(long)]
        browsed: Option<PathBuf>,
        /// Owner of the browsed folder
        #[arg(long)]
        browsed_user: Option<String>,
        /// JSON object describing the document currently open
        #[arg(long)]
        open: Option<PathBuf>,
        /// Page total of the target document, when already known
        #[arg(long)]
        total_pages: Option<u32>,
    },
    /// Look up the stored OCR layout of one page
    Ocr {
        #[arg(long)]
        user: String,
        #[arg(long)]
        filename: String,
        /// 1-based page number
        #[arg(long)]
        page: u32,
        #[arg(long)]
        blob_path: String,
    },
    /// Locate a keyword on a rendered page
    Locate {
        #[arg(long)]
        pdf: PathBuf,
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        keyword: String,
        #[arg(long, default_value_t = 1000)]
        canvas_width: u32,
        /// Owner of the document, enables the OCR fallback
        #[arg(long, requires = "blob_path")]
        user: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long, requires = "user")]
        blob_path: Option<String>,
        /// Write the rendered page with the highlight painted on it
        #[arg(long)]
        png: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ParsedToken {
    token: String,
    citation: Option<Citation>,
}

#[derive(Serialize)]
struct OcrReport {
    folder: String,
    source: &'static str,
    page: Option<OcrPage>,
}

#[derive(Serialize)]
struct LocateReport {
    page: u32,
    canvas: CanvasSize,
    highlight: Highlight,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(citelens_core::config::project_dirs().as_ref());
    let config = EngineConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Parse { tokens } => {
            let parsed: Vec<ParsedToken> = tokens
                .into_iter()
                .map(|token| ParsedToken {
                    citation: parse_citation(&token),
                    token,
                })
                .collect();
            print_json(&parsed)
        }
        Command::Resolve {
            token,
            results,
            browsed,
            browsed_user,
            open,
            total_pages,
        } => {
            let results: Vec<SearchResult> = read_optional_json(results.as_deref())?;
            let browsed: Vec<BrowsedFile> = read_optional_json(browsed.as_deref())?;
            let open: Option<OpenDocumentState> = read_optional_json(open.as_deref())?;
            let resolution = resolve(
                &config,
                &token,
                &results,
                &browsed,
                browsed_user.as_deref(),
                open.as_ref(),
            )?
            .map(|resolution| match total_pages {
                Some(total) => Resolution {
                    command: resolution.command.clamped_to(total),
                    ..resolution
                },
                None => resolution,
            });
            print_json(&resolution)
        }
        Command::Ocr {
            user,
            filename,
            page,
            blob_path,
        } => {
            let resolver = build_resolver(&config)?;
            let query = OcrQuery {
                user_id: user,
                filename,
                page,
                blob_path,
            };
            let lookup = resolver.resolve(&query).await;
            print_json(&OcrReport {
                folder: resolver.rules().analysis_folder(&query),
                source: lookup.kind(),
                page: lookup.page().map(|page| page.as_ref().clone()),
            })
        }
        Command::Locate {
            pdf,
            page,
            keyword,
            canvas_width,
            user,
            filename,
            blob_path,
            png,
        } => {
            let meta = user.zip(blob_path).map(|(user_id, blob_path)| DocumentMeta {
                user_id,
                filename: filename.unwrap_or_else(|| file_name(&pdf)),
                page,
                blob_path,
            });
            locate(&config, &pdf, page, &keyword, canvas_width, meta, png.as_deref()).await
        }
    }
}

fn resolve(
    config: &EngineConfig,
    token: &str,
    results: &[SearchResult],
    browsed: &[BrowsedFile],
    browsed_user: Option<&str>,
    open: Option<&OpenDocumentState>,
) -> Result<Option<Resolution>> {
    let matcher = ResultMatcher::new(config.matcher_options()?);
    let owners = FileOwnerIndex::new();
    owners.record_results(results);
    if let Some(meta) = open.and_then(|open| open.meta.clone()) {
        owners.record(meta);
    }

    let ctx = MatchContext {
        results,
        browsed_files: browsed,
        browsed_user,
        owners: Some(&owners),
        open_document: open,
    };
    Ok(matcher.resolve_token(token, &ctx))
}

fn build_resolver(config: &EngineConfig) -> Result<Arc<OcrLayoutResolver>> {
    let store = open_blob_store(&config.storage)?;
    Ok(Arc::new(OcrLayoutResolver::new(store, config.folder_rules())))
}

async fn locate(
    config: &EngineConfig,
    pdf: &Path,
    page: u32,
    keyword: &str,
    canvas_width: u32,
    meta: Option<DocumentMeta>,
    png: Option<&Path>,
) -> Result<()> {
    if !pdf.is_file() {
        bail!("file does not exist: {:?}", pdf);
    }
    if canvas_width == 0 {
        bail!("canvas width must be positive");
    }

    let pdfium = bind_pdfium(config.render.pdfium_library_path.as_deref())?;
    let document = PdfiumDocument::open(pdfium, pdf)?;
    let (native_width, native_height) = document.page_size(page)?;
    let canvas_width_px = f64::from(canvas_width);
    let canvas = CanvasSize::new(canvas_width_px, native_height * canvas_width_px / native_width);

    let locator = HighlightLocator::new(build_resolver(config)?)
        .with_max_ocr_highlights(config.ocr.max_highlights);
    let request = LocateRequest {
        page,
        keyword,
        canvas,
        meta: meta.as_ref(),
    };
    let highlight = locator
        .locate(&request, &document, &CancelToken::new())
        .await?;
    info!(page, empty = highlight.is_empty(), "located keyword");

    if let Some(out) = png {
        let mut image = document.render_page(page, canvas_width)?;
        paint_highlight(&mut image, &highlight, HighlightStyle::default());
        write_png(&image, out)?;
    }

    print_json(&LocateReport {
        page,
        canvas,
        highlight,
    })
}

fn read_optional_json<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid JSON in {:?}", path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), value).context("failed to write output")?;
    println!();
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_owned()
}

/// Console output goes to stderr so stdout stays machine-readable. The log
/// file is skipped when the data directory is unavailable.
fn init_logging(project_dirs: Option<&ProjectDirs>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let file = project_dirs.map(open_log_file).transpose();
    let (file_layer, guard) = match file {
        Ok(Some((writer, guard))) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        Ok(None) => (None, None),
        Err(err) => {
            eprintln!("citelens: file logging disabled: {err:#}");
            (None, None)
        }
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
    {
        eprintln!("citelens: {}", anyhow!(err));
    }
    if guard.is_none() {
        warn!("logging to stderr only");
    }
    guard
}

fn open_log_file(
    project_dirs: &ProjectDirs,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
    let file_appender = tracing_appender::rolling::never(log_dir, "citelens.log");
    Ok(tracing_appender::non_blocking(file_appender))
}
