use annex_signals::{Config, Pipeline, UploadedFile};
use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use walkdir::{DirEntry, WalkDir};

#[derive(Parser, Debug)]
#[command(
    name = "annex-signals",
    about = "Extract evidence-backed Annex IV signals from project files",
    version
)]
struct Args {
    /// Files or directories to analyze
    paths: Vec<PathBuf>,

    /// Read uploaded files from a JSON request body ({"files": [...]})
    #[arg(short, long)]
    request: Option<PathBuf>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail instead of degrading when the backend errors
    #[arg(long)]
    require_llm: bool,

    /// Run per-file model extraction before rewriting
    #[arg(long)]
    enable_extraction: bool,

    /// Pretty-print the JSON output
    #[arg(short, long)]
    pretty: bool,
}

#[derive(Deserialize)]
struct RequestBody {
    files: Vec<UploadedFile>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.require_llm {
        config = config.with_require_llm(true);
    }
    if args.enable_extraction {
        config = config.with_extraction(true);
    }

    let mut files = Vec::new();
    if let Some(request) = &args.request {
        files.extend(read_request(request)?);
    }
    for path in &args.paths {
        files.extend(collect_files(path)?);
    }
    if files.is_empty() {
        bail!("No input files. Pass paths to analyze or --request <FILE>.");
    }

    let pipeline = Pipeline::from_config(config).context("Failed to set up pipeline")?;
    let report = pipeline.process(&files).await?;

    let output = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", output);
    Ok(())
}

fn read_request(path: &Path) -> Result<Vec<UploadedFile>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request body {}", path.display()))?;
    let body: RequestBody = serde_json::from_str(&content)
        .with_context(|| format!("Invalid request body {}", path.display()))?;
    Ok(body.files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// A single file becomes one upload; a directory is walked in name order,
/// skipping hidden entries and anything that is not UTF-8 text.
fn collect_files(path: &Path) -> Result<Vec<UploadedFile>> {
    if path.is_file() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        return Ok(vec![UploadedFile::new(filename, content)]);
    }
    if !path.is_dir() {
        bail!("No such file or directory: {}", path.display());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %entry.path().display(), "Skipping unreadable file: {}", err);
                continue;
            }
        };
        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let filename = entry.file_name().to_string_lossy().to_string();
        files.push(UploadedFile::new(filename, content).with_relative_path(relative));
    }
    Ok(files)
}
