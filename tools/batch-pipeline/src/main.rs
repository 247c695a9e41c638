use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use stemscore_domain::{read_manifest, ArrangementExporter, JsonExporter, ManifestStore};
use stemscore_engine::{song_id_for, Collaborators, PipelineConfig, SongJob, SongPipeline};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Normalize transcribed stems into per-song arrangements"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every matching audio file under a directory
    RunBatch(BatchArgs),
    /// Print a stored manifest
    ShowManifest {
        /// Path to a manifest JSON file
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Directory scanned recursively for input mixes
    input_dir: PathBuf,
    /// Audio file extension to pick up
    #[arg(long, default_value = "wav")]
    extension: String,
    /// Root holding `<song_id>/<stem>.wav` and transcription sidecars
    #[arg(long, default_value = "stems")]
    stems_root: PathBuf,
    /// Where per-song manifests are kept
    #[arg(long, default_value = "manifests")]
    manifests: PathBuf,
    /// Where arrangement JSON is written
    #[arg(long, default_value = "arrangements")]
    out: PathBuf,
    /// YAML pipeline config; defaults apply when absent
    #[arg(long)]
    config: Option<PathBuf>,
    /// Transpose songs to C major / A minor
    #[arg(long)]
    normalize_key: bool,
    /// Songs processed concurrently
    #[arg(long, default_value_t = 2)]
    jobs: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchSummary {
    succeeded: usize,
    failed: usize,
}

fn scan_inputs(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let wanted = extension.trim_start_matches('.');
    let mut inputs = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted));
        if entry.file_type().is_file() && matches {
            inputs.push(entry.into_path());
        }
    }
    Ok(inputs)
}

/// Splits inputs into those with a unique song id and those sharing one.
/// Songs sharing an id would write the same manifest, stems and output.
fn partition_by_song_id(inputs: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for path in &inputs {
        if let Ok(id) = song_id_for(path) {
            *counts.entry(id).or_default() += 1;
        }
    }
    inputs.into_iter().partition(|path| {
        song_id_for(path).map_or(true, |id| counts.get(&id).copied().unwrap_or(0) <= 1)
    })
}

fn process_song(
    pipeline: &SongPipeline,
    path: &Path,
    out_dir: &Path,
    normalize_key: bool,
) -> Result<PathBuf> {
    let job = SongJob::from_path(path, normalize_key)?;
    let output = pipeline.run(&job)?;
    let bytes = JsonExporter.export(&output.arrangement)?;
    fs::create_dir_all(out_dir)?;
    let target = out_dir.join(format!("{}.json", job.song_id));
    fs::write(&target, bytes).with_context(|| format!("writing {}", target.display()))?;
    Ok(target)
}

async fn run_batch(
    pipeline: Arc<SongPipeline>,
    inputs: Vec<PathBuf>,
    out_dir: PathBuf,
    normalize_key: bool,
    jobs: usize,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    let (inputs, clashing) = partition_by_song_id(inputs);
    for path in clashing {
        error!(input = %path.display(), "song id is shared with another input; skipping");
        summary.failed += 1;
    }

    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut handles = Vec::with_capacity(inputs.len());
    for path in inputs {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let pipeline = Arc::clone(&pipeline);
        let out_dir = out_dir.clone();
        let task_path = path.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process_song(&pipeline, &task_path, &out_dir, normalize_key)
        });
        handles.push((path, handle));
    }

    for (path, handle) in handles {
        match handle.await {
            Ok(Ok(target)) => {
                info!(input = %path.display(), output = %target.display(), "song done");
                summary.succeeded += 1;
            }
            Ok(Err(err)) => {
                error!(input = %path.display(), error = %format!("{err:#}"), "song failed");
                summary.failed += 1;
            }
            Err(err) => {
                error!(input = %path.display(), error = %err, "song task aborted");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn run_batch_command(args: BatchArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let inputs = scan_inputs(&args.input_dir, &args.extension)?;
    info!(count = inputs.len(), dir = %args.input_dir.display(), "found inputs");

    let collaborators = Collaborators::file_backed(&args.stems_root, &config);
    let pipeline = Arc::new(SongPipeline::new(
        config,
        collaborators,
        ManifestStore::new(&args.manifests),
    ));
    let summary = run_batch(pipeline, inputs, args.out, args.normalize_key, args.jobs).await?;
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "batch finished"
    );
    println!(
        "Processed {} songs ({} failed)",
        summary.succeeded + summary.failed,
        summary.failed
    );
    Ok(())
}

fn show_manifest(path: &Path) -> Result<()> {
    let manifest =
        read_manifest(path).with_context(|| format!("reading manifest {}", path.display()))?;
    info!(song = %manifest.song_id, stages = ?manifest.completed_stages(), "loaded manifest");
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::RunBatch(args) => run_batch_command(args).await,
        Command::ShowManifest { path } => show_manifest(&path),
    }
}
