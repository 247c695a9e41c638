use std::path::PathBuf;

use clap::Parser;
use stemscore_domain::{ArrangementExporter, JsonExporter, ManifestStore};
use stemscore_engine::{Collaborators, PipelineConfig, SongJob, SongPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Normalize one song's stems into an arrangement", long_about = None)]
struct Cli {
    /// Path to the song's mix
    input: PathBuf,
    /// Root holding `<song_id>/<stem>.wav` and transcription sidecars
    #[arg(long, default_value = "stems")]
    stems_root: PathBuf,
    /// Where the manifest is kept
    #[arg(long, default_value = "manifests")]
    manifests: PathBuf,
    /// YAML pipeline config
    #[arg(short, long, default_value = "stemscore.yaml")]
    config: PathBuf,
    /// Transpose to C major / A minor
    #[arg(long)]
    normalize_key: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)?;
    let collaborators = Collaborators::file_backed(&cli.stems_root, &config);
    let pipeline = SongPipeline::new(config, collaborators, ManifestStore::new(&cli.manifests));
    let job = SongJob::from_path(cli.input, cli.normalize_key)?;
    let output = pipeline.run(&job)?;
    let bytes = JsonExporter.export(&output.arrangement)?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
