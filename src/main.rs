//! `scenecast` CLI - export scenes to video through a rendering surface

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "scenecast")]
#[command(about = "Frame-accurate scene export through a rendering surface")]
#[command(version)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that ffmpeg and ffprobe are available and show the active config
    Check,

    /// Stage assets and resolve duration without rendering
    Plan {
        /// Scene description JSON file
        #[arg(short, long)]
        scene: PathBuf,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the duration of a media file
    Probe {
        /// Media file
        file: PathBuf,
    },

    /// Render, merge and upload a scene
    Export {
        /// Scene description JSON file
        #[arg(short, long)]
        scene: PathBuf,

        /// Export identifier (letters, digits, '-' and '_'); random if omitted
        #[arg(short, long)]
        export_id: Option<String>,

        /// Progress webhook URL
        #[arg(short, long)]
        webhook: Option<String>,

        /// Rendering surface WebSocket URL
        #[arg(long)]
        surface: Option<String>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Skip the storage backend upload
        #[arg(long)]
        no_upload: bool,

        /// Copy the merged video here before cleanup
        #[arg(short, long)]
        keep_output: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Commands::Check => cmd::check::cmd_check().await?,
        Commands::Plan { scene, fps, json } => cmd::plan::cmd_plan(&scene, fps, json).await?,
        Commands::Probe { file } => cmd::probe::cmd_probe(&file).await?,
        Commands::Export {
            scene,
            export_id,
            webhook,
            surface,
            fps,
            no_upload,
            keep_output,
            json,
        } => {
            let options = cmd::export::ExportOptions {
                export_id,
                webhook,
                surface,
                fps,
                no_upload,
                keep_output,
                json,
            };
            cmd::export::cmd_export(&scene, options).await?;
        }
    }

    Ok(())
}
