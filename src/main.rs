// SPDX-License-Identifier: GPL-3.0-only

//! CLI front-end over the `stereo_dpc` library, exercising the camera
//! session lifecycle without the excluded operator dialog (spec §1,
//! Non-goals). Mirrors how the teacher pairs its GUI with a `clap`-based
//! `main.rs`/`cli.rs` split.

mod cli;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stereo-dpc-cli", about = "ITD Lab stereo camera pipeline controller", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the supported camera model families.
    ListModels,
    /// Run a short session against the built-in mock driver.
    Run {
        /// Camera model: VM, XC, K4, K4A, or K4J.
        #[arg(long, default_value = "XC")]
        model: String,
        /// Grab mode: parallax, corrected, before-correct, bayer-s0, bayer-s1.
        #[arg(long, default_value = "corrected")]
        grab_mode: String,
        /// Number of frames to wait for before exiting.
        #[arg(long, default_value_t = 5)]
        frames: u32,
        /// Enable the software stereo matcher on the captured pair.
        #[arg(long)]
        sw_stereo: bool,
    },
    /// Record a short session to a raw capture file.
    Record {
        #[arg(long, default_value = "XC")]
        model: String,
        #[arg(long, default_value_t = 5)]
        frames: u32,
        /// Output directory to record into (a timestamped file is created inside it).
        #[arg(long, default_value = "./recordings")]
        output: PathBuf,
    },
    /// Play back a raw capture file.
    Play {
        file: PathBuf,
    },
    /// Print a raw capture file's header and frame range.
    Info {
        file: PathBuf,
    },
    /// Start a brief session and print the depth/3D measurement at one pixel.
    Query {
        #[arg(long, default_value = "XC")]
        model: String,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::ListModels => cli::list_models(),
        Commands::Run { model, grab_mode, frames, sw_stereo } => cli::run_session(&model, &grab_mode, frames, sw_stereo),
        Commands::Record { model, frames, output } => cli::record(&model, frames, output),
        Commands::Play { file } => cli::play(file),
        Commands::Info { file } => cli::info(file),
        Commands::Query { model, x, y } => cli::query(&model, x, y),
    }
}
