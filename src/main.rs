//! `tiled-kernels` command line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use wgpu_tiled_kernels::app::{self, Job, RunOptions};
use wgpu_tiled_kernels::{BackendKind, Config, Result};

#[derive(Parser)]
#[command(name = "tiled-kernels")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "GPU tiled convolution and hierarchical prefix sum", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Device to run on
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,

    /// Work-group block size for the selected primitive
    #[arg(long, global = true)]
    block_size: Option<u32>,

    /// Check the device result against the naive reference
    #[arg(long, global = true)]
    verify: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inclusive prefix sum of an array file
    Scan(Files),
    /// Zero-padded 2D convolution of a matrix file with its mask
    Convolve(Files),
}

#[derive(clap::Args)]
struct Files {
    /// Input file
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e} (code {})", e.code());
            eprintln!("tiled-kernels: {e} (code {})", e.code());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let (job, files) = match cli.command {
        Commands::Scan(files) => (Job::Scan, files),
        Commands::Convolve(files) => (Job::Convolve, files),
    };
    if let Some(block) = cli.block_size {
        match job {
            Job::Scan => config.scan.block_size = block,
            Job::Convolve => config.convolution.block_size = block,
        }
    }
    if let Some(input) = files.input {
        config.files.input = input;
    }
    if let Some(output) = files.output {
        config.files.output = output;
    }
    config.validate()?;

    app::run(job, &config, RunOptions { verify: cli.verify })
}
