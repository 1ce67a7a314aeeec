//! Ember - LED matrix fireplace
//!
//! `ember serve` runs the HTTP control API (the default), `ember run` plays
//! one session in the foreground, `ember generate` precomputes the noise
//! assets and `ember config` prints the effective configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select};
use ember_app::{ApiServer, Config, Runtime};
use ember_noise::{GenerateConfig, NoiseFileStore};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Procedural fireplace for WS2812 matrices
#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "LED matrix fireplace with looping audio and remote control")]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/ember/config.txt)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP control API
    Serve {
        /// Listen address, overrides http_bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run a single session in the foreground
    Run {
        /// Session length in minutes
        #[arg(short, long)]
        duration: Option<f64>,

        /// Fade-out tail in minutes
        #[arg(short, long)]
        fade_out: Option<f64>,
    },

    /// Precompute noise strips into the noise directory
    Generate {
        /// Number of strips
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Rows per strip
        #[arg(short, long)]
        length: Option<usize>,

        /// Base seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Output directory, overrides noise_dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log_level);

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => serve(&config, bind),
        Commands::Run { duration, fade_out } => run_once(&config, duration, fade_out),
        Commands::Generate {
            count,
            length,
            seed,
            output,
        } => generate(&config, count, length, seed, output),
        Commands::Config => {
            println!("{}", config.serialize());
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Receives once on Ctrl-C
fn interrupt_channel() -> Result<crossbeam_channel::Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(rx)
}

fn serve(config: &Config, bind: Option<String>) -> Result<()> {
    let runtime = Runtime::build(config).context("Failed to initialise runtime")?;
    let bind = bind.unwrap_or_else(|| config.http_bind.clone());
    let server = ApiServer::spawn(&bind, runtime.control())
        .with_context(|| format!("Failed to bind control API on {}", bind))?;
    info!("Endpoints: POST /start, POST /stop, POST /volume, GET /status, GET /health");

    let interrupted = interrupt_channel()?;
    let _ = interrupted.recv();

    info!("Shutting down");
    server.shutdown();
    runtime.shutdown();
    Ok(())
}

fn run_once(config: &Config, duration: Option<f64>, fade_out: Option<f64>) -> Result<()> {
    let runtime = Runtime::build(config).context("Failed to initialise runtime")?;
    let control = runtime.control();
    let duration = duration.unwrap_or(config.default_duration_minutes);
    let fade_out = fade_out.unwrap_or(config.default_fade_minutes);

    control
        .start(duration, fade_out)
        .context("Failed to start fireplace")?;
    let done = control
        .completion()
        .context("Render loop not running after start")?;
    let interrupted = interrupt_channel()?;

    select! {
        recv(done) -> _ => info!("Session complete"),
        recv(interrupted) -> _ => {
            info!("Interrupted, stopping");
            control.stop();
        }
    }

    runtime.shutdown();
    Ok(())
}

fn generate(
    config: &Config,
    count: Option<usize>,
    length: Option<usize>,
    seed: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let dir = output.unwrap_or_else(|| config.noise_dir.clone());
    let settings = GenerateConfig {
        strip_count: count.unwrap_or(config.strip_count),
        strip_length: length.unwrap_or(config.strip_length),
        width: config.matrix_width,
        octaves: config.noise_octaves,
        seed: seed.unwrap_or(config.noise_seed),
        ..GenerateConfig::default()
    };

    info!(
        "Generating {} strips of {}x{} into {}",
        settings.strip_count,
        settings.strip_length,
        settings.width,
        dir.display()
    );
    let paths = NoiseFileStore::generate(&dir, &settings)
        .with_context(|| format!("Failed to generate noise into {}", dir.display()))?;
    for path in &paths {
        println!("{}", path.display());
    }
    Ok(())
}
