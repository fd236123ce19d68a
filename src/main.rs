//! forward-tts CLI - text-to-speech synthesis from the command line

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use forward_tts::{ModelConfig, Synthesizer, VERSION};

/// forward-tts - non-autoregressive text-to-speech in Rust
#[derive(Parser, Debug)]
#[command(name = "forward-tts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Force CPU even when an accelerator is available
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize speech from phoneme text
    Synth {
        /// Phoneme text to synthesize
        #[arg(short, long)]
        text: String,

        /// Output audio file path
        #[arg(short, long, default_value = "output.wav")]
        output: PathBuf,

        /// Speech-rate divisor: 2.0 halves all durations (double speed)
        #[arg(long, default_value = "1.0")]
        alpha: f64,

        /// Path to model config file
        #[arg(short, long, default_value = "checkpoints/config.yaml")]
        config: PathBuf,

        /// Path to model weights
        #[arg(short, long, default_value = "checkpoints/model.safetensors")]
        weights: PathBuf,
    },

    /// Show model configuration
    Info {
        /// Path to model config file
        #[arg(short, long, default_value = "checkpoints/config.yaml")]
        config: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("forward-tts v{}", VERSION);

    let device = if cli.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    match cli.command {
        Commands::Synth {
            text,
            output,
            alpha,
            config,
            weights,
        } => {
            let pb = create_progress_bar("Loading model...");
            let synth = Synthesizer::load(&config, &weights, &device)
                .context("loading synthesizer")?;
            pb.finish_with_message("Model loaded");

            let pb = create_progress_bar("Synthesizing...");
            let result = synth.synthesize(&text, alpha)?;
            pb.finish_with_message("Done");

            result.save(&output)?;
            info!(
                "Wrote {:.2}s of audio ({} tokens) to {:?}",
                result.duration(),
                result.durations.len(),
                output
            );
            Ok(())
        }

        Commands::Info { config } => {
            if config.exists() {
                let cfg = ModelConfig::load(&config).context("Failed to load config")?;
                println!("{:#?}", cfg);
            } else {
                eprintln!("Config file not found: {:?}", config);
            }
            Ok(())
        }
    }
}
