//! # forward-tts
//!
//! A non-autoregressive text-to-speech acoustic model in Rust, built on
//! Candle. Phoneme sequences are mapped to mel-spectrograms through
//! explicit duration prediction and length regulation, with pitch and
//! energy contours predicted per token and fused into the hidden
//! sequence. A vocoder seam (Griffin-Lim shipped, neural vocoders
//! pluggable) turns the mel output into a waveform.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forward_tts::Synthesizer;
//! use candle_core::Device;
//!
//! let synth = Synthesizer::load("checkpoints/config.yaml",
//!                               "checkpoints/model.safetensors",
//!                               &Device::Cpu)?;
//! let result = synth.synthesize("həˈloʊ wɜːld", 1.0)?;
//! result.save("output.wav")?;
//! ```

// Require docs for public items, but not struct fields (too verbose)
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod audio;
pub mod config;
pub mod inference;
pub mod models;
pub mod text;

// Re-exports for convenience
pub use config::ModelConfig;
pub use inference::{SynthesisResult, Synthesizer};
pub use models::forward_tacotron::{ForwardTacotron, MEL_PAD_VALUE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for output audio (22050 Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;
