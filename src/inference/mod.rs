//! Inference entry point
//!
//! - Synthesizer: checkpoint loading and text-to-audio orchestration
//! - SynthesisResult: audio plus diagnostics (mel, durations)

mod pipeline;

pub use pipeline::{Synthesizer, SynthesisResult};
