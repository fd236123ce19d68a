//! Neural network components of the acoustic model
//!
//! - Shared conv/highway building blocks and recurrent cells
//! - Series predictors (duration, pitch, energy)
//! - Length regulation strategies
//! - CBHG encoder used as prenet and postnet
//! - The ForwardTacotron top-level model
//! - Vocoder seam (mel to waveform)

pub mod blocks;
pub mod cbhg;
pub mod forward_tacotron;
pub mod length_regulator;
pub mod rnn;
pub mod series_predictor;
pub mod vocoder;

// Re-exports
pub use forward_tacotron::{ForwardTacotron, GenerateOutput, TrainingBatch, TrainingOutput};
pub use length_regulator::LengthRegulator;
pub use series_predictor::SeriesPredictor;
