//! Text-to-speech synthesis pipeline
//!
//! Orchestrates the collaborators around the acoustic model:
//! 1. Text cleaning and symbol lookup
//! 2. Acoustic model inference (durations, contours, mel)
//! 3. Waveform generation through the configured vocoder

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::path::Path;
use tracing::{debug, info};

use crate::audio::AudioOutput;
use crate::config::ModelConfig;
use crate::models::vocoder::{GriffinLim, Vocoder};
use crate::models::ForwardTacotron;
use crate::text::{clean_text, SymbolTable};

/// Result of one synthesis call.
pub struct SynthesisResult {
    /// Generated audio samples.
    pub audio: Vec<f32>,
    /// Sample rate of `audio`.
    pub sample_rate: u32,
    /// Final mel prediction, (1, n_mels, frames).
    pub mel: Tensor,
    /// Per-token durations the length regulator used.
    pub durations: Vec<f32>,
}

impl SynthesisResult {
    /// Save the audio to a WAV file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        AudioOutput::save(&self.audio, self.sample_rate, path)
    }

    /// Duration of the audio in seconds.
    pub fn duration(&self) -> f32 {
        self.audio.len() as f32 / self.sample_rate as f32
    }
}

/// Text-to-speech synthesizer: acoustic model plus vocoder.
pub struct Synthesizer {
    device: Device,
    config: ModelConfig,
    symbols: SymbolTable,
    model: ForwardTacotron,
    vocoder: Box<dyn Vocoder>,
}

impl Synthesizer {
    /// Load config and weights, pairing the model with the default
    /// Griffin-Lim vocoder.
    ///
    /// The YAML config is read first so the architecture matches the
    /// persisted tensors; any shape mismatch fails here.
    pub fn load<P: AsRef<Path>>(config_path: P, weights_path: P, device: &Device) -> Result<Self> {
        let config = ModelConfig::load(&config_path)?;
        let vocoder = Box::new(GriffinLim::new(&config.audio));
        Self::with_vocoder(config, weights_path, vocoder, device)
    }

    /// Load with a caller-supplied vocoder.
    pub fn with_vocoder<P: AsRef<Path>>(
        config: ModelConfig,
        weights_path: P,
        vocoder: Box<dyn Vocoder>,
        device: &Device,
    ) -> Result<Self> {
        let symbols = SymbolTable::new();
        let weights_path = weights_path.as_ref();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)?
        };
        let model = ForwardTacotron::new(&config.model, symbols.len(), vb)
            .with_context(|| format!("loading weights from {:?}", weights_path))?;
        info!(step = model.step(), "acoustic model loaded");

        Ok(Self {
            device: device.clone(),
            config,
            symbols,
            model,
            vocoder,
        })
    }

    /// Build a synthesizer around an already-constructed model, for
    /// callers that manage weights themselves.
    pub fn from_parts(config: ModelConfig, model: ForwardTacotron, vocoder: Box<dyn Vocoder>, device: &Device) -> Self {
        Self {
            device: device.clone(),
            config,
            symbols: SymbolTable::new(),
            model,
            vocoder,
        }
    }

    /// Synthesize speech for `text` at speech rate `1 / alpha`.
    pub fn synthesize(&self, text: &str, alpha: f64) -> Result<SynthesisResult> {
        let cleaned = clean_text(text);
        let ids = self.symbols.text_to_sequence(&cleaned);
        debug!(tokens = ids.len(), "encoded input text");

        let output = self.model.generate(&ids, alpha)?;
        let frames = output.mel_post.dim(2)?;
        debug!(frames, "acoustic model finished");

        let audio = self.vocoder.synthesize(&output.mel_post)?;
        Ok(SynthesisResult {
            audio,
            sample_rate: self.vocoder.sample_rate(),
            mel: output.mel_post,
            durations: output.durations,
        })
    }

    /// The device the model runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{VarBuilder, VarMap};

    fn small_synthesizer(device: &Device) -> (VarMap, Synthesizer) {
        let mut config = ModelConfig::default();
        config.model.embed_dims = 16;
        config.model.series_embed_dims = 8;
        config.model.duration_predictor.conv_dims = 8;
        config.model.duration_predictor.rnn_dims = 4;
        config.model.pitch_predictor.conv_dims = 8;
        config.model.pitch_predictor.rnn_dims = 4;
        config.model.energy_predictor.conv_dims = 8;
        config.model.energy_predictor.rnn_dims = 4;
        config.model.pitch_emb_dims = 4;
        config.model.energy_emb_dims = 4;
        config.model.prenet.k = 2;
        config.model.prenet.dims = 8;
        config.model.prenet.num_highways = 1;
        config.model.postnet.k = 2;
        config.model.postnet.dims = 8;
        config.model.postnet.num_highways = 1;
        config.model.rnn_dims = 8;
        config.model.n_mels = 80;
        config.audio.griffin_lim_iters = 1;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let symbols = SymbolTable::new();
        let model = ForwardTacotron::new(&config.model, symbols.len(), vb).unwrap();
        let vocoder = Box::new(GriffinLim::new(&config.audio));
        let synth = Synthesizer::from_parts(config, model, vocoder, device);
        (varmap, synth)
    }

    #[test]
    fn test_synthesize_produces_audio() {
        let device = Device::Cpu;
        let (_map, synth) = small_synthesizer(&device);
        let result = synth.synthesize("həloʊ", 1.0).unwrap();
        assert!(!result.audio.is_empty());
        assert_eq!(result.sample_rate, 22050);
        assert!(result.duration() > 0.0);
    }

    #[test]
    fn test_synthesize_empty_text() {
        let device = Device::Cpu;
        let (_map, synth) = small_synthesizer(&device);
        // no valid symbols at all still yields audio via the
        // single-token substitution
        let result = synth.synthesize("", 1.0).unwrap();
        assert!(!result.audio.is_empty());
    }
}
