//! Model and audio configuration
//!
//! Configuration is stored as YAML next to the checkpoint. The loader
//! reads it before the weights so the architecture can be instantiated
//! to match the persisted tensors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration: acoustic model plus audio/DSP parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: AcousticConfig,
    pub audio: AudioConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: AcousticConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {:?}", path))
    }
}

/// Acoustic model dimensions and layer counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcousticConfig {
    /// Main token embedding width.
    pub embed_dims: usize,
    /// Token embedding width inside the series predictors.
    pub series_embed_dims: usize,
    pub duration_predictor: PredictorConfig,
    pub pitch_predictor: PredictorConfig,
    pub energy_predictor: PredictorConfig,
    /// Channels of the projected pitch contour. 0 disables pitch fusion.
    pub pitch_emb_dims: usize,
    /// Channels of the projected energy contour. 0 disables energy fusion.
    pub energy_emb_dims: usize,
    pub prenet: CbhgConfig,
    pub postnet: CbhgConfig,
    /// Hidden size of the decoder LSTM (per direction).
    pub rnn_dims: usize,
    /// Dropout applied after the decoder LSTM during training.
    pub dropout: f32,
    /// Mel bins of the output spectrogram.
    pub n_mels: usize,
    pub regulator: RegulatorConfig,
}

impl Default for AcousticConfig {
    fn default() -> Self {
        Self {
            embed_dims: 256,
            series_embed_dims: 64,
            duration_predictor: PredictorConfig::default(),
            pitch_predictor: PredictorConfig {
                rnn_dims: 128,
                ..PredictorConfig::default()
            },
            energy_predictor: PredictorConfig::default(),
            pitch_emb_dims: 64,
            energy_emb_dims: 16,
            prenet: CbhgConfig {
                k: 16,
                dims: 256,
                num_highways: 4,
            },
            postnet: CbhgConfig {
                k: 8,
                dims: 256,
                num_highways: 4,
            },
            rnn_dims: 512,
            dropout: 0.1,
            n_mels: 80,
            regulator: RegulatorConfig::default(),
        }
    }
}

/// Series predictor (duration / pitch / energy) hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub conv_dims: usize,
    pub rnn_dims: usize,
    pub dropout: f32,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            conv_dims: 256,
            rnn_dims: 64,
            dropout: 0.5,
        }
    }
}

/// CBHG encoder/postnet hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CbhgConfig {
    /// Largest kernel width of the convolution bank.
    pub k: usize,
    /// Channel count of bank convolutions and highway layers.
    pub dims: usize,
    pub num_highways: usize,
}

impl Default for CbhgConfig {
    fn default() -> Self {
        Self {
            k: 8,
            dims: 256,
            num_highways: 4,
        }
    }
}

/// Length regulation strategy, fixed at model construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulatorKind {
    /// Cumulative-duration index building plus gather.
    HardIndex,
    /// Per-token nearest-integer repetition.
    RepeatInterleave,
    /// Soft attention over Gaussian windows around token centers.
    Gaussian,
}

/// Length regulator selection and its variant-specific parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatorConfig {
    pub kind: RegulatorKind,
    /// Lower bound of the predicted Gaussian bandwidth, in frames.
    pub sigma_min: f32,
    /// Upper bound of the predicted Gaussian bandwidth, in frames.
    pub sigma_max: f32,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            kind: RegulatorKind::HardIndex,
            sigma_min: 0.1,
            sigma_max: 10.0,
        }
    }
}

/// STFT and mel filterbank parameters shared by the mel extractor and
/// the Griffin-Lim vocoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub n_mels: usize,
    pub fmin: f32,
    /// None means Nyquist.
    pub fmax: Option<f32>,
    /// Griffin-Lim phase reconstruction iterations.
    pub griffin_lim_iters: usize,
    /// Magnitude exponent applied before phase reconstruction.
    pub power: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            n_fft: 1024,
            hop_length: 256,
            win_length: 1024,
            n_mels: 80,
            fmin: 0.0,
            fmax: Some(8000.0),
            griffin_lim_iters: 32,
            power: 1.5,
        }
    }
}
