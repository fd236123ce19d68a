//! Integration tests for forward-tts
//!
//! Exercises the full chain from phoneme text to audio with
//! randomly initialized weights.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use forward_tts::config::{ModelConfig, RegulatorKind};
use forward_tts::models::forward_tacotron::{ForwardTacotron, TrainingBatch, MEL_PAD_VALUE};
use forward_tts::models::vocoder::{GriffinLim, Vocoder};
use forward_tts::text::{clean_text, SymbolTable};
use forward_tts::Synthesizer;

fn test_config() -> ModelConfig {
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
    config.model.prenet.k = 3;
    config.model.prenet.dims = 8;
    config.model.prenet.num_highways = 2;
    config.model.postnet.k = 3;
    config.model.postnet.dims = 8;
    config.model.postnet.num_highways = 2;
    config.model.rnn_dims = 8;
    config.model.n_mels = 80;
    config.audio.griffin_lim_iters = 1;
    config
}

fn build_model(config: &ModelConfig, device: &Device) -> (VarMap, ForwardTacotron) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let symbols = SymbolTable::new();
    let model = ForwardTacotron::new(&config.model, symbols.len(), vb).unwrap();
    (varmap, model)
}

/// Text cleaning plus symbol lookup
#[test]
fn test_text_frontend() {
    let table = SymbolTable::new();
    let cleaned = clean_text("  HəLoʊ   wɜld ");
    let ids = table.text_to_sequence(&cleaned);
    assert!(!ids.is_empty());
    // unknown characters are dropped, not mapped
    assert!(ids.len() <= cleaned.chars().count());
}

/// Full chain: text to audio through model and vocoder
#[test]
fn test_text_to_audio_chain() {
    let device = Device::Cpu;
    let config = test_config();
    let (_map, model) = build_model(&config, &device);

    let table = SymbolTable::new();
    let ids = table.text_to_sequence("əbd");
    let output = model.generate(&ids, 1.0).unwrap();

    let (batch, n_mels, frames) = output.mel_post.dims3().unwrap();
    assert_eq!(batch, 1);
    assert_eq!(n_mels, 80);
    assert!(frames >= 1);

    let vocoder = GriffinLim::new(&config.audio);
    let audio = vocoder.synthesize(&output.mel_post).unwrap();
    assert!(!audio.is_empty());
    assert!(audio.iter().all(|v| v.is_finite()));
}

/// The synthesizer facade wires everything together
#[test]
fn test_synthesizer_facade() {
    let device = Device::Cpu;
    let config = test_config();
    let (_map, model) = build_model(&config, &device);
    let vocoder = Box::new(GriffinLim::new(&config.audio));
    let synth = Synthesizer::from_parts(config, model, vocoder, &device);

    let result = synth.synthesize("ma", 1.0).unwrap();
    assert!(!result.audio.is_empty());
    assert_eq!(result.sample_rate, 22050);
    assert_eq!(result.mel.dim(1).unwrap(), 80);
}

/// Inference is deterministic: same input, same mel
#[test]
fn test_generate_is_deterministic() {
    let device = Device::Cpu;
    let config = test_config();
    let (_map, model) = build_model(&config, &device);

    let ids: Vec<u32> = vec![12, 13, 14, 15, 16, 17];
    let a = model.generate(&ids, 1.0).unwrap();
    let b = model.generate(&ids, 1.0).unwrap();
    assert_eq!(a.durations, b.durations);
    let ma: Vec<f32> = a.mel_post.flatten_all().unwrap().to_vec1().unwrap();
    let mb: Vec<f32> = b.mel_post.flatten_all().unwrap().to_vec1().unwrap();
    assert_eq!(ma, mb);
}

/// Training and inference modes stay mutually consistent
#[test]
fn test_training_then_inference() {
    let device = Device::Cpu;
    let config = test_config();
    let (_map, mut model) = build_model(&config, &device);

    let tokens = Tensor::from_vec(vec![1u32, 2, 3, 4, 0], (1, 5), &device).unwrap();
    let durations = Tensor::from_vec(vec![2.0f32, 3.0, 1.0, 2.0, 0.0], (1, 5), &device).unwrap();
    let pitch = Tensor::from_vec(vec![0.1f32; 5], (1, 5), &device).unwrap();
    let energy = Tensor::from_vec(vec![0.2f32; 5], (1, 5), &device).unwrap();

    let batch = TrainingBatch {
        tokens: &tokens,
        token_lens: &[4],
        durations: &durations,
        pitch: &pitch,
        energy: &energy,
        mel_frames: 10,
    };
    let train_out = model.forward(&batch).unwrap();
    assert_eq!(model.step(), 1);
    assert_eq!(train_out.mel_post.dims3().unwrap(), (1, 80, 10));
    // ground-truth durations sum to 8, so the last two frames are padding
    let v: Vec<Vec<Vec<f32>>> = train_out.mel_post.to_vec3().unwrap();
    assert!((v[0][0][9] - MEL_PAD_VALUE).abs() < 1e-6);

    // predictor outputs at padded positions are forced to zero
    let dur_hat: Vec<Vec<f32>> = train_out.dur_hat.to_vec2().unwrap();
    assert_eq!(dur_hat[0][4], 0.0);

    // inference leaves the step counter alone
    let infer_out = model.generate(&[1, 2, 3, 4], 1.0).unwrap();
    assert_eq!(infer_out.mel_post.dim(1).unwrap(), 80);
    assert_eq!(model.step(), 1);
}

/// Every regulator variant survives the full generate path
#[test]
fn test_all_regulator_kinds_generate() {
    let device = Device::Cpu;
    for kind in [
        RegulatorKind::HardIndex,
        RegulatorKind::RepeatInterleave,
        RegulatorKind::Gaussian,
    ] {
        let mut config = test_config();
        config.model.regulator.kind = kind;
        let (_map, model) = build_model(&config, &device);
        let out = model.generate(&[3, 4, 5], 1.0).unwrap();
        assert!(
            out.mel_post.dim(2).unwrap() >= 1,
            "{:?} produced no frames",
            kind
        );
    }
}

/// Degenerate inputs are recovered locally, never surfaced
#[test]
fn test_degenerate_inputs() {
    let device = Device::Cpu;
    let config = test_config();
    let (_map, model) = build_model(&config, &device);

    // empty token sequence
    let out = model.generate(&[], 1.0).unwrap();
    assert_eq!(out.durations.len(), 1);
    assert!(out.mel_post.dim(2).unwrap() >= 1);

    // extreme alpha collapses durations to ~0; the floor keeps the
    // output at two frames per token minimum
    let out = model.generate(&[1, 2, 3], 1e9).unwrap();
    let total: i64 = out.durations.iter().map(|d| *d as i64).sum();
    assert!(total > 0);
    assert!(out.mel_post.dim(2).unwrap() >= 1);
}

/// Config round-trips through YAML
#[test]
fn test_config_yaml_round_trip() {
    let config = test_config();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let parsed: ModelConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed.model.embed_dims, config.model.embed_dims);
    assert_eq!(parsed.model.regulator.kind, config.model.regulator.kind);
    assert_eq!(parsed.audio.sample_rate, config.audio.sample_rate);
}
