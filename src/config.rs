use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{read_required, AsrError};

/// Output token granularity of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Word,
    /// Word vocabulary with character fallback for rare words.
    WordChar,
    Wordpiece,
    Char,
    Phone,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::WordChar => "word_char",
            Self::Wordpiece => "wp",
            Self::Char => "char",
            Self::Phone => "phone",
        }
    }

    /// Whether the unit name carries the `char` family (`char`, `word_char`).
    pub fn mentions_char(self) -> bool {
        matches!(self, Self::Char | Self::WordChar)
    }
}

impl FromStr for Unit {
    type Err = AsrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "word" => Ok(Self::Word),
            "word_char" => Ok(Self::WordChar),
            "wp" | "wordpiece" => Ok(Self::Wordpiece),
            "char" => Ok(Self::Char),
            // phone sets are named by size, e.g. `phone48`
            other if other.starts_with("phone") => Ok(Self::Phone),
            other => Err(AsrError::invalid_unit(other)),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RnnType {
    #[default]
    Lstm,
    Gru,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionType {
    #[default]
    Location,
    Content,
}

/// How the character-level decoder feeds the word-level decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDecSub {
    /// Attend over the sub-decoder's output distributions.
    Softmax,
    /// Attend over the sub-decoder's hidden states.
    UpdateDecoder,
    /// Attend over hidden states and distributions concatenated.
    All,
    /// Attend over both separately and mix them with a learned sigmoid gate.
    Gated,
}

impl UsageDecSub {
    pub fn parse(name: &str, gating: bool) -> Result<Self, AsrError> {
        match (name, gating) {
            ("softmax", false) => Ok(Self::Softmax),
            ("update_decoder", false) => Ok(Self::UpdateDecoder),
            ("all", false) => Ok(Self::All),
            (_, true) => Ok(Self::Gated),
            (other, false) => Err(AsrError::invalid_config(format!(
                "unknown usage_dec_sub '{other}' (expected softmax, update_decoder or all)"
            ))),
        }
    }

    /// Width of the memory the word-level decoder attends to.
    pub fn memory_dim(self, sub_hidden: usize, sub_vocab: usize) -> usize {
        match self {
            Self::Softmax => sub_vocab,
            Self::UpdateDecoder | Self::Gated => sub_hidden,
            Self::All => sub_hidden + sub_vocab,
        }
    }
}

/// Decode-time parameters as optionally supplied by the CLI or `config.yml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DecodeOverrides {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub beam_width: Option<usize>,
    #[serde(default)]
    pub max_len_ratio: Option<f64>,
    #[serde(default)]
    pub min_len_ratio: Option<f64>,
    #[serde(default)]
    pub length_penalty: Option<f64>,
    #[serde(default)]
    pub coverage_penalty: Option<f64>,
    #[serde(default)]
    pub coverage_threshold: Option<f64>,
    #[serde(default)]
    pub rnnlm_weight: Option<f64>,
    #[serde(default)]
    pub resolving_unk: Option<bool>,
    #[serde(default)]
    pub fwd_bwd_attention: Option<bool>,
    #[serde(default)]
    pub recog_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    pub batch_size: usize,
    pub beam_width: usize,
    pub max_len_ratio: f64,
    pub min_len_ratio: f64,
    pub length_penalty: f64,
    pub coverage_penalty: f64,
    pub coverage_threshold: f64,
    pub rnnlm_weight: f64,
    pub resolving_unk: bool,
    pub fwd_bwd_attention: bool,
    pub recog_unit: Option<Unit>,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            beam_width: 1,
            max_len_ratio: 1.0,
            min_len_ratio: 0.0,
            length_penalty: 0.0,
            coverage_penalty: 0.0,
            coverage_threshold: 0.0,
            rnnlm_weight: 0.0,
            resolving_unk: false,
            fwd_bwd_attention: false,
            recog_unit: None,
        }
    }
}

impl DecodeParams {
    /// Explicit values win over values stored with the model, which win over defaults.
    pub fn resolve(explicit: &DecodeOverrides, stored: &DecodeOverrides) -> Result<Self, AsrError> {
        let d = Self::default();
        let recog_unit = match explicit.recog_unit.as_ref().or(stored.recog_unit.as_ref()) {
            Some(name) => Some(name.parse::<Unit>()?),
            None => None,
        };
        let params = Self {
            batch_size: explicit.batch_size.or(stored.batch_size).unwrap_or(d.batch_size),
            beam_width: explicit.beam_width.or(stored.beam_width).unwrap_or(d.beam_width),
            max_len_ratio: explicit
                .max_len_ratio
                .or(stored.max_len_ratio)
                .unwrap_or(d.max_len_ratio),
            min_len_ratio: explicit
                .min_len_ratio
                .or(stored.min_len_ratio)
                .unwrap_or(d.min_len_ratio),
            length_penalty: explicit
                .length_penalty
                .or(stored.length_penalty)
                .unwrap_or(d.length_penalty),
            coverage_penalty: explicit
                .coverage_penalty
                .or(stored.coverage_penalty)
                .unwrap_or(d.coverage_penalty),
            coverage_threshold: explicit
                .coverage_threshold
                .or(stored.coverage_threshold)
                .unwrap_or(d.coverage_threshold),
            rnnlm_weight: explicit
                .rnnlm_weight
                .or(stored.rnnlm_weight)
                .unwrap_or(d.rnnlm_weight),
            resolving_unk: explicit
                .resolving_unk
                .or(stored.resolving_unk)
                .unwrap_or(d.resolving_unk),
            fwd_bwd_attention: explicit
                .fwd_bwd_attention
                .or(stored.fwd_bwd_attention)
                .unwrap_or(d.fwd_bwd_attention),
            recog_unit,
        };
        if params.batch_size == 0 || params.beam_width == 0 {
            return Err(AsrError::invalid_config(
                "batch_size and beam_width must be >= 1",
            ));
        }
        Ok(params)
    }
}

/// Everything one evaluation run needs, built once by the caller.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub model_dir: PathBuf,
    pub model_bwd_dir: Option<PathBuf>,
    /// Negative or absent selects the latest checkpoint.
    pub epoch: Option<i64>,
    pub decode_dir: PathBuf,
    pub eval_sets: Vec<PathBuf>,
    pub rnnlm_dir: Option<PathBuf>,
    pub rnnlm_bwd_dir: Option<PathBuf>,
    pub device: String,
    pub decode: DecodeOverrides,
}

impl EvalConfig {
    pub const DECODE_LOG: &'static str = "decode.log";

    pub fn decode_log_path(&self) -> PathBuf {
        self.decode_dir.join(Self::DECODE_LOG)
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::new(),
            model_bwd_dir: None,
            epoch: None,
            decode_dir: PathBuf::new(),
            eval_sets: Vec::new(),
            rnnlm_dir: None,
            rnnlm_bwd_dir: None,
            device: "cpu".to_string(),
            decode: DecodeOverrides::default(),
        }
    }
}

/// Contents of a recognizer's `config.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub unit: String,
    #[serde(default)]
    pub unit_sub1: Option<String>,
    #[serde(default)]
    pub unit_sub2: Option<String>,
    #[serde(default)]
    pub input_dim: Option<usize>,
    #[serde(default)]
    pub vocab: Option<usize>,
    #[serde(default)]
    pub vocab_sub1: Option<usize>,

    #[serde(default)]
    pub enc_type: RnnType,
    #[serde(default = "default_true")]
    pub bidirectional: bool,
    #[serde(default = "default_units")]
    pub enc_n_units: usize,
    #[serde(default = "default_enc_layers")]
    pub enc_n_layers: usize,
    /// Encoder depth the sub-task decoder reads from; `None` means the top layer.
    #[serde(default)]
    pub enc_n_layers_sub1: Option<usize>,
    /// Per-layer frame subsampling factors (1 = keep every frame).
    #[serde(default)]
    pub subsample: Vec<usize>,

    #[serde(default)]
    pub attn_type: AttentionType,
    #[serde(default = "default_attn_dim")]
    pub attn_dim: usize,
    #[serde(default = "default_one")]
    pub attn_n_heads: usize,
    #[serde(default = "default_conv_channels")]
    pub attn_conv_n_channels: usize,
    #[serde(default = "default_conv_width")]
    pub attn_conv_width: usize,
    #[serde(default = "default_sharpening")]
    pub attn_sharpening: f64,

    #[serde(default)]
    pub dec_type: RnnType,
    #[serde(default = "default_units")]
    pub dec_n_units: usize,
    #[serde(default = "default_one")]
    pub dec_n_layers: usize,
    #[serde(default = "default_units")]
    pub emb_dim: usize,
    #[serde(default = "default_units")]
    pub bottleneck_dim: usize,
    #[serde(default)]
    pub dec_n_units_sub1: Option<usize>,
    #[serde(default)]
    pub emb_dim_sub1: Option<usize>,

    #[serde(default)]
    pub usage_dec_sub: Option<String>,
    #[serde(default)]
    pub gating: bool,
    #[serde(default)]
    pub backward_sub1: bool,

    #[serde(default)]
    pub ctc_weight: f64,
    #[serde(flatten)]
    pub decode: DecodeOverrides,
}

fn default_true() -> bool {
    true
}
fn default_one() -> usize {
    1
}
fn default_units() -> usize {
    320
}
fn default_enc_layers() -> usize {
    5
}
fn default_attn_dim() -> usize {
    128
}
fn default_conv_channels() -> usize {
    10
}
fn default_conv_width() -> usize {
    201
}
fn default_sharpening() -> f64 {
    1.0
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, AsrError> {
        let data = read_required("read model config.yml", path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, AsrError> {
        let cfg: Self =
            serde_yaml::from_str(data).map_err(|e| AsrError::yaml("parse model config.yml", e))?;
        // unit strings are validated eagerly so a bad config never reaches decoding
        cfg.main_unit()?;
        cfg.sub1_unit()?;
        cfg.sub2_unit()?;
        cfg.usage_dec_sub()?;
        Ok(cfg)
    }

    pub fn main_unit(&self) -> Result<Unit, AsrError> {
        self.unit.parse()
    }

    pub fn sub1_unit(&self) -> Result<Option<Unit>, AsrError> {
        self.unit_sub1.as_deref().map(str::parse).transpose()
    }

    pub fn sub2_unit(&self) -> Result<Option<Unit>, AsrError> {
        self.unit_sub2.as_deref().map(str::parse).transpose()
    }

    pub fn usage_dec_sub(&self) -> Result<Option<UsageDecSub>, AsrError> {
        self.usage_dec_sub
            .as_deref()
            .map(|name| UsageDecSub::parse(name, self.gating))
            .transpose()
    }

    /// Total time reduction applied by the encoder.
    pub fn subsample_factor(&self) -> usize {
        self.subsample.iter().copied().filter(|&f| f > 0).product()
    }
}

/// Contents of an RNNLM's `config.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RnnlmConfig {
    pub unit: String,
    #[serde(default)]
    pub rnn_type: RnnType,
    #[serde(default = "default_lm_dim")]
    pub emb_dim: usize,
    #[serde(default = "default_lm_dim")]
    pub n_units: usize,
    #[serde(default = "default_one")]
    pub n_layers: usize,
    #[serde(default)]
    pub tie_weights: bool,
    #[serde(default)]
    pub residual: bool,
    #[serde(default)]
    pub backward: bool,
    #[serde(default)]
    pub dropout_emb: f32,
    #[serde(default)]
    pub dropout_hidden: f32,
    #[serde(default)]
    pub dropout_out: f32,
    #[serde(default)]
    pub vocab: Option<usize>,
}

fn default_lm_dim() -> usize {
    512
}

impl RnnlmConfig {
    pub fn load(path: &Path) -> Result<Self, AsrError> {
        let data = read_required("read RNNLM config.yml", path)?;
        let cfg: Self =
            serde_yaml::from_str(&data).map_err(|e| AsrError::yaml("parse RNNLM config.yml", e))?;
        cfg.unit.parse::<Unit>()?;
        Ok(cfg)
    }
}
