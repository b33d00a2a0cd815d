use std::path::Path;

use candle_core::{Device, Tensor, D};
use candle_nn::VarBuilder;

use crate::config::{AttentionType, DecodeOverrides, DecodeParams, ModelConfig, Unit};
use crate::error::AsrError;
use crate::model::attention::{AttentionKeys, AttentionSpec};
use crate::model::beam::{beam_search, BeamConfig, StepDecoder, StepOutput};
use crate::model::checkpoint::{load_var_builder, resolve_checkpoint};
use crate::model::decoder::{AttentionDecoder, DecoderSpec, DecoderState};
use crate::model::encoder::RnnEncoder;
use crate::model::nested::{NestedAttention, PreparedSubMemory, SubMemory};
use crate::model::rnnlm::{LmState, SeqRnnlm};
use crate::pipeline::traits::Recognizer;
use crate::token_converter::vocab::count_vocab_size;
use crate::types::{FeatureMatrix, Hypothesis, Recognition};

/// Decoder plus per-utterance memory, driven by beam search.
struct DecodeSession<'a> {
    decoder: &'a AttentionDecoder,
    keys: &'a AttentionKeys,
    sub: Option<&'a PreparedSubMemory>,
    lm: Option<&'a SeqRnnlm>,
}

#[derive(Clone)]
struct SessionState {
    decoder: DecoderState,
    lm: Option<LmState>,
}

impl StepDecoder for DecodeSession<'_> {
    type State = SessionState;

    fn initial_state(&self) -> Result<SessionState, AsrError> {
        let decoder = self
            .decoder
            .init_state(self.keys)
            .map_err(|e| AsrError::runtime("decoder init", e))?;
        Ok(SessionState { decoder, lm: None })
    }

    fn step(&self, prev: usize, state: &SessionState) -> Result<StepOutput<SessionState>, AsrError> {
        let out = self
            .decoder
            .step(self.keys, self.sub, prev, &state.decoder)
            .map_err(|e| AsrError::runtime("decoder step", e))?;
        let log_probs = candle_nn::ops::log_softmax(&out.logits, D::Minus1)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| AsrError::runtime("decoder log_softmax", e))?;
        let (lm_log_probs, lm) = match self.lm {
            Some(lm) => {
                let (lp, next) = lm.step_log_probs(prev, state.lm.as_ref())?;
                (Some(lp), Some(next))
            }
            None => (None, None),
        };
        Ok(StepOutput {
            log_probs,
            lm_log_probs,
            attention: out.attention,
            state: SessionState {
                decoder: out.state,
                lm,
            },
        })
    }
}

/// Attention encoder-decoder with an optional character-level sub-task
/// decoder whose outputs the word-level decoder can attend to.
pub struct NestedAttentionSeq2seq {
    config: ModelConfig,
    unit: Unit,
    unit_sub1: Option<Unit>,
    input_dim: usize,
    vocab: usize,
    encoder: RnnEncoder,
    decoder: AttentionDecoder,
    decoder_sub1: Option<AttentionDecoder>,
    rnnlm_fwd: Option<SeqRnnlm>,
    rnnlm_bwd: Option<SeqRnnlm>,
    device: Device,
}

fn attention_spec(cfg: &ModelConfig, memory_dim: usize, query_dim: usize) -> AttentionSpec {
    AttentionSpec {
        memory_dim,
        query_dim,
        attn_dim: cfg.attn_dim,
        n_heads: cfg.attn_n_heads,
        location: match cfg.attn_type {
            AttentionType::Location => Some((cfg.attn_conv_n_channels, cfg.attn_conv_width)),
            AttentionType::Content => None,
        },
        sharpening: cfg.attn_sharpening,
    }
}

fn scale_peaks(hyp: &mut Hypothesis, factor: usize) {
    for p in &mut hyp.attention_peaks {
        *p *= factor;
    }
}

impl NestedAttentionSeq2seq {
    /// Builds the network from `config`. Parameters live under `enc`, `dec`,
    /// `dec_sub1` and `nested`.
    pub fn new(
        config: ModelConfig,
        input_dim: usize,
        vocab: usize,
        vocab_sub1: Option<usize>,
        vb: VarBuilder,
    ) -> Result<Self, AsrError> {
        let unit = config.main_unit()?;
        let unit_sub1 = config.sub1_unit()?;
        let usage = config.usage_dec_sub()?;
        let vocab_sub1 = match unit_sub1 {
            Some(u) => Some(vocab_sub1.or(config.vocab_sub1).ok_or_else(|| {
                AsrError::invalid_config(format!("sub-task unit '{u}' has no vocabulary size"))
            })?),
            None => None,
        };
        if usage.is_some() && vocab_sub1.is_none() {
            return Err(AsrError::invalid_config(
                "usage_dec_sub requires a sub-task decoder (unit_sub1)",
            ));
        }
        let device = vb.device().clone();
        let build = || -> candle_core::Result<_> {
            let encoder = RnnEncoder::load(&config, input_dim, vocab_sub1.is_some(), vb.pp("enc"))?;
            let enc_dim = encoder.output_dim();
            let sub_units = config.dec_n_units_sub1.unwrap_or(config.dec_n_units);
            let decoder_sub1 = match vocab_sub1 {
                Some(vocab_sub1) => Some(AttentionDecoder::load(
                    DecoderSpec {
                        vocab: vocab_sub1,
                        emb_dim: config.emb_dim_sub1.unwrap_or(config.emb_dim),
                        n_units: sub_units,
                        n_layers: config.dec_n_layers,
                        rnn_type: config.dec_type,
                        bottleneck_dim: config.bottleneck_dim,
                    },
                    attention_spec(&config, enc_dim, sub_units),
                    None,
                    vb.pp("dec_sub1"),
                )?),
                None => None,
            };
            let nested = match (usage, vocab_sub1) {
                (Some(usage), Some(vocab_sub1)) => Some(NestedAttention::load(
                    usage,
                    config.dec_n_units,
                    sub_units,
                    vocab_sub1,
                    config.attn_dim,
                    vb.pp("nested"),
                )?),
                _ => None,
            };
            let decoder = AttentionDecoder::load(
                DecoderSpec {
                    vocab,
                    emb_dim: config.emb_dim,
                    n_units: config.dec_n_units,
                    n_layers: config.dec_n_layers,
                    rnn_type: config.dec_type,
                    bottleneck_dim: config.bottleneck_dim,
                },
                attention_spec(&config, enc_dim, config.dec_n_units),
                nested,
                vb.pp("dec"),
            )?;
            Ok((encoder, decoder, decoder_sub1))
        };
        let (encoder, decoder, decoder_sub1) =
            build().map_err(|e| AsrError::runtime("build seq2seq", e))?;
        Ok(Self {
            config,
            unit,
            unit_sub1,
            input_dim,
            vocab,
            encoder,
            decoder,
            decoder_sub1,
            rnnlm_fwd: None,
            rnnlm_bwd: None,
            device,
        })
    }

    /// Loads `config.yml`, the dictionaries and the checkpoint for `epoch`
    /// (latest when `None` or negative) from `dir`.
    ///
    /// `input_dim` is used when the config does not record the feature width.
    pub fn load(
        dir: &Path,
        epoch: Option<i64>,
        input_dim: Option<usize>,
        device: &Device,
    ) -> Result<Self, AsrError> {
        let config = ModelConfig::load(&dir.join("config.yml"))?;
        let input_dim = config.input_dim.or(input_dim).ok_or_else(|| {
            AsrError::invalid_config("input_dim is neither in config.yml nor known from the data")
        })?;
        let vocab = match config.vocab {
            Some(v) => v,
            None => count_vocab_size(&dir.join("dict.txt"))?,
        };
        let vocab_sub1 = match (&config.unit_sub1, config.vocab_sub1) {
            (Some(_), None) => Some(count_vocab_size(&dir.join("dict_sub1.txt"))?),
            (_, v) => v,
        };
        let (path, epoch) = resolve_checkpoint(dir, epoch)?;
        let vb = load_var_builder(&path, device)?;
        let model = Self::new(config, input_dim, vocab, vocab_sub1, vb)?;
        tracing::info!(
            path = %dir.display(),
            epoch,
            unit = %model.unit,
            sub1 = ?model.unit_sub1.map(Unit::as_str),
            nested = model.decoder.nested().is_some(),
            "loaded seq2seq model"
        );
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    /// Attaches an RNNLM for shallow fusion. A backward LM (its config says
    /// `backward: true`) rescores finished N-best lists instead.
    pub fn attach_rnnlm(&mut self, lm: SeqRnnlm) -> Result<(), AsrError> {
        if lm.unit() != self.unit {
            return Err(AsrError::config_mismatch(format!(
                "RNNLM unit '{}' does not match model unit '{}'",
                lm.unit(),
                self.unit
            )));
        }
        if lm.vocab() != self.vocab {
            return Err(AsrError::config_mismatch(format!(
                "RNNLM vocabulary size {} does not match model vocabulary size {}",
                lm.vocab(),
                self.vocab
            )));
        }
        if lm.is_backward() {
            self.rnnlm_bwd = Some(lm);
        } else {
            self.rnnlm_fwd = Some(lm);
        }
        Ok(())
    }

    pub fn has_rnnlm_fwd(&self) -> bool {
        self.rnnlm_fwd.is_some()
    }

    pub fn has_rnnlm_bwd(&self) -> bool {
        self.rnnlm_bwd.is_some()
    }

    fn features(&self, xs: &FeatureMatrix) -> Result<Tensor, AsrError> {
        if xs.dim != self.input_dim {
            return Err(AsrError::invalid_input(format!(
                "feature dimension {} does not match model input_dim {}",
                xs.dim, self.input_dim
            )));
        }
        Tensor::from_slice(&xs.data, (1, xs.frames, xs.dim), &self.device)
            .map_err(|e| AsrError::runtime("feature tensor", e))
    }

    /// Decodes the sub-task and turns its best hypothesis into the memory the
    /// nested decoder attends to. The returned hypothesis is in reading order.
    fn decode_sub1(
        &self,
        memory: &Tensor,
        factor: usize,
        params: &DecodeParams,
    ) -> Result<Option<(Hypothesis, Option<PreparedSubMemory>)>, AsrError> {
        let Some(decoder) = &self.decoder_sub1 else {
            return Ok(None);
        };
        let keys = decoder
            .keys(memory)
            .map_err(|e| AsrError::runtime("sub-task attention keys", e))?;
        let frames = keys
            .frames()
            .map_err(|e| AsrError::runtime("sub-task attention keys", e))?;
        let session = DecodeSession {
            decoder,
            keys: &keys,
            sub: None,
            lm: None,
        };
        let mut cfg = BeamConfig::from_params(params, frames);
        cfg.lm_weight = 0.0;
        let mut best = beam_search(&session, &cfg)?
            .into_iter()
            .next()
            .unwrap_or_default();

        let prepared = match self.decoder.nested() {
            Some(nested) => {
                let pass = decoder
                    .force(&keys, None, &best.ids)
                    .map_err(|e| AsrError::runtime("sub-task forced pass", e))?;
                let memory = SubMemory {
                    hidden: pass.hidden,
                    probs: pass.probs,
                };
                Some(
                    nested
                        .prepare(&memory)
                        .map_err(|e| AsrError::runtime("nested memory", e))?,
                )
            }
            None => None,
        };

        scale_peaks(&mut best, factor);
        if self.config.backward_sub1 {
            best.ids.reverse();
            best.attention_peaks.reverse();
        }
        Ok(Some((best, prepared)))
    }

    fn rescore_with_backward_lm(&self, nbest: &mut [Hypothesis], weight: f64) -> Result<(), AsrError> {
        let Some(lm) = &self.rnnlm_bwd else {
            return Ok(());
        };
        for hyp in nbest.iter_mut() {
            let lm_score = lm.score(&hyp.ids)?;
            hyp.score += weight * lm_score;
        }
        nbest.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }
}

impl Recognizer for NestedAttentionSeq2seq {
    fn unit(&self) -> Unit {
        self.unit
    }

    fn sub1_unit(&self) -> Option<Unit> {
        self.unit_sub1
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.input_dim)
    }

    fn stored_decode(&self) -> DecodeOverrides {
        self.config.decode.clone()
    }

    fn decode(&self, xs: &FeatureMatrix, params: &DecodeParams) -> Result<Recognition, AsrError> {
        if xs.frames == 0 {
            return Ok(Recognition {
                nbest: vec![Hypothesis::default()],
                sub1: None,
            });
        }
        let enc = self
            .encoder
            .forward(&self.features(xs)?)
            .map_err(|e| AsrError::runtime("encoder forward", e))?;

        let (sub1, prepared) = match &enc.sub1 {
            Some(memory) => match self.decode_sub1(memory, enc.sub1_factor, params)? {
                Some((hyp, prepared)) => (Some(hyp), prepared),
                None => (None, None),
            },
            None => (None, None),
        };

        let keys = self
            .decoder
            .keys(&enc.main)
            .map_err(|e| AsrError::runtime("attention keys", e))?;
        let frames = keys
            .frames()
            .map_err(|e| AsrError::runtime("attention keys", e))?;
        let lm = if params.rnnlm_weight > 0.0 {
            self.rnnlm_fwd.as_ref()
        } else {
            None
        };
        let session = DecodeSession {
            decoder: &self.decoder,
            keys: &keys,
            sub: prepared.as_ref(),
            lm,
        };
        let mut nbest = beam_search(&session, &BeamConfig::from_params(params, frames))?;
        for hyp in &mut nbest {
            scale_peaks(hyp, enc.main_factor);
        }
        if params.rnnlm_weight > 0.0 {
            self.rescore_with_backward_lm(&mut nbest, params.rnnlm_weight)?;
        }
        tracing::debug!(
            frames = xs.frames,
            enc_frames = frames,
            n_hyps = nbest.len(),
            best_len = nbest.first().map_or(0, |h| h.ids.len()),
            "decoded utterance"
        );
        Ok(Recognition { nbest, sub1 })
    }

    fn score_sequence(&self, xs: &FeatureMatrix, ids: &[usize]) -> Result<f64, AsrError> {
        if xs.frames == 0 {
            return Err(AsrError::invalid_input("cannot score an utterance with no frames"));
        }
        let enc = self
            .encoder
            .forward(&self.features(xs)?)
            .map_err(|e| AsrError::runtime("encoder forward", e))?;
        let greedy = DecodeParams::default();
        let prepared = match &enc.sub1 {
            Some(memory) => self
                .decode_sub1(memory, enc.sub1_factor, &greedy)?
                .and_then(|(_, prepared)| prepared),
            None => None,
        };
        let keys = self
            .decoder
            .keys(&enc.main)
            .map_err(|e| AsrError::runtime("attention keys", e))?;
        let pass = self
            .decoder
            .force(&keys, prepared.as_ref(), ids)
            .map_err(|e| AsrError::runtime("forced pass", e))?;
        Ok(pass.log_likelihood)
    }
}
