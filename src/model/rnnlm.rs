use std::path::Path;

use candle_core::{Device, Module, Tensor, D};
use candle_nn::{Dropout, Embedding, Linear, VarBuilder};
use serde::Serialize;

use crate::config::{RnnlmConfig, Unit};
use crate::error::AsrError;
use crate::model::checkpoint::{load_var_builder, resolve_checkpoint};
use crate::model::rnn::{CellState, RecurrentCell};
use crate::token_converter::vocab::{count_vocab_size, EOS_ID, PAD_ID, SOS_ID};

/// Teacher-forced evaluation of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LmObservation {
    /// Mean cross-entropy over non-pad target positions.
    pub loss: f64,
    /// Percentage of non-pad positions where the argmax is the target.
    pub acc: f64,
    pub ppl: f64,
    /// Number of non-pad target positions.
    pub n_tokens: usize,
}

/// Per-layer recurrent state of the LM.
#[derive(Debug, Clone)]
pub struct LmState {
    layers: Vec<CellState>,
}

/// Sequence-level recurrent language model used for shallow fusion.
pub struct SeqRnnlm {
    config: RnnlmConfig,
    unit: Unit,
    vocab: usize,
    embed: Embedding,
    rnns: Vec<RecurrentCell>,
    output: Linear,
    dropout_emb: Dropout,
    dropout_hidden: Dropout,
    dropout_out: Dropout,
    device: Device,
}

impl SeqRnnlm {
    /// Builds the network. Parameters are named `embed.weight`, `rnn.<l>.*`,
    /// `output.weight` and `output.bias`.
    pub fn new(config: &RnnlmConfig, vocab: usize, vb: VarBuilder) -> Result<Self, AsrError> {
        if config.tie_weights && config.n_units != config.emb_dim {
            return Err(AsrError::invalid_config(format!(
                "tie_weights requires n_units == emb_dim (got {} and {})",
                config.n_units, config.emb_dim
            )));
        }
        if config.n_layers == 0 {
            return Err(AsrError::invalid_config("RNNLM needs at least one layer"));
        }
        let unit: Unit = config.unit.parse()?;
        let build = || -> candle_core::Result<(Embedding, Vec<RecurrentCell>, Linear)> {
            let embed = candle_nn::embedding(vocab, config.emb_dim, vb.pp("embed"))?;
            let mut rnns = Vec::with_capacity(config.n_layers);
            for l in 0..config.n_layers {
                let in_dim = if l == 0 { config.emb_dim } else { config.n_units };
                rnns.push(RecurrentCell::load(
                    config.rnn_type,
                    in_dim,
                    config.n_units,
                    vb.pp(format!("rnn.{l}")),
                )?);
            }
            let output = if config.tie_weights {
                let bias = vb.pp("output").get(vocab, "bias")?;
                Linear::new(embed.embeddings().clone(), Some(bias))
            } else {
                candle_nn::linear(config.n_units, vocab, vb.pp("output"))?
            };
            Ok((embed, rnns, output))
        };
        let (embed, rnns, output) = build().map_err(|e| AsrError::runtime("build RNNLM", e))?;
        Ok(Self {
            config: config.clone(),
            unit,
            vocab,
            embed,
            rnns,
            output,
            dropout_emb: Dropout::new(config.dropout_emb),
            dropout_hidden: Dropout::new(config.dropout_hidden),
            dropout_out: Dropout::new(config.dropout_out),
            device: vb.device().clone(),
        })
    }

    /// Loads `config.yml` and a checkpoint from `dir`. The vocabulary size is
    /// the configured `vocab`, else counted from the LM's own `dict.txt`.
    pub fn load(dir: &Path, epoch: Option<i64>, device: &Device) -> Result<Self, AsrError> {
        let config = RnnlmConfig::load(&dir.join("config.yml"))?;
        let vocab = match config.vocab {
            Some(vocab) => vocab,
            None => count_vocab_size(&dir.join("dict.txt"))?,
        };
        let (path, epoch) = resolve_checkpoint(dir, epoch)?;
        let vb = load_var_builder(&path, device)?;
        let lm = Self::new(&config, vocab, vb)?;
        tracing::info!(
            path = %dir.display(),
            epoch,
            unit = %lm.unit,
            backward = config.backward,
            "loaded RNNLM"
        );
        Ok(lm)
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    pub fn is_backward(&self) -> bool {
        self.config.backward
    }

    pub fn config(&self) -> &RnnlmConfig {
        &self.config
    }

    /// Embeds one token per batch row: returns `[batch, emb_dim]`.
    pub fn embed(&self, ids: &[usize]) -> Result<Tensor, AsrError> {
        let ids: Vec<u32> = ids.iter().map(|&i| i as u32).collect();
        Tensor::new(ids.as_slice(), &self.device)
            .and_then(|t| self.embed.forward(&t))
            .map_err(|e| AsrError::runtime("RNNLM embedding", e))
    }

    pub fn zero_state(&self, batch: usize) -> Result<LmState, AsrError> {
        let layers = self
            .rnns
            .iter()
            .map(|rnn| rnn.zero_state(batch))
            .collect::<candle_core::Result<Vec<_>>>()
            .map_err(|e| AsrError::runtime("RNNLM zero state", e))?;
        Ok(LmState { layers })
    }

    /// One autoregressive step from an embedded input `[batch, emb_dim]`.
    ///
    /// Returns `(logits [batch, vocab], top output [batch, n_units], state)`.
    pub fn predict(
        &self,
        emb: &Tensor,
        state: Option<&LmState>,
    ) -> Result<(Tensor, Tensor, LmState), AsrError> {
        let state = match state {
            Some(s) => s.clone(),
            None => self.zero_state(emb.dim(0).map_err(|e| AsrError::runtime("RNNLM input", e))?)?,
        };
        let run = || -> candle_core::Result<(Tensor, Tensor, LmState)> {
            let mut y = emb.clone();
            let mut layers = Vec::with_capacity(self.rnns.len());
            for (l, (rnn, prev)) in self.rnns.iter().zip(&state.layers).enumerate() {
                let next = rnn.step(&y, prev)?;
                let out = next.h().clone();
                y = if self.config.residual && l > 0 {
                    (out + &y)?
                } else {
                    out
                };
                layers.push(next);
            }
            let logits = self.output.forward(&y)?;
            Ok((logits, y, LmState { layers }))
        };
        run().map_err(|e| AsrError::runtime("RNNLM predict", e))
    }

    /// Log-probabilities of the next token after `prev`, for a single hypothesis.
    pub fn step_log_probs(
        &self,
        prev: usize,
        state: Option<&LmState>,
    ) -> Result<(Vec<f32>, LmState), AsrError> {
        let emb = self.embed(&[prev])?;
        let (logits, _, state) = self.predict(&emb, state)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| AsrError::runtime("RNNLM log_softmax", e))?;
        Ok((log_probs, state))
    }

    /// Teacher-forced loss, accuracy and perplexity over `ys`.
    ///
    /// Each sequence is reversed first for a backward LM, then scored as
    /// `<sos> y` -> `y <eos>`; padded positions are excluded everywhere.
    pub fn forward(&self, ys: &[Vec<usize>], train: bool) -> Result<LmObservation, AsrError> {
        if ys.is_empty() {
            return Err(AsrError::invalid_input("RNNLM forward needs at least one sequence"));
        }
        let (inputs, targets) = wrap_and_pad(ys, self.config.backward);
        let batch = inputs.len();
        let steps = inputs[0].len();
        let mask: Vec<f32> = targets
            .iter()
            .flatten()
            .map(|&t| if t == PAD_ID { 0.0 } else { 1.0 })
            .collect();
        let n_tokens = mask.iter().filter(|&&m| m > 0.0).count();

        let run = || -> candle_core::Result<(f64, Vec<Vec<u32>>)> {
            let flat_in: Vec<u32> = inputs.iter().flatten().map(|&i| i as u32).collect();
            let flat_out: Vec<u32> = targets.iter().flatten().map(|&i| i as u32).collect();
            let xs = Tensor::from_vec(flat_in, (batch, steps), &self.device)?;
            let ys_out = Tensor::from_vec(flat_out, (batch, steps), &self.device)?;

            let mut h = self.dropout_emb.forward(&self.embed.forward(&xs)?, train)?;
            let mut lower: Option<Tensor> = None;
            for (l, rnn) in self.rnns.iter().enumerate() {
                let mut out = self.dropout_hidden.forward(&rnn.seq(&h)?, train)?;
                if self.config.residual && l > 0 {
                    if let Some(lower) = &lower {
                        out = (out + lower)?;
                    }
                }
                lower = Some(out.clone());
                h = out;
            }
            let logits = self
                .output
                .forward(&self.dropout_out.forward(&h, train)?)?;
            let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
            let picked = log_probs.gather(&ys_out.unsqueeze(2)?, 2)?.squeeze(2)?;
            let mask = Tensor::from_vec(mask.clone(), (batch, steps), &self.device)?;
            let total = (picked * mask)?.sum_all()?.to_scalar::<f32>()?;
            let predictions = logits.argmax(D::Minus1)?.to_vec2::<u32>()?;
            Ok((-(total as f64), predictions))
        };
        let (neg_log_likelihood, predictions) =
            run().map_err(|e| AsrError::runtime("RNNLM forward", e))?;

        if n_tokens == 0 {
            return Err(AsrError::invalid_input("RNNLM forward batch has no target tokens"));
        }
        let correct = predictions
            .iter()
            .flatten()
            .zip(targets.iter().flatten())
            .filter(|&(&p, &t)| t != PAD_ID && p as usize == t)
            .count();
        let loss = neg_log_likelihood / n_tokens as f64;
        Ok(LmObservation {
            loss,
            acc: correct as f64 * 100.0 / n_tokens as f64,
            ppl: loss.exp(),
            n_tokens,
        })
    }

    /// Log-probability of `ids` followed by `<eos>`, read in this LM's direction.
    pub fn score(&self, ids: &[usize]) -> Result<f64, AsrError> {
        let obs = self.forward(&[ids.to_vec()], false)?;
        Ok(-obs.loss * obs.n_tokens as f64)
    }
}

/// Builds right-padded `<sos> y` inputs and `y <eos>` targets.
fn wrap_and_pad(ys: &[Vec<usize>], backward: bool) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
    let steps = ys.iter().map(Vec::len).max().unwrap_or(0) + 1;
    let mut inputs = Vec::with_capacity(ys.len());
    let mut targets = Vec::with_capacity(ys.len());
    for y in ys {
        let y: Vec<usize> = if backward {
            y.iter().rev().copied().collect()
        } else {
            y.clone()
        };
        let mut input = Vec::with_capacity(steps);
        input.push(SOS_ID);
        input.extend_from_slice(&y);
        input.resize(steps, PAD_ID);
        let mut target = y;
        target.push(EOS_ID);
        target.resize(steps, PAD_ID);
        inputs.push(input);
        targets.push(target);
    }
    (inputs, targets)
}

#[cfg(test)]
mod tests {
    use candle_core::DType;
    use candle_nn::VarMap;

    use super::*;
    use crate::config::RnnType;
    use crate::model::checkpoint::checkpoint_path;

    fn config(tie: bool, residual: bool, backward: bool) -> RnnlmConfig {
        RnnlmConfig {
            unit: "word".to_string(),
            rnn_type: RnnType::Lstm,
            emb_dim: 8,
            n_units: 8,
            n_layers: 2,
            tie_weights: tie,
            residual,
            backward,
            dropout_emb: 0.0,
            dropout_hidden: 0.0,
            dropout_out: 0.0,
            vocab: None,
        }
    }

    fn build(cfg: &RnnlmConfig, varmap: &VarMap) -> SeqRnnlm {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        SeqRnnlm::new(cfg, 10, vb).unwrap()
    }

    #[test]
    fn tie_weights_with_mismatched_widths_fails_before_building() {
        let mut cfg = config(true, false, false);
        cfg.n_units = 16;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let err = SeqRnnlm::new(&cfg, 10, vb).err().unwrap();
        assert!(matches!(err, AsrError::InvalidConfig { .. }));
        assert!(varmap.all_vars().is_empty());
    }

    #[test]
    fn perplexity_is_exp_of_loss_for_length_one_sequences() {
        let varmap = VarMap::new();
        let lm = build(&config(true, true, false), &varmap);
        let obs = lm.forward(&[vec![4], vec![7], vec![9]], false).unwrap();
        assert_eq!(obs.ppl, obs.loss.exp());
        assert_eq!(obs.n_tokens, 6);
        assert!(obs.loss > 0.0);
    }

    #[test]
    fn padded_positions_are_excluded_from_the_denominator() {
        let varmap = VarMap::new();
        let lm = build(&config(false, false, false), &varmap);
        let obs = lm.forward(&[vec![4, 5, 6], vec![4]], false).unwrap();
        // targets: [4 5 6 eos] and [4 eos pad pad]
        assert_eq!(obs.n_tokens, 6);
        assert!((0.0..=100.0).contains(&obs.acc));
    }

    #[test]
    fn backward_mode_reverses_before_wrapping() {
        let (inputs, targets) = wrap_and_pad(&[vec![4, 5, 6]], true);
        assert_eq!(inputs[0], vec![SOS_ID, 6, 5, 4]);
        assert_eq!(targets[0], vec![6, 5, 4, EOS_ID]);
    }

    #[test]
    fn predict_without_state_matches_zero_state() {
        let varmap = VarMap::new();
        let lm = build(&config(false, true, false), &varmap);
        let emb = lm.embed(&[4, 5]).unwrap();
        let (a, out, state) = lm.predict(&emb, None).unwrap();
        let zero = lm.zero_state(2).unwrap();
        let (b, _, _) = lm.predict(&emb, Some(&zero)).unwrap();
        assert_eq!(a.dims(), &[2, 10]);
        assert_eq!(out.dims(), &[2, 8]);
        assert_eq!(state.layers.len(), 2);
        let diff = (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn sequence_score_matches_stepwise_sum() {
        let varmap = VarMap::new();
        let lm = build(&config(false, true, false), &varmap);
        let mut expected = 0.0f64;
        let mut state = None;
        let mut prev = SOS_ID;
        for target in [4, 7, EOS_ID] {
            let (lp, next) = lm.step_log_probs(prev, state.as_ref()).unwrap();
            expected += lp[target] as f64;
            state = Some(next);
            prev = target;
        }
        let score = lm.score(&[4, 7]).unwrap();
        assert!((score - expected).abs() < 1e-3);
    }

    #[test]
    fn load_counts_its_own_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        SeqRnnlm::new(&config(false, false, true), 7, vb).unwrap();
        varmap.save(checkpoint_path(dir.path(), 2)).unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            "unit: word\nemb_dim: 8\nn_units: 8\nn_layers: 2\nbackward: true\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("dict.txt"),
            "<unk> 1\n<eos> 2\n<pad> 3\na 4\nb 5\nc 6\n",
        )
        .unwrap();

        let lm = SeqRnnlm::load(dir.path(), None, &Device::Cpu).unwrap();
        assert_eq!(lm.vocab(), 7);
        assert!(lm.is_backward());
    }

    #[test]
    fn load_without_dictionary_or_vocab_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yml"), "unit: word\n").unwrap();
        let err = SeqRnnlm::load(dir.path(), None, &Device::Cpu).err().unwrap();
        assert!(matches!(err, AsrError::MissingResource { .. }));
    }

    #[test]
    fn step_log_probs_is_normalized() {
        let varmap = VarMap::new();
        let lm = build(&config(false, false, false), &varmap);
        let (lp, state) = lm.step_log_probs(SOS_ID, None).unwrap();
        let (lp2, _) = lm.step_log_probs(4, Some(&state)).unwrap();
        for dist in [lp, lp2] {
            let total: f32 = dist.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
    }
}
