use candle_core::{DType, Module, Tensor, D};
use candle_nn::{Embedding, Linear, VarBuilder};

use crate::config::RnnType;
use crate::model::attention::{AdditiveAttention, AttentionKeys, AttentionSpec};
use crate::model::nested::{NestedAttention, PreparedSubMemory};
use crate::model::rnn::{CellState, RecurrentCell};
use crate::token_converter::vocab::{EOS_ID, SOS_ID};

/// Sizes of one attention decoder.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DecoderSpec {
    pub vocab: usize,
    pub emb_dim: usize,
    pub n_units: usize,
    pub n_layers: usize,
    pub rnn_type: RnnType,
    pub bottleneck_dim: usize,
}

/// Recurrent state carried between decoder steps of one hypothesis.
#[derive(Debug, Clone)]
pub(crate) struct DecoderState {
    rnn: Vec<CellState>,
    context: Tensor,
    weights: Vec<Tensor>,
    sub_context: Option<Tensor>,
}

pub(crate) struct DecoderStep {
    /// `[1, vocab]`
    pub logits: Tensor,
    /// Top recurrent output `[1, n_units]`.
    pub hidden: Tensor,
    /// Head-averaged attention over encoder frames.
    pub attention: Vec<f32>,
    pub state: DecoderState,
}

/// Teacher-forced pass over one target sequence.
pub(crate) struct ForcedPass {
    /// Sum of log-probabilities of the targets and the final `<eos>`.
    pub log_likelihood: f64,
    /// Decoder outputs `[1, L + 1, n_units]`.
    pub hidden: Tensor,
    /// Output distributions `[1, L + 1, vocab]`.
    pub probs: Tensor,
}

/// Attention-based RNN decoder. Each step reads the previous token and
/// contexts, updates the RNN, attends over the encoder and (for the nested
/// word decoder) over the sub-task decoder outputs, then projects
/// `[s; ctx; sub_ctx]` through a tanh bottleneck to the vocabulary.
pub(crate) struct AttentionDecoder {
    embed: Embedding,
    rnns: Vec<RecurrentCell>,
    attention: AdditiveAttention,
    nested: Option<NestedAttention>,
    bottleneck: Linear,
    output: Linear,
    enc_dim: usize,
}

impl AttentionDecoder {
    pub(crate) fn load(
        spec: DecoderSpec,
        attention: AttentionSpec,
        nested: Option<NestedAttention>,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let enc_dim = attention.memory_dim;
        let sub_dim = nested.as_ref().map_or(0, NestedAttention::output_dim);
        let embed = candle_nn::embedding(spec.vocab, spec.emb_dim, vb.pp("embed"))?;
        let mut rnns = Vec::with_capacity(spec.n_layers);
        for l in 0..spec.n_layers.max(1) {
            let in_dim = if l == 0 {
                spec.emb_dim + enc_dim + sub_dim
            } else {
                spec.n_units
            };
            rnns.push(RecurrentCell::load(
                spec.rnn_type,
                in_dim,
                spec.n_units,
                vb.pp(format!("rnn.{l}")),
            )?);
        }
        let attention = AdditiveAttention::load(attention, vb.pp("attn"))?;
        let bottleneck = candle_nn::linear(
            spec.n_units + enc_dim + sub_dim,
            spec.bottleneck_dim,
            vb.pp("bottleneck"),
        )?;
        let output = candle_nn::linear(spec.bottleneck_dim, spec.vocab, vb.pp("output"))?;
        Ok(Self {
            embed,
            rnns,
            attention,
            nested,
            bottleneck,
            output,
            enc_dim,
        })
    }

    pub(crate) fn nested(&self) -> Option<&NestedAttention> {
        self.nested.as_ref()
    }

    pub(crate) fn keys(&self, memory: &Tensor) -> candle_core::Result<AttentionKeys> {
        self.attention.keys(memory)
    }

    pub(crate) fn init_state(&self, keys: &AttentionKeys) -> candle_core::Result<DecoderState> {
        let device = keys.device().clone();
        let rnn = self
            .rnns
            .iter()
            .map(|r| r.zero_state(1))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let context = Tensor::zeros((1, self.enc_dim), DType::F32, &device)?;
        let sub_context = match &self.nested {
            Some(n) => Some(Tensor::zeros((1, n.output_dim()), DType::F32, &device)?),
            None => None,
        };
        Ok(DecoderState {
            rnn,
            context,
            weights: self.attention.initial_weights(keys, 1)?,
            sub_context,
        })
    }

    pub(crate) fn step(
        &self,
        keys: &AttentionKeys,
        sub: Option<&PreparedSubMemory>,
        prev: usize,
        state: &DecoderState,
    ) -> candle_core::Result<DecoderStep> {
        let device = state.context.device();
        let prev = Tensor::new(&[prev as u32], device)?;
        let emb = self.embed.forward(&prev)?;
        let mut input = vec![emb, state.context.clone()];
        if let Some(sub_ctx) = &state.sub_context {
            input.push(sub_ctx.clone());
        }
        let mut y = Tensor::cat(&input, D::Minus1)?;
        let mut rnn = Vec::with_capacity(self.rnns.len());
        for (cell, prev_state) in self.rnns.iter().zip(&state.rnn) {
            let next = cell.step(&y, prev_state)?;
            y = next.h().clone();
            rnn.push(next);
        }
        let attn = self.attention.forward(keys, &y, &state.weights)?;
        let sub_context = match (&self.nested, sub) {
            (Some(nested), Some(memory)) => Some(nested.context(memory, &y)?),
            (Some(_), None) => state.sub_context.clone(),
            _ => None,
        };
        let mut features = vec![y.clone(), attn.context.clone()];
        if let Some(sub_ctx) = &sub_context {
            features.push(sub_ctx.clone());
        }
        let logits = self
            .output
            .forward(&self.bottleneck.forward(&Tensor::cat(&features, D::Minus1)?)?.tanh()?)?;
        let attention = attn.mean_weights()?;
        Ok(DecoderStep {
            logits,
            hidden: y,
            attention,
            state: DecoderState {
                rnn,
                context: attn.context,
                weights: attn.weights,
                sub_context,
            },
        })
    }

    /// Runs the decoder over `<sos> ids` and scores `ids <eos>`.
    pub(crate) fn force(
        &self,
        keys: &AttentionKeys,
        sub: Option<&PreparedSubMemory>,
        ids: &[usize],
    ) -> candle_core::Result<ForcedPass> {
        let mut state = self.init_state(keys)?;
        let mut prev = SOS_ID;
        let mut log_likelihood = 0.0;
        let mut hidden = Vec::with_capacity(ids.len() + 1);
        let mut probs = Vec::with_capacity(ids.len() + 1);
        for &target in ids.iter().chain(std::iter::once(&EOS_ID)) {
            let out = self.step(keys, sub, prev, &state)?;
            let log_probs = candle_nn::ops::log_softmax(&out.logits, D::Minus1)?;
            log_likelihood += log_probs.get(0)?.get(target)?.to_scalar::<f32>()? as f64;
            probs.push(log_probs.exp()?);
            hidden.push(out.hidden);
            state = out.state;
            prev = target;
        }
        Ok(ForcedPass {
            log_likelihood,
            hidden: Tensor::stack(&hidden, 1)?,
            probs: Tensor::stack(&probs, 1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;
    use candle_nn::VarMap;

    use super::*;
    use crate::config::UsageDecSub;
    use crate::model::nested::SubMemory;

    fn spec(vocab: usize) -> DecoderSpec {
        DecoderSpec {
            vocab,
            emb_dim: 4,
            n_units: 5,
            n_layers: 2,
            rnn_type: RnnType::Lstm,
            bottleneck_dim: 6,
        }
    }

    fn attn_spec(location: Option<(usize, usize)>) -> AttentionSpec {
        AttentionSpec {
            memory_dim: 8,
            query_dim: 5,
            attn_dim: 3,
            n_heads: 1,
            location,
            sharpening: 1.0,
        }
    }

    #[test]
    fn forced_pass_covers_targets_and_eos() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let dec = AttentionDecoder::load(spec(9), attn_spec(Some((2, 3))), None, vb).unwrap();
        let memory = Tensor::randn(0f32, 1.0, (1, 6, 8), &Device::Cpu).unwrap();
        let keys = dec.keys(&memory).unwrap();
        let pass = dec.force(&keys, None, &[4, 5, 6]).unwrap();
        assert_eq!(pass.hidden.dims(), &[1, 4, 5]);
        assert_eq!(pass.probs.dims(), &[1, 4, 9]);
        assert!(pass.log_likelihood < 0.0);
    }

    #[test]
    fn nested_decoder_reads_the_sub_memory() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let nested =
            NestedAttention::load(UsageDecSub::All, 5, 5, 7, 3, vb.pp("nested")).unwrap();
        let dec = AttentionDecoder::load(spec(9), attn_spec(None), Some(nested), vb.pp("dec"))
            .unwrap();
        let memory = Tensor::randn(0f32, 1.0, (1, 6, 8), &Device::Cpu).unwrap();
        let keys = dec.keys(&memory).unwrap();
        let sub = SubMemory {
            hidden: Tensor::randn(0f32, 1.0, (1, 3, 5), &Device::Cpu).unwrap(),
            probs: Tensor::randn(0f32, 1.0, (1, 3, 7), &Device::Cpu).unwrap(),
        };
        let prepared = dec.nested().unwrap().prepare(&sub).unwrap();
        let state = dec.init_state(&keys).unwrap();
        let out = dec.step(&keys, Some(&prepared), SOS_ID, &state).unwrap();
        assert_eq!(out.logits.dims(), &[1, 9]);
        assert_eq!(out.attention.len(), 6);
        let total: f32 = out.attention.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
}
