use candle_core::{Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};

use crate::config::UsageDecSub;
use crate::model::attention::{AdditiveAttention, AttentionKeys, AttentionSpec};
use crate::model::rnn::cat_features;

/// What the sub-task decoder produced for its best hypothesis, one row per
/// output step (including the final `<eos>` step).
pub(crate) struct SubMemory {
    /// Decoder outputs `[1, L, sub_hidden]`.
    pub hidden: Tensor,
    /// Output distributions `[1, L, sub_vocab]`.
    pub probs: Tensor,
}

struct GatedMix {
    attn_probs: AdditiveAttention,
    proj: Linear,
    gate: Linear,
}

/// Attention of the word-level decoder over the sub-task decoder's outputs.
pub(crate) struct NestedAttention {
    usage: UsageDecSub,
    attn: AdditiveAttention,
    gated: Option<GatedMix>,
    output_dim: usize,
}

/// Key projections of one [`SubMemory`], computed once per utterance.
pub(crate) struct PreparedSubMemory {
    keys: AttentionKeys,
    keys_probs: Option<AttentionKeys>,
    initial: Vec<Tensor>,
}

fn content_spec(memory_dim: usize, query_dim: usize, attn_dim: usize) -> AttentionSpec {
    AttentionSpec {
        memory_dim,
        query_dim,
        attn_dim,
        n_heads: 1,
        location: None,
        sharpening: 1.0,
    }
}

impl NestedAttention {
    pub(crate) fn load(
        usage: UsageDecSub,
        query_dim: usize,
        sub_hidden: usize,
        sub_vocab: usize,
        attn_dim: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let output_dim = usage.memory_dim(sub_hidden, sub_vocab);
        let attn = AdditiveAttention::load(
            content_spec(output_dim, query_dim, attn_dim),
            vb.pp("attn"),
        )?;
        let gated = match usage {
            UsageDecSub::Gated => Some(GatedMix {
                attn_probs: AdditiveAttention::load(
                    content_spec(sub_vocab, query_dim, attn_dim),
                    vb.pp("attn_probs"),
                )?,
                proj: candle_nn::linear(sub_vocab, sub_hidden, vb.pp("proj"))?,
                gate: candle_nn::linear(query_dim + 2 * sub_hidden, sub_hidden, vb.pp("gate"))?,
            }),
            _ => None,
        };
        Ok(Self {
            usage,
            attn,
            gated,
            output_dim,
        })
    }

    /// Width of the context vector fed back into the decoder.
    pub(crate) fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub(crate) fn prepare(&self, memory: &SubMemory) -> candle_core::Result<PreparedSubMemory> {
        let attended = match self.usage {
            UsageDecSub::Softmax => memory.probs.clone(),
            UsageDecSub::UpdateDecoder | UsageDecSub::Gated => memory.hidden.clone(),
            UsageDecSub::All => cat_features(&memory.hidden, &memory.probs)?,
        };
        let keys = self.attn.keys(&attended)?;
        let initial = self.attn.initial_weights(&keys, 1)?;
        let keys_probs = match &self.gated {
            Some(g) => Some(g.attn_probs.keys(&memory.probs)?),
            None => None,
        };
        Ok(PreparedSubMemory {
            keys,
            keys_probs,
            initial,
        })
    }

    /// Context `[batch, output_dim]` for decoder output `query` `[batch, query_dim]`.
    pub(crate) fn context(
        &self,
        memory: &PreparedSubMemory,
        query: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let ctx = self.attn.forward(&memory.keys, query, &memory.initial)?.context;
        match (&self.gated, &memory.keys_probs) {
            (Some(g), Some(keys_probs)) => {
                let ctx_p = g.attn_probs.forward(keys_probs, query, &memory.initial_probs()?)?;
                let ctx_p = g.proj.forward(&ctx_p.context)?;
                let gate_in = Tensor::cat(&[query, &ctx, &ctx_p], D::Minus1)?;
                let gate = candle_nn::ops::sigmoid(&g.gate.forward(&gate_in)?)?;
                let one_minus = gate.affine(-1.0, 1.0)?;
                (gate * ctx)? + (one_minus * ctx_p)?
            }
            _ => Ok(ctx),
        }
    }
}

impl PreparedSubMemory {
    fn initial_probs(&self) -> candle_core::Result<Vec<Tensor>> {
        match &self.keys_probs {
            Some(k) => {
                let t = k.frames()?;
                let like = &self.initial[0];
                Ok(vec![Tensor::zeros((1, t), like.dtype(), like.device())?])
            }
            None => Ok(Vec::new()),
        }
    }
}
