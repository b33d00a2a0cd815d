use candle_core::{Device, Module, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Linear, VarBuilder};

struct LocationFeatures {
    conv: Conv1d,
    proj: Linear,
}

struct AttentionHead {
    w_key: Linear,
    w_query: Linear,
    v: Linear,
    location: Option<LocationFeatures>,
}

impl AttentionHead {
    fn energy(
        &self,
        keys: &Tensor,
        query: &Tensor,
        prev_weights: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let q = self.w_query.forward(query)?.unsqueeze(1)?;
        let mut e = keys.broadcast_add(&q)?;
        if let Some(loc) = &self.location {
            let t = prev_weights.dim(1)?;
            let f = loc
                .conv
                .forward(&prev_weights.unsqueeze(1)?)?
                .narrow(2, 0, t)?
                .transpose(1, 2)?
                .contiguous()?;
            e = e.broadcast_add(&loc.proj.forward(&f)?)?;
        }
        self.v.forward(&e.tanh()?)?.squeeze(2)
    }
}

/// Shape of an additive attention module.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttentionSpec {
    pub memory_dim: usize,
    pub query_dim: usize,
    pub attn_dim: usize,
    pub n_heads: usize,
    /// `Some((channels, width))` adds location features from the previous weights.
    pub location: Option<(usize, usize)>,
    pub sharpening: f64,
}

/// Precomputed key projections of one memory.
pub(crate) struct AttentionKeys {
    memory: Tensor,
    keys: Vec<Tensor>,
}

impl AttentionKeys {
    pub(crate) fn frames(&self) -> candle_core::Result<usize> {
        self.memory.dim(1)
    }

    pub(crate) fn device(&self) -> &Device {
        self.memory.device()
    }
}

pub(crate) struct AttentionStep {
    /// `[batch, memory_dim]`
    pub context: Tensor,
    /// Per-head weights `[batch, T]`.
    pub weights: Vec<Tensor>,
}

impl AttentionStep {
    /// Head-averaged weights of the first batch row.
    pub(crate) fn mean_weights(&self) -> candle_core::Result<Vec<f32>> {
        let refs: Vec<&Tensor> = self.weights.iter().collect();
        let stacked = Tensor::stack(&refs, 0)?.mean(0)?;
        stacked.get(0)?.to_vec1::<f32>()
    }
}

/// Additive (Bahdanau) attention, content- or location-based, with one or more heads.
pub(crate) struct AdditiveAttention {
    heads: Vec<AttentionHead>,
    w_out: Option<Linear>,
    sharpening: f64,
}

impl AdditiveAttention {
    pub(crate) fn load(spec: AttentionSpec, vb: VarBuilder) -> candle_core::Result<Self> {
        let n_heads = spec.n_heads.max(1);
        let mut heads = Vec::with_capacity(n_heads);
        for h in 0..n_heads {
            let hvb = vb.pp(format!("head.{h}"));
            let location = match spec.location {
                Some((channels, width)) => Some(LocationFeatures {
                    conv: candle_nn::conv1d_no_bias(
                        1,
                        channels,
                        width,
                        Conv1dConfig {
                            padding: width / 2,
                            ..Default::default()
                        },
                        hvb.pp("conv"),
                    )?,
                    proj: candle_nn::linear_no_bias(channels, spec.attn_dim, hvb.pp("w_conv"))?,
                }),
                None => None,
            };
            heads.push(AttentionHead {
                w_key: candle_nn::linear(spec.memory_dim, spec.attn_dim, hvb.pp("w_key"))?,
                w_query: candle_nn::linear_no_bias(spec.query_dim, spec.attn_dim, hvb.pp("w_query"))?,
                v: candle_nn::linear_no_bias(spec.attn_dim, 1, hvb.pp("v"))?,
                location,
            });
        }
        let w_out = if n_heads > 1 {
            Some(candle_nn::linear(
                spec.memory_dim * n_heads,
                spec.memory_dim,
                vb.pp("w_out"),
            )?)
        } else {
            None
        };
        Ok(Self {
            heads,
            w_out,
            sharpening: spec.sharpening,
        })
    }

    /// `memory` is `[1, T, memory_dim]`.
    pub(crate) fn keys(&self, memory: &Tensor) -> candle_core::Result<AttentionKeys> {
        let keys = self
            .heads
            .iter()
            .map(|h| h.w_key.forward(memory))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(AttentionKeys {
            memory: memory.clone(),
            keys,
        })
    }

    /// Uniform-zero previous weights for the first step.
    pub(crate) fn initial_weights(
        &self,
        keys: &AttentionKeys,
        batch: usize,
    ) -> candle_core::Result<Vec<Tensor>> {
        let t = keys.frames()?;
        let zeros = Tensor::zeros((batch, t), keys.memory.dtype(), keys.memory.device())?;
        Ok(vec![zeros; self.heads.len()])
    }

    /// `query` is `[batch, query_dim]`.
    pub(crate) fn forward(
        &self,
        keys: &AttentionKeys,
        query: &Tensor,
        prev_weights: &[Tensor],
    ) -> candle_core::Result<AttentionStep> {
        let memory = keys.memory.squeeze(0)?;
        let mut contexts = Vec::with_capacity(self.heads.len());
        let mut weights = Vec::with_capacity(self.heads.len());
        for ((head, k), prev) in self.heads.iter().zip(&keys.keys).zip(prev_weights) {
            let energy = (head.energy(k, query, prev)? * self.sharpening)?;
            let aw = candle_nn::ops::softmax(&energy, D::Minus1)?;
            contexts.push(aw.matmul(&memory)?);
            weights.push(aw);
        }
        let context = match &self.w_out {
            Some(w_out) => w_out.forward(&Tensor::cat(&contexts, D::Minus1)?)?,
            None => contexts.swap_remove(0),
        };
        Ok(AttentionStep { context, weights })
    }
}
