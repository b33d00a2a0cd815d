use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::ModelConfig;
use crate::model::rnn::{cat_features, reverse_time, RecurrentCell};

struct EncoderLayer {
    fwd: RecurrentCell,
    bwd: Option<RecurrentCell>,
    /// Keep every `subsample`-th output frame.
    subsample: usize,
}

impl EncoderLayer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let fwd = self.fwd.seq(xs)?;
        let out = match &self.bwd {
            Some(bwd) => {
                let rev = bwd.seq(&reverse_time(xs)?)?;
                cat_features(&fwd, &reverse_time(&rev)?)?
            }
            None => fwd,
        };
        drop_frames(&out, self.subsample)
    }
}

fn drop_frames(xs: &Tensor, factor: usize) -> candle_core::Result<Tensor> {
    if factor <= 1 {
        return Ok(xs.clone());
    }
    let t = xs.dim(1)?;
    let idx: Vec<u32> = (0..t).step_by(factor).map(|i| i as u32).collect();
    let idx = Tensor::new(idx.as_slice(), xs.device())?;
    xs.index_select(&idx, 1)
}

/// Encoder states of one utterance.
pub(crate) struct EncoderOutput {
    /// `[1, T_main, enc_dim]`
    pub main: Tensor,
    /// Output of the intermediate layer read by the sub-task decoder.
    pub sub1: Option<Tensor>,
    /// Input frames per `main` frame.
    pub main_factor: usize,
    pub sub1_factor: usize,
}

/// Stacked (bi)directional RNN encoder with frame-dropping subsampling.
pub(crate) struct RnnEncoder {
    layers: Vec<EncoderLayer>,
    sub1_layers: Option<usize>,
    output_dim: usize,
}

impl RnnEncoder {
    pub(crate) fn load(
        cfg: &ModelConfig,
        input_dim: usize,
        with_sub1: bool,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let dirs = if cfg.bidirectional { 2 } else { 1 };
        let mut layers = Vec::with_capacity(cfg.enc_n_layers);
        for l in 0..cfg.enc_n_layers {
            let in_dim = if l == 0 { input_dim } else { cfg.enc_n_units * dirs };
            let lvb = vb.pp(format!("rnn.{l}"));
            let fwd = RecurrentCell::load(cfg.enc_type, in_dim, cfg.enc_n_units, lvb.pp("fwd"))?;
            let bwd = if cfg.bidirectional {
                Some(RecurrentCell::load(cfg.enc_type, in_dim, cfg.enc_n_units, lvb.pp("bwd"))?)
            } else {
                None
            };
            layers.push(EncoderLayer {
                fwd,
                bwd,
                subsample: cfg.subsample.get(l).copied().unwrap_or(1).max(1),
            });
        }
        let sub1_layers = if with_sub1 {
            Some(
                cfg.enc_n_layers_sub1
                    .filter(|&n| n > 0)
                    .unwrap_or(cfg.enc_n_layers)
                    .min(cfg.enc_n_layers),
            )
        } else {
            None
        };
        Ok(Self {
            layers,
            sub1_layers,
            output_dim: cfg.enc_n_units * dirs,
        })
    }

    pub(crate) fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// `xs` is `[1, T, input_dim]`.
    pub(crate) fn forward(&self, xs: &Tensor) -> candle_core::Result<EncoderOutput> {
        let mut h = xs.clone();
        let mut factor = 1;
        let mut sub1 = None;
        let mut sub1_factor = 1;
        for (l, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            factor *= layer.subsample;
            if self.sub1_layers == Some(l + 1) {
                sub1 = Some(h.clone());
                sub1_factor = factor;
            }
        }
        Ok(EncoderOutput {
            main: h,
            sub1,
            main_factor: factor,
            sub1_factor,
        })
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    use super::*;

    #[test]
    fn subsampling_and_sub_layer_output() {
        let cfg = ModelConfig::from_yaml(
            "unit: word\nenc_n_units: 4\nenc_n_layers: 3\nenc_n_layers_sub1: 1\nsubsample: [2, 1, 2]\n",
        )
        .unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let enc = RnnEncoder::load(&cfg, 5, true, vb).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (1, 9, 5), &Device::Cpu).unwrap();
        let out = enc.forward(&xs).unwrap();
        // 9 -> 5 -> 5 -> 3
        assert_eq!(out.main.dims(), &[1, 3, 8]);
        assert_eq!(out.main_factor, 4);
        assert_eq!(out.sub1.unwrap().dims(), &[1, 5, 8]);
        assert_eq!(out.sub1_factor, 2);
    }
}
