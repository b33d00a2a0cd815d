use candle_core::{Tensor, D};
use candle_nn::rnn::{GRUConfig, GRUState, LSTMConfig, LSTMState, GRU, LSTM, RNN};
use candle_nn::VarBuilder;

use crate::config::RnnType;

/// A single-layer unidirectional recurrent cell.
///
/// Weights live under the cell's own prefix with candle's single-layer names
/// (`weight_ih_l0`, `weight_hh_l0`, `bias_ih_l0`, `bias_hh_l0`).
#[derive(Debug, Clone)]
pub(crate) enum RecurrentCell {
    Lstm(LSTM),
    Gru(GRU),
}

#[derive(Debug, Clone)]
pub(crate) enum CellState {
    Lstm(LSTMState),
    Gru(GRUState),
}

impl CellState {
    /// Hidden output `[batch, hidden]`.
    pub(crate) fn h(&self) -> &Tensor {
        match self {
            Self::Lstm(s) => &s.h,
            Self::Gru(s) => &s.h,
        }
    }
}

impl RecurrentCell {
    pub(crate) fn load(
        kind: RnnType,
        in_dim: usize,
        hidden: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        Ok(match kind {
            RnnType::Lstm => {
                let cfg = LSTMConfig {
                    layer_idx: 0,
                    ..Default::default()
                };
                Self::Lstm(candle_nn::rnn::lstm(in_dim, hidden, cfg, vb)?)
            }
            RnnType::Gru => Self::Gru(candle_nn::rnn::gru(in_dim, hidden, GRUConfig::default(), vb)?),
        })
    }

    pub(crate) fn zero_state(&self, batch: usize) -> candle_core::Result<CellState> {
        Ok(match self {
            Self::Lstm(cell) => CellState::Lstm(cell.zero_state(batch)?),
            Self::Gru(cell) => CellState::Gru(cell.zero_state(batch)?),
        })
    }

    /// One step: `x` is `[batch, in_dim]`.
    pub(crate) fn step(&self, x: &Tensor, state: &CellState) -> candle_core::Result<CellState> {
        match (self, state) {
            (Self::Lstm(cell), CellState::Lstm(s)) => Ok(CellState::Lstm(cell.step(x, s)?)),
            (Self::Gru(cell), CellState::Gru(s)) => Ok(CellState::Gru(cell.step(x, s)?)),
            _ => Err(candle_core::Error::Msg(
                "recurrent state does not match the cell type".to_string(),
            )),
        }
    }

    /// Whole sequence: `xs` is `[batch, time, in_dim]`, returns `[batch, time, hidden]`.
    pub(crate) fn seq(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Lstm(cell) => {
                let states = cell.seq(xs)?;
                cell.states_to_tensor(&states)
            }
            Self::Gru(cell) => {
                let states = cell.seq(xs)?;
                cell.states_to_tensor(&states)
            }
        }
    }
}

/// Reverses `[batch, time, dim]` along time.
pub(crate) fn reverse_time(xs: &Tensor) -> candle_core::Result<Tensor> {
    let t = xs.dim(1)?;
    let idx: Vec<u32> = (0..t as u32).rev().collect();
    let idx = Tensor::new(idx.as_slice(), xs.device())?;
    xs.index_select(&idx, 1)
}

/// Concatenates the last dimension of two tensors.
pub(crate) fn cat_features(a: &Tensor, b: &Tensor) -> candle_core::Result<Tensor> {
    Tensor::cat(&[a, b], D::Minus1)
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    use super::*;

    #[test]
    fn seq_and_step_agree_on_the_first_frame() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        for kind in [RnnType::Lstm, RnnType::Gru] {
            let cell = RecurrentCell::load(kind, 3, 4, vb.pp(format!("{kind:?}"))).unwrap();
            let xs = Tensor::randn(0f32, 1.0, (1, 5, 3), &Device::Cpu).unwrap();
            let out = cell.seq(&xs).unwrap();
            assert_eq!(out.dims(), &[1, 5, 4]);
            let first = xs.narrow(1, 0, 1).unwrap().squeeze(1).unwrap();
            let state = cell.step(&first, &cell.zero_state(1).unwrap()).unwrap();
            let a: Vec<f32> = state.h().flatten_all().unwrap().to_vec1().unwrap();
            let b: Vec<f32> = out.narrow(1, 0, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn reverse_time_flips_frames() {
        let xs = Tensor::new(&[[[1f32], [2.], [3.]]], &Device::Cpu).unwrap();
        let r: Vec<f32> = reverse_time(&xs).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(r, vec![3.0, 2.0, 1.0]);
    }
}
