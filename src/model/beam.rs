use std::cmp::Ordering;

use crate::config::DecodeParams;
use crate::error::AsrError;
use crate::token_converter::vocab::{BLANK_ID, EOS_ID, PAD_ID, SOS_ID};
use crate::types::Hypothesis;

/// Search limits and score weights for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamConfig {
    pub beam_width: usize,
    pub max_len: usize,
    pub min_len: usize,
    /// Bonus added per emitted token.
    pub length_penalty: f64,
    pub coverage_penalty: f64,
    pub coverage_threshold: f64,
    pub lm_weight: f64,
}

impl BeamConfig {
    /// Length limits scale with the number of encoder frames.
    pub fn from_params(params: &DecodeParams, enc_frames: usize) -> Self {
        Self {
            beam_width: params.beam_width.max(1),
            max_len: ((enc_frames as f64 * params.max_len_ratio).ceil() as usize).max(1),
            min_len: (enc_frames as f64 * params.min_len_ratio).floor() as usize,
            length_penalty: params.length_penalty,
            coverage_penalty: params.coverage_penalty,
            coverage_threshold: params.coverage_threshold,
            lm_weight: params.rnnlm_weight,
        }
    }
}

pub struct StepOutput<S> {
    /// Decoder log-probabilities over the vocabulary.
    pub log_probs: Vec<f32>,
    /// Language model log-probabilities, when an LM is fused.
    pub lm_log_probs: Option<Vec<f32>>,
    /// Attention weights over the memory frames for this step.
    pub attention: Vec<f32>,
    pub state: S,
}

/// One autoregressive decoder as seen by beam search.
pub trait StepDecoder {
    type State: Clone;

    fn initial_state(&self) -> Result<Self::State, AsrError>;

    fn step(&self, prev: usize, state: &Self::State) -> Result<StepOutput<Self::State>, AsrError>;
}

#[derive(Clone)]
struct Partial<S> {
    ids: Vec<usize>,
    peaks: Vec<usize>,
    score_am: f64,
    score_lm: f64,
    coverage: Vec<f32>,
    score: f64,
    state: S,
}

impl<S> Partial<S> {
    fn ended(&self) -> bool {
        self.ids.last() == Some(&EOS_ID)
    }

    fn into_hypothesis(mut self) -> Hypothesis {
        if self.ended() {
            self.ids.pop();
            self.peaks.pop();
        }
        Hypothesis {
            ids: self.ids,
            score: self.score,
            score_am: self.score_am,
            score_lm: self.score_lm,
            attention_peaks: self.peaks,
        }
    }
}

fn coverage_term(coverage: &[f32], threshold: f64) -> f64 {
    coverage
        .iter()
        .map(|&c| c as f64)
        .filter(|&c| c > threshold)
        .sum()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn by_score_desc<S>(a: &Partial<S>, b: &Partial<S>) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

/// Beam search with shallow LM fusion and length/coverage terms.
///
/// Ranking score of a hypothesis:
/// `am + lm_weight * lm + length_penalty * len + coverage_penalty * coverage`,
/// where `coverage` sums accumulated attention over frames above
/// `coverage_threshold`. Returns ended hypotheses best first, without `<eos>`.
pub fn beam_search<D: StepDecoder>(
    decoder: &D,
    cfg: &BeamConfig,
) -> Result<Vec<Hypothesis>, AsrError> {
    let width = cfg.beam_width.max(1);
    let mut beam = vec![Partial {
        ids: Vec::new(),
        peaks: Vec::new(),
        score_am: 0.0,
        score_lm: 0.0,
        coverage: Vec::new(),
        score: 0.0,
        state: decoder.initial_state()?,
    }];
    let mut ended: Vec<Partial<D::State>> = Vec::new();

    for t in 0..cfg.max_len {
        let mut candidates = Vec::new();
        for hyp in &beam {
            let prev = hyp.ids.last().copied().unwrap_or(SOS_ID);
            let out = decoder.step(prev, &hyp.state)?;
            let fused: Vec<f64> = match &out.lm_log_probs {
                Some(lm) => out
                    .log_probs
                    .iter()
                    .zip(lm)
                    .map(|(&am, &lm)| am as f64 + cfg.lm_weight * lm as f64)
                    .collect(),
                None => out.log_probs.iter().map(|&am| am as f64).collect(),
            };
            let mut order: Vec<usize> = (0..fused.len())
                .filter(|&k| k != BLANK_ID && k != PAD_ID)
                .filter(|&k| k != EOS_ID || t >= cfg.min_len)
                .collect();
            order.sort_by(|&a, &b| fused[b].partial_cmp(&fused[a]).unwrap_or(Ordering::Equal));
            order.truncate(width);

            let mut coverage = hyp.coverage.clone();
            if coverage.len() < out.attention.len() {
                coverage.resize(out.attention.len(), 0.0);
            }
            for (c, a) in coverage.iter_mut().zip(&out.attention) {
                *c += a;
            }
            let cov = coverage_term(&coverage, cfg.coverage_threshold);
            let peak = argmax(&out.attention);

            for k in order {
                let score_am = hyp.score_am + out.log_probs[k] as f64;
                let score_lm = hyp.score_lm
                    + out.lm_log_probs.as_ref().map_or(0.0, |lm| lm[k] as f64);
                let len = hyp.ids.len() + 1;
                let score = score_am
                    + cfg.lm_weight * score_lm
                    + cfg.length_penalty * len as f64
                    + cfg.coverage_penalty * cov;
                let mut ids = hyp.ids.clone();
                ids.push(k);
                let mut peaks = hyp.peaks.clone();
                peaks.push(peak);
                candidates.push(Partial {
                    ids,
                    peaks,
                    score_am,
                    score_lm,
                    coverage: coverage.clone(),
                    score,
                    state: out.state.clone(),
                });
            }
        }

        candidates.sort_by(by_score_desc);
        beam.clear();
        for cand in candidates.into_iter().take(width) {
            if cand.ended() {
                ended.push(cand);
            } else {
                beam.push(cand);
            }
        }
        if ended.len() >= width || beam.is_empty() {
            break;
        }
    }

    // hypotheses cut off by max_len still compete
    ended.extend(beam);
    ended.sort_by(by_score_desc);
    Ok(ended.into_iter().map(Partial::into_hypothesis).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V: usize = 7;

    /// Scripted decoder: the distribution depends only on the step index.
    struct Scripted {
        steps: Vec<Vec<(usize, f32)>>,
        lm: Option<Vec<Vec<(usize, f32)>>>,
    }

    fn dist(entries: &[(usize, f32)]) -> Vec<f32> {
        let mut d = vec![-30.0f32; V];
        for &(k, p) in entries {
            d[k] = p.ln();
        }
        d
    }

    impl StepDecoder for Scripted {
        type State = usize;

        fn initial_state(&self) -> Result<usize, AsrError> {
            Ok(0)
        }

        fn step(&self, _prev: usize, t: &usize) -> Result<StepOutput<usize>, AsrError> {
            let i = (*t).min(self.steps.len() - 1);
            Ok(StepOutput {
                log_probs: dist(&self.steps[i]),
                lm_log_probs: self.lm.as_ref().map(|lm| dist(&lm[i.min(lm.len() - 1)])),
                attention: vec![0.5, 0.5],
                state: t + 1,
            })
        }
    }

    fn cfg(beam_width: usize) -> BeamConfig {
        BeamConfig {
            beam_width,
            max_len: 5,
            min_len: 0,
            length_penalty: 0.0,
            coverage_penalty: 0.0,
            coverage_threshold: 0.0,
            lm_weight: 0.0,
        }
    }

    fn two_step() -> Scripted {
        Scripted {
            steps: vec![
                vec![(4, 0.6), (5, 0.4)],
                vec![(EOS_ID, 0.9), (6, 0.1)],
            ],
            lm: None,
        }
    }

    #[test]
    fn hypotheses_are_ranked_and_stripped_of_eos() {
        let hyps = beam_search(&two_step(), &cfg(2)).unwrap();
        assert_eq!(hyps[0].ids, vec![4]);
        assert_eq!(hyps[1].ids, vec![5]);
        assert!(hyps[0].score >= hyps[1].score);
        assert!((hyps[0].score_am - (0.6f64.ln() + 0.9f64.ln())).abs() < 1e-5);
        assert_eq!(hyps[0].attention_peaks.len(), 1);
    }

    #[test]
    fn min_len_blocks_early_eos() {
        let mut c = cfg(1);
        c.min_len = 2;
        let hyps = beam_search(&two_step(), &c).unwrap();
        assert!(hyps[0].ids.len() >= 2);
    }

    #[test]
    fn max_len_cuts_off_unfinished_hypotheses() {
        let never_ends = Scripted {
            steps: vec![vec![(4, 0.99), (EOS_ID, 0.01)]],
            lm: None,
        };
        let mut c = cfg(1);
        c.max_len = 3;
        let hyps = beam_search(&never_ends, &c).unwrap();
        assert_eq!(hyps[0].ids, vec![4, 4, 4]);
    }

    #[test]
    fn length_penalty_rewards_longer_outputs() {
        let short_or_long = Scripted {
            steps: vec![vec![(4, 0.5), (EOS_ID, 0.5)], vec![(EOS_ID, 0.9), (4, 0.1)]],
            lm: None,
        };
        let plain = beam_search(&short_or_long, &cfg(2)).unwrap();
        assert!(plain[0].ids.is_empty());
        let mut c = cfg(2);
        c.length_penalty = 2.0;
        let rewarded = beam_search(&short_or_long, &c).unwrap();
        assert_eq!(rewarded[0].ids, vec![4]);
    }

    #[test]
    fn lm_fusion_can_flip_the_decision() {
        let fused = Scripted {
            steps: vec![vec![(4, 0.55), (5, 0.45)], vec![(EOS_ID, 1.0)]],
            lm: Some(vec![vec![(4, 0.1), (5, 0.9)], vec![(EOS_ID, 1.0)]]),
        };
        assert_eq!(beam_search(&fused, &cfg(2)).unwrap()[0].ids, vec![4]);
        let mut c = cfg(2);
        c.lm_weight = 1.0;
        let best = &beam_search(&fused, &c).unwrap()[0];
        assert_eq!(best.ids, vec![5]);
        assert!(best.score_lm < 0.0);
    }

    #[test]
    fn coverage_counts_frames_above_threshold() {
        assert!((coverage_term(&[0.2, 0.7, 1.5], 0.5) - 2.2).abs() < 1e-6);
        assert_eq!(coverage_term(&[0.2], 0.5), 0.0);
    }

    #[test]
    fn lengths_scale_with_encoder_frames() {
        let params = DecodeParams {
            max_len_ratio: 0.5,
            min_len_ratio: 0.1,
            beam_width: 3,
            ..DecodeParams::default()
        };
        let c = BeamConfig::from_params(&params, 41);
        assert_eq!(c.max_len, 21);
        assert_eq!(c.min_len, 4);
        assert_eq!(c.beam_width, 3);
    }
}
