use serde::Serialize;

/// One manifest row. `row` is the stable index the row had in the manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceRecord {
    pub row: usize,
    pub utt_id: String,
    pub feat_path: String,
    pub x_len: usize,
    pub x_dim: usize,
    pub text: String,
    pub token_ids: Vec<usize>,
    pub y_len: usize,
    pub y_dim: usize,
}

/// Per-utterance targets of one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// Token id sequences (training mode).
    Ids(Vec<Vec<usize>>),
    /// Reference transcripts (test mode).
    Text(Vec<String>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Self::Ids(ids) => ids.len(),
            Self::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            Self::Text(text) => Some(text),
            Self::Ids(_) => None,
        }
    }

    pub fn as_ids(&self) -> Option<&[Vec<usize>]> {
        match self {
            Self::Ids(ids) => Some(ids),
            Self::Text(_) => None,
        }
    }
}

/// Acoustic features of one utterance, `frames x dim`, row-major.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureMatrix {
    pub frames: usize,
    pub dim: usize,
    pub data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn new(frames: usize, dim: usize, data: Vec<f32>) -> Self {
        Self { frames, dim, data }
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.dim..(t + 1) * self.dim]
    }
}

/// A minibatch. Every per-utterance vector shares one ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub xs: Vec<FeatureMatrix>,
    pub xlens: Vec<usize>,
    pub ys: Targets,
    pub ylens: Vec<usize>,
    pub ys_sub1: Option<Targets>,
    pub ylens_sub1: Option<Vec<usize>>,
    pub ys_sub2: Option<Targets>,
    pub ylens_sub2: Option<Vec<usize>>,
    pub utt_ids: Vec<String>,
    pub text: Vec<String>,
    pub feat_paths: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.utt_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utt_ids.is_empty()
    }
}

/// A ranked decoding result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hypothesis {
    pub ids: Vec<usize>,
    /// Combined score used for ranking.
    pub score: f64,
    /// Acoustic (attention decoder) log-probability.
    pub score_am: f64,
    /// Language model log-probability, 0 without fusion.
    pub score_lm: f64,
    /// Encoder frame with the highest attention weight for each emitted token.
    pub attention_peaks: Vec<usize>,
}

/// Decoding output for one utterance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recognition {
    /// Main-task N-best list, best first.
    pub nbest: Vec<Hypothesis>,
    /// Best character-level sub-task hypothesis, when the model has one.
    pub sub1: Option<Hypothesis>,
}

impl Recognition {
    pub fn best(&self) -> Option<&Hypothesis> {
        self.nbest.first()
    }
}

/// Error counts of one scored set (or one utterance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ErrorCounts {
    pub substitutions: usize,
    pub insertions: usize,
    pub deletions: usize,
    /// Number of reference tokens.
    pub reference_len: usize,
}

impl ErrorCounts {
    pub fn errors(&self) -> usize {
        self.substitutions + self.insertions + self.deletions
    }

    pub fn add(&mut self, other: &ErrorCounts) {
        self.substitutions += other.substitutions;
        self.insertions += other.insertions;
        self.deletions += other.deletions;
        self.reference_len += other.reference_len;
    }

    fn percent(&self, n: usize) -> f64 {
        if self.reference_len == 0 {
            return 0.0;
        }
        n as f64 * 100.0 / self.reference_len as f64
    }

    pub fn error_rate(&self) -> f64 {
        self.percent(self.errors())
    }

    pub fn sub_rate(&self) -> f64 {
        self.percent(self.substitutions)
    }

    pub fn ins_rate(&self) -> f64 {
        self.percent(self.insertions)
    }

    pub fn del_rate(&self) -> f64 {
        self.percent(self.deletions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    /// `WER`, `CER` or `PER`.
    pub metric: &'static str,
    pub error_rate: f64,
    pub sub_rate: f64,
    pub ins_rate: f64,
    pub del_rate: f64,
    pub counts: ErrorCounts,
}

impl MetricReport {
    pub fn from_counts(metric: &'static str, counts: ErrorCounts) -> Self {
        Self {
            metric,
            error_rate: counts.error_rate(),
            sub_rate: counts.sub_rate(),
            ins_rate: counts.ins_rate(),
            del_rate: counts.del_rate(),
            counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetReport {
    pub set_name: String,
    pub n_utterances: usize,
    pub metrics: Vec<MetricReport>,
    /// Reference words outside the model vocabulary (word units only).
    pub oov_total: Option<usize>,
    pub elapsed_secs: f64,
}

impl SetReport {
    pub fn metric(&self, name: &str) -> Option<&MetricReport> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalSummary {
    pub epoch: usize,
    pub sets: Vec<SetReport>,
    /// Arithmetic mean of each metric across sets, in dispatch order.
    pub means: Vec<(String, f64)>,
}

impl EvalSummary {
    pub fn mean(&self, metric: &str) -> Option<f64> {
        self.means
            .iter()
            .find(|(name, _)| name == metric)
            .map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rates_are_percent_of_reference() {
        let counts = ErrorCounts {
            substitutions: 1,
            insertions: 1,
            deletions: 2,
            reference_len: 8,
        };
        assert!((counts.error_rate() - 50.0).abs() < 1e-12);
        assert!((counts.del_rate() - 25.0).abs() < 1e-12);
    }

    #[test]
    fn empty_reference_rate_is_zero() {
        assert_eq!(ErrorCounts::default().error_rate(), 0.0);
    }
}
