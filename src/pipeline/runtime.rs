use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{DecodeParams, EvalConfig, Unit};
use crate::dataset::{Dataset, DatasetBuilder, FeatureReader, TaskSource};
use crate::error::AsrError;
use crate::evaluation::{count_oov, resolve_unk, UnitScorer};
use crate::pipeline::decode_log::DecodeLog;
use crate::pipeline::traits::Recognizer;
use crate::token_converter::vocab::UNK_ID;
use crate::types::{
    Batch, ErrorCounts, EvalSummary, FeatureMatrix, Hypothesis, MetricReport, Recognition,
    SetReport,
};

/// Progress notifications emitted while evaluating.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    SetStarted { set_name: &'a str, n_utterances: usize },
    UtteranceDone,
    SetFinished { set_name: &'a str },
}

/// Decodes every evaluation set with one recognizer and scores the results.
pub struct Evaluator {
    config: EvalConfig,
    params: DecodeParams,
    scorer: UnitScorer,
    epoch: usize,
    recognizer: Box<dyn Recognizer>,
    recognizer_bwd: Option<Box<dyn Recognizer>>,
    feature_reader: Arc<dyn FeatureReader>,
    header: Vec<String>,
}

pub(crate) struct EvaluatorParts {
    pub config: EvalConfig,
    pub params: DecodeParams,
    pub scorer: UnitScorer,
    pub epoch: usize,
    pub recognizer: Box<dyn Recognizer>,
    pub recognizer_bwd: Option<Box<dyn Recognizer>>,
    pub feature_reader: Arc<dyn FeatureReader>,
    pub header: Vec<String>,
}

/// Per-set accumulation.
struct SetTally {
    totals: Vec<ErrorCounts>,
    oov_total: usize,
    n_utterances: usize,
    refs: Vec<String>,
    hyps: Vec<String>,
}

impl Evaluator {
    pub(crate) fn from_parts(parts: EvaluatorParts) -> Self {
        Self {
            config: parts.config,
            params: parts.params,
            scorer: parts.scorer,
            epoch: parts.epoch,
            recognizer: parts.recognizer,
            recognizer_bwd: parts.recognizer_bwd,
            feature_reader: parts.feature_reader,
            header: parts.header,
        }
    }

    pub fn params(&self) -> &DecodeParams {
        &self.params
    }

    pub fn scorer(&self) -> UnitScorer {
        self.scorer
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn run(&self) -> Result<EvalSummary, AsrError> {
        self.run_with(|_| {})
    }

    /// Evaluates all sets in order, reporting progress to `progress`.
    pub fn run_with(
        &self,
        mut progress: impl FnMut(Progress<'_>),
    ) -> Result<EvalSummary, AsrError> {
        let mut log = DecodeLog::create(&self.config.decode_log_path())?;
        for line in &self.header {
            log.line(line)?;
        }
        log.line(format!("beam width: {}", self.params.beam_width))?;
        log.line(format!("length penalty: {:.3}", self.params.length_penalty))?;
        log.line(format!("coverage penalty: {:.3}", self.params.coverage_penalty))?;
        log.line(format!("coverage threshold: {:.3}", self.params.coverage_threshold))?;
        log.line(format!("epoch: {}", self.epoch))?;

        let mut sets = Vec::with_capacity(self.config.eval_sets.len());
        for manifest in &self.config.eval_sets {
            let report = self.evaluate_set(manifest, &mut log, &mut progress)?;
            sets.push(report);
        }

        let metrics = self.scorer.metrics();
        let means: Vec<(String, f64)> = metrics
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let total: f64 = sets.iter().map(|s| s.metrics[k].error_rate).sum();
                (name.to_string(), total / sets.len().max(1) as f64)
            })
            .collect();
        let values: Vec<f64> = means.iter().map(|(_, v)| *v).collect();
        log.line(format!("{} (mean): {}", metrics.join(" / "), percent_list(&values)))?;

        Ok(EvalSummary {
            epoch: self.epoch,
            sets,
            means,
        })
    }

    fn open_set(&self, manifest: &Path) -> Result<Dataset, AsrError> {
        let model_dir = &self.config.model_dir;
        let unit = self.recognizer.unit();
        let mut main = TaskSource::new(manifest, model_dir.join("dict.txt"), unit.as_str());
        if unit == Unit::Wordpiece {
            main = main.with_wp_model(model_dir.join("wp.model"));
        }
        let mut builder = DatasetBuilder::new(main, self.params.batch_size)
            .with_test_mode(true)
            .with_n_epochs(1)
            .with_feature_reader(Box::new(Arc::clone(&self.feature_reader)));
        if let Some(unit_sub1) = self.recognizer.sub1_unit() {
            let dict = model_dir.join("dict_sub1.txt");
            if dict.is_file() || self.scorer.reads_sub1() {
                builder = builder.with_sub1(TaskSource::new(manifest, dict, unit_sub1.as_str()));
            }
        }
        builder.build()
    }

    fn evaluate_set(
        &self,
        manifest: &Path,
        log: &mut DecodeLog,
        progress: &mut impl FnMut(Progress<'_>),
    ) -> Result<SetReport, AsrError> {
        let start = Instant::now();
        let mut dataset = self.open_set(manifest)?;
        let set_name = dataset.set_name().to_string();
        progress(Progress::SetStarted {
            set_name: &set_name,
            n_utterances: dataset.len(),
        });

        let metrics = self.scorer.metrics();
        let mut tally = SetTally {
            totals: vec![ErrorCounts::default(); metrics.len()],
            oov_total: 0,
            n_utterances: 0,
            refs: Vec::new(),
            hyps: Vec::new(),
        };
        while let Some(batch) = dataset.next_batch()? {
            self.evaluate_batch(&dataset, &batch, &mut tally, progress)?;
        }
        self.write_trn(&set_name, &tally)?;

        let reports: Vec<MetricReport> = metrics
            .iter()
            .zip(&tally.totals)
            .map(|(&name, &counts)| MetricReport::from_counts(name, counts))
            .collect();
        let rates: Vec<f64> = reports.iter().map(|r| r.error_rate).collect();
        log.line(format!(
            "{} ({}): {}",
            metrics.join(" / "),
            set_name,
            percent_list(&rates)
        ))?;
        let first = &reports[0];
        log.line(format!(
            "SUB: {:.3} / INS: {:.3} / DEL: {:.3}",
            first.sub_rate, first.ins_rate, first.del_rate
        ))?;
        let oov_total = self.scorer.reports_oov().then_some(tally.oov_total);
        if let Some(oov) = oov_total {
            log.line(format!("OOV (total): {oov}"))?;
        }
        let elapsed_secs = start.elapsed().as_secs_f64();
        log.line(format!("Elapsed time: {elapsed_secs:.2} [sec]"))?;
        progress(Progress::SetFinished {
            set_name: &set_name,
        });

        Ok(SetReport {
            set_name,
            n_utterances: tally.n_utterances,
            metrics: reports,
            oov_total,
            elapsed_secs,
        })
    }

    fn evaluate_batch(
        &self,
        dataset: &Dataset,
        batch: &Batch,
        tally: &mut SetTally,
        progress: &mut impl FnMut(Progress<'_>),
    ) -> Result<(), AsrError> {
        let references = if self.scorer.reads_sub1() {
            batch.ys_sub1.as_ref().and_then(|ys| ys.as_text())
        } else {
            batch.ys.as_text()
        }
        .unwrap_or(batch.text.as_slice());

        for (i, utt_id) in batch.utt_ids.iter().enumerate() {
            let xs = batch.xs.get(i).ok_or_else(|| {
                AsrError::invalid_input(format!("{utt_id}: batch carries no features"))
            })?;
            let reference = references.get(i).map(String::as_str).unwrap_or_default();
            let rec = self.recognize(xs)?;
            let hypothesis = self.hypothesis_text(dataset, &rec)?;

            let counts = self.scorer.score(utt_id, reference, &hypothesis);
            for (total, c) in tally.totals.iter_mut().zip(&counts) {
                total.add(c);
            }
            if self.scorer.reports_oov() {
                tally.oov_total += count_oov(reference, dataset.converter().vocab());
            }
            tracing::debug!(utt_id = %utt_id, reference, hypothesis = %hypothesis, "scored utterance");
            tally.refs.push(format!("{reference} ({utt_id})"));
            tally.hyps.push(format!("{hypothesis} ({utt_id})"));
            tally.n_utterances += 1;
            progress(Progress::UtteranceDone);
        }
        Ok(())
    }

    fn recognize(&self, xs: &FeatureMatrix) -> Result<Recognition, AsrError> {
        let mut rec = self.recognizer.decode(xs, &self.params)?;
        if self.params.fwd_bwd_attention {
            if let Some(bwd) = &self.recognizer_bwd {
                rec.nbest = self.rescore_fwd_bwd(bwd.as_ref(), xs, rec.nbest)?;
            }
        }
        Ok(rec)
    }

    /// Pools forward and (re-reversed) backward N-best lists and ranks them by
    /// the sum of both directions' teacher-forced log-likelihoods.
    fn rescore_fwd_bwd(
        &self,
        bwd: &dyn Recognizer,
        xs: &FeatureMatrix,
        fwd_nbest: Vec<Hypothesis>,
    ) -> Result<Vec<Hypothesis>, AsrError> {
        let mut candidates = fwd_nbest;
        for mut hyp in bwd.decode(xs, &self.params)?.nbest {
            hyp.ids.reverse();
            hyp.attention_peaks.reverse();
            if !candidates.iter().any(|c| c.ids == hyp.ids) {
                candidates.push(hyp);
            }
        }
        for hyp in &mut candidates {
            let reversed: Vec<usize> = hyp.ids.iter().rev().copied().collect();
            hyp.score = self.recognizer.score_sequence(xs, &hyp.ids)?
                + bwd.score_sequence(xs, &reversed)?;
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(candidates)
    }

    fn hypothesis_text(&self, dataset: &Dataset, rec: &Recognition) -> Result<String, AsrError> {
        if self.scorer.reads_sub1() {
            let converter = dataset.converter_sub1().ok_or_else(|| {
                AsrError::missing("sub-task dictionary", self.config.model_dir.join("dict_sub1.txt"))
            })?;
            return Ok(rec
                .sub1
                .as_ref()
                .map(|h| converter.decode(&h.ids))
                .unwrap_or_default());
        }
        let Some(best) = rec.best() else {
            return Ok(String::new());
        };
        if self.params.resolving_unk && best.ids.contains(&UNK_ID) {
            if let (Some(chars), Some(char_conv)) = (&rec.sub1, dataset.converter_sub1()) {
                if char_conv.unit() == Unit::Char {
                    return Ok(resolve_unk(best, dataset.converter(), chars, char_conv));
                }
            }
        }
        Ok(dataset.converter().decode(&best.ids))
    }

    fn write_trn(&self, set_name: &str, tally: &SetTally) -> Result<(), AsrError> {
        let dir: PathBuf = self.config.decode_dir.join(set_name);
        std::fs::create_dir_all(&dir).map_err(|e| AsrError::io("create set decode dir", e))?;
        for (name, lines) in [("ref.trn", &tally.refs), ("hyp.trn", &tally.hyps)] {
            let mut text = lines.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            std::fs::write(dir.join(name), text).map_err(|e| AsrError::io("write trn", e))?;
        }
        Ok(())
    }
}

fn percent_list(values: &[f64]) -> String {
    let joined: Vec<String> = values.iter().map(|v| format!("{v:.3}")).collect();
    format!("{} %", joined.join(" / "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_render_with_three_decimals() {
        assert_eq!(percent_list(&[12.5]), "12.500 %");
        assert_eq!(percent_list(&[1.0, 0.25]), "1.000 / 0.250 %");
    }
}
