use std::path::Path;
use std::sync::Arc;

use candle_core::Device;

use crate::config::{DecodeParams, EvalConfig};
use crate::dataset::{read_manifest, FeatureReader, KaldiMatrixReader};
use crate::error::AsrError;
use crate::evaluation::UnitScorer;
use crate::model::checkpoint::{resolve_checkpoint, select_device};
use crate::model::{NestedAttentionSeq2seq, SeqRnnlm};
use crate::pipeline::runtime::{Evaluator, EvaluatorParts};
use crate::pipeline::traits::Recognizer;

pub struct EvaluatorBuilder {
    config: EvalConfig,
    recognizer: Option<Box<dyn Recognizer>>,
    recognizer_bwd: Option<Box<dyn Recognizer>>,
    feature_reader: Option<Arc<dyn FeatureReader>>,
}

impl EvaluatorBuilder {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            config,
            recognizer: None,
            recognizer_bwd: None,
            feature_reader: None,
        }
    }

    /// Uses `recognizer` instead of loading the model from `model_dir`.
    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_recognizer_bwd(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.recognizer_bwd = Some(recognizer);
        self
    }

    pub fn with_feature_reader(mut self, reader: Arc<dyn FeatureReader>) -> Self {
        self.feature_reader = Some(reader);
        self
    }

    /// Loads everything the run needs and resolves decoding options and the
    /// scoring unit. Nothing is written to `decode_dir` yet.
    pub fn build(self) -> Result<Evaluator, AsrError> {
        if self.config.eval_sets.is_empty() {
            return Err(AsrError::invalid_config("no evaluation sets given"));
        }
        let mut header = Vec::new();
        let explicit_epoch = self.config.epoch.filter(|&e| e >= 0).map(|e| e as usize);

        let (recognizer, epoch): (Box<dyn Recognizer>, usize) = match self.recognizer {
            Some(recognizer) => {
                if self.config.rnnlm_dir.is_some() || self.config.rnnlm_bwd_dir.is_some() {
                    tracing::warn!("RNNLM paths are ignored for an injected recognizer");
                }
                (recognizer, explicit_epoch.unwrap_or(0))
            }
            None => {
                let device = select_device(&self.config.device)?;
                let (model, epoch) = load_model(&self.config, &device, &mut header)?;
                (Box::new(model), epoch)
            }
        };

        let params = DecodeParams::resolve(&self.config.decode, &recognizer.stored_decode())?;
        let scorer = UnitScorer::resolve(recognizer.unit(), params.recog_unit)?;
        if scorer.reads_sub1() && recognizer.sub1_unit().is_none() {
            return Err(AsrError::invalid_config(format!(
                "recog_unit {:?} needs a model with a character sub-task",
                params.recog_unit.map(|u| u.as_str())
            )));
        }

        let recognizer_bwd = match (self.recognizer_bwd, &self.config.model_bwd_dir) {
            (Some(bwd), _) => Some(bwd),
            (None, Some(dir)) if params.fwd_bwd_attention => {
                let device = select_device(&self.config.device)?;
                let input_dim = recognizer.input_dim();
                let bwd = NestedAttentionSeq2seq::load(dir, self.config.epoch, input_dim, &device)?;
                Some(Box::new(bwd) as Box<dyn Recognizer>)
            }
            _ => None,
        };
        if params.fwd_bwd_attention {
            match &recognizer_bwd {
                Some(bwd) if bwd.unit() != recognizer.unit() => {
                    return Err(AsrError::config_mismatch(format!(
                        "backward model unit '{}' does not match model unit '{}'",
                        bwd.unit(),
                        recognizer.unit()
                    )));
                }
                Some(_) => {}
                None => tracing::warn!("fwd_bwd_attention requested without a backward model"),
            }
        }

        tracing::info!(
            unit = %recognizer.unit(),
            scorer = ?scorer,
            epoch,
            beam_width = params.beam_width,
            batch_size = params.batch_size,
            sets = self.config.eval_sets.len(),
            "evaluator ready"
        );

        Ok(Evaluator::from_parts(EvaluatorParts {
            config: self.config,
            params,
            scorer,
            epoch,
            recognizer,
            recognizer_bwd,
            feature_reader: self
                .feature_reader
                .unwrap_or_else(|| Arc::new(KaldiMatrixReader)),
            header,
        }))
    }
}

fn load_model(
    config: &EvalConfig,
    device: &Device,
    header: &mut Vec<String>,
) -> Result<(NestedAttentionSeq2seq, usize), AsrError> {
    let model_dir = &config.model_dir;
    let (_, epoch) = resolve_checkpoint(model_dir, config.epoch)?;
    let input_dim = first_input_dim(&config.eval_sets[0])?;
    let mut model = NestedAttentionSeq2seq::load(model_dir, Some(epoch as i64), input_dim, device)?;

    let rnnlm_weight = config
        .decode
        .rnnlm_weight
        .or(model.config().decode.rnnlm_weight)
        .unwrap_or(0.0);
    if rnnlm_weight > 0.0 {
        attach_rnnlms(&mut model, config, rnnlm_weight, device, header)?;
    }
    Ok((model, epoch))
}

/// Attaches `--rnnlm` as the forward LM and `--rnnlm_bwd` as the backward
/// one. Each LM's `backward` flag must agree with the option it came from.
fn attach_rnnlms(
    model: &mut NestedAttentionSeq2seq,
    config: &EvalConfig,
    rnnlm_weight: f64,
    device: &Device,
    header: &mut Vec<String>,
) -> Result<(), AsrError> {
    let dirs = [(&config.rnnlm_dir, false), (&config.rnnlm_bwd_dir, true)];
    for (dir, backward) in dirs {
        let Some(dir) = dir else { continue };
        let lm = SeqRnnlm::load(dir, None, device)?;
        if lm.is_backward() != backward {
            let option = if backward { "--rnnlm_bwd" } else { "--rnnlm" };
            return Err(AsrError::config_mismatch(format!(
                "{option} {} has backward: {} in its config.yml",
                dir.display(),
                lm.is_backward()
            )));
        }
        model.attach_rnnlm(lm)?;
        header.push(format!("RNNLM path: {}", dir.display()));
        header.push(format!("RNNLM weight: {rnnlm_weight:.3}"));
        header.push(format!("RNNLM backward: {backward}"));
    }
    Ok(())
}

/// Feature width recorded in the first row of a manifest.
fn first_input_dim(manifest: &Path) -> Result<Option<usize>, AsrError> {
    if !manifest.is_file() {
        return Err(AsrError::missing("read manifest", manifest));
    }
    Ok(read_manifest(manifest)?.first().map(|r| r.x_dim))
}
