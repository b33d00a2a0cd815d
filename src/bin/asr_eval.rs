use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use nested_asr::config::DecodeOverrides;
use nested_asr::{AsrError, EvalConfig, EvaluatorBuilder, Progress};
use tracing_subscriber::EnvFilter;

#[path = "asr_eval/json_summary_formatter.rs"]
mod json_summary_formatter;

#[derive(Debug, Parser)]
#[command(name = "asr_eval")]
#[command(about = "Decode evaluation sets with a nested attention model and report WER/CER")]
struct Args {
    /// Directory holding config.yml, the dictionaries and model checkpoints.
    #[arg(long, env = "ASR_EVAL_MODEL_DIR")]
    model: PathBuf,
    /// Backward model used with --fwd_bwd_attention.
    #[arg(long = "model_bwd")]
    model_bwd: Option<PathBuf>,
    /// Checkpoint epoch; -1 picks the latest one.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    epoch: i64,
    #[arg(long = "decode_dir", env = "ASR_EVAL_DECODE_DIR")]
    decode_dir: PathBuf,
    /// Manifest CSV files, evaluated in the given order.
    #[arg(long = "eval_sets", num_args = 1.., required = true)]
    eval_sets: Vec<PathBuf>,
    #[arg(long = "batch_size")]
    batch_size: Option<usize>,
    #[arg(long = "beam_width")]
    beam_width: Option<usize>,
    #[arg(long = "max_len_ratio")]
    max_len_ratio: Option<f64>,
    #[arg(long = "min_len_ratio")]
    min_len_ratio: Option<f64>,
    #[arg(long = "length_penalty")]
    length_penalty: Option<f64>,
    #[arg(long = "coverage_penalty")]
    coverage_penalty: Option<f64>,
    #[arg(long = "coverage_threshold")]
    coverage_threshold: Option<f64>,
    #[arg(long = "rnnlm_weight")]
    rnnlm_weight: Option<f64>,
    #[arg(long)]
    rnnlm: Option<PathBuf>,
    #[arg(long = "rnnlm_bwd")]
    rnnlm_bwd: Option<PathBuf>,
    #[arg(long = "resolving_unk", num_args = 0..=1, default_missing_value = "true")]
    resolving_unk: Option<bool>,
    #[arg(long = "fwd_bwd_attention", num_args = 0..=1, default_missing_value = "true")]
    fwd_bwd_attention: Option<bool>,
    /// Overrides the scoring unit (word, wp, char, phone, ...).
    #[arg(long = "recog_unit")]
    recog_unit: Option<String>,
    #[arg(long, env = "ASR_EVAL_DEVICE", default_value = "cpu")]
    device: String,
    /// Also write a JSON summary here.
    #[arg(long, env = "ASR_EVAL_OUT")]
    out: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> (EvalConfig, Option<PathBuf>) {
        let config = EvalConfig {
            model_dir: self.model,
            model_bwd_dir: self.model_bwd,
            epoch: Some(self.epoch),
            decode_dir: self.decode_dir,
            eval_sets: self.eval_sets,
            rnnlm_dir: self.rnnlm,
            rnnlm_bwd_dir: self.rnnlm_bwd,
            device: self.device,
            decode: DecodeOverrides {
                batch_size: self.batch_size,
                beam_width: self.beam_width,
                max_len_ratio: self.max_len_ratio,
                min_len_ratio: self.min_len_ratio,
                length_penalty: self.length_penalty,
                coverage_penalty: self.coverage_penalty,
                coverage_threshold: self.coverage_threshold,
                rnnlm_weight: self.rnnlm_weight,
                resolving_unk: self.resolving_unk,
                fwd_bwd_attention: self.fwd_bwd_attention,
                recog_unit: self.recog_unit,
            },
        };
        (config, self.out)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!(fatal = err.is_fatal(), "{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AsrError> {
    let (config, out_path) = Args::parse().into_config();
    let model_path = config.model_dir.display().to_string();
    let device = config.device.clone();
    let evaluator = EvaluatorBuilder::new(config).build()?;

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    let summary = evaluator.run_with(|event| match event {
        Progress::SetStarted {
            set_name,
            n_utterances,
        } => {
            progress.reset();
            progress.set_length(n_utterances as u64);
            progress.set_message(set_name.to_string());
        }
        Progress::UtteranceDone => progress.inc(1),
        Progress::SetFinished { set_name } => {
            progress.println(format!("finished {set_name}"));
        }
    });
    progress.finish_and_clear();
    let summary = summary?;

    for (metric, value) in &summary.means {
        println!("{metric} (mean): {value:.3} %");
    }

    if let Some(path) = out_path {
        let meta = json_summary_formatter::Meta {
            generated_at: Utc::now().to_rfc3339(),
            model_path,
            device,
            epoch: summary.epoch,
        };
        json_summary_formatter::write_summary(&path, meta, &summary)?;
        tracing::info!(path = %path.display(), "wrote JSON summary");
    }
    Ok(())
}
