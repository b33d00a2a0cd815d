pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod pipeline;
pub mod token_converter;
pub mod types;

pub use config::{DecodeParams, EvalConfig, ModelConfig, RnnlmConfig, Unit, UsageDecSub};
pub use dataset::{Dataset, DatasetBuilder, TaskSource};
pub use error::AsrError;
pub use evaluation::UnitScorer;
pub use model::{NestedAttentionSeq2seq, SeqRnnlm};
pub use pipeline::builder::EvaluatorBuilder;
pub use pipeline::runtime::{Evaluator, Progress};
pub use pipeline::traits::Recognizer;
pub use token_converter::{load_converter, TokenConverter};
pub use types::{Batch, EvalSummary, FeatureMatrix, Hypothesis, Recognition, SetReport};
