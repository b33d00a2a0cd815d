use crate::config::{DecodeOverrides, DecodeParams, Unit};
use crate::error::AsrError;
use crate::types::{FeatureMatrix, Recognition};

/// An end-to-end recognizer as seen by the evaluation driver.
pub trait Recognizer: Send + Sync {
    /// Output unit of the main task.
    fn unit(&self) -> Unit;

    /// Unit of the sub-task hypothesis returned in [`Recognition::sub1`], if any.
    fn sub1_unit(&self) -> Option<Unit> {
        None
    }

    /// Feature dimension the recognizer was trained on, when known.
    fn input_dim(&self) -> Option<usize> {
        None
    }

    /// Decoding options stored with the model, used below explicit overrides.
    fn stored_decode(&self) -> DecodeOverrides {
        DecodeOverrides::default()
    }

    /// Decodes one utterance.
    fn decode(&self, xs: &FeatureMatrix, params: &DecodeParams) -> Result<Recognition, AsrError>;

    /// Log-likelihood of `ids` followed by `<eos>` given `xs`.
    fn score_sequence(&self, xs: &FeatureMatrix, ids: &[usize]) -> Result<f64, AsrError>;
}
