mod attention;
pub mod beam;
pub mod checkpoint;
mod decoder;
mod encoder;
mod nested;
mod rnn;
pub mod rnnlm;
pub mod seq2seq;

pub use beam::{beam_search, BeamConfig, StepDecoder, StepOutput};
pub use checkpoint::{available_epochs, checkpoint_path, resolve_checkpoint, select_device};
pub use rnnlm::{LmObservation, LmState, SeqRnnlm};
pub use seq2seq::NestedAttentionSeq2seq;
