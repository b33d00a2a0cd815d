pub mod edit_distance;
mod resolve_unk;
mod scorer;

pub use edit_distance::{align_counts, score_or_worst_case, score_tokens, worst_case};
pub use resolve_unk::resolve_unk;
pub use scorer::{count_oov, CharTask, UnitScorer};
