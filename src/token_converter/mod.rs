mod character;
mod phone;
pub mod vocab;
mod word;
mod wordpiece;

use std::path::Path;

use crate::config::Unit;
use crate::error::AsrError;

pub use self::character::CharConverter;
pub use self::phone::PhoneConverter;
pub use self::word::WordConverter;
pub use self::wordpiece::WordpieceConverter;
pub use self::vocab::Vocabulary;

/// Bidirectional text <-> id mapping for one unit granularity.
pub trait TokenConverter: Send + Sync {
    fn unit(&self) -> Unit;

    fn vocab(&self) -> &Vocabulary;

    /// Unknown surface tokens map to the `<unk>` id.
    fn encode(&self, text: &str) -> Vec<usize>;

    /// `<unk>` ids render as `<unk>`; blank, eos and pad ids are dropped.
    fn decode(&self, ids: &[usize]) -> String;
}

/// Loads the converter matching `unit`. Wordpiece units need `wp_model`.
pub fn load_converter(
    unit: Unit,
    dict_path: &Path,
    wp_model: Option<&Path>,
) -> Result<Box<dyn TokenConverter>, AsrError> {
    let vocab = Vocabulary::load(dict_path)?;
    Ok(match unit {
        Unit::Word => Box::new(WordConverter::new(vocab, false)),
        Unit::WordChar => Box::new(WordConverter::new(vocab, true)),
        Unit::Char => Box::new(CharConverter::new(vocab)),
        Unit::Phone => Box::new(PhoneConverter::new(vocab)),
        Unit::Wordpiece => {
            let model = wp_model.ok_or_else(|| {
                AsrError::missing("wordpiece model", dict_path.with_file_name("wp.model"))
            })?;
            Box::new(WordpieceConverter::load(vocab, model)?)
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Vocabulary;

    /// `<unk>`, `<eos>`, `<pad>` followed by `tokens` with consecutive ids.
    pub(crate) fn vocab_of(tokens: &[&str]) -> Vocabulary {
        let mut lines = vec!["<unk> 1".to_string(), "<eos> 2".to_string(), "<pad> 3".to_string()];
        for (i, t) in tokens.iter().enumerate() {
            lines.push(format!("{t} {}", i + 4));
        }
        Vocabulary::parse(&lines.join("\n")).unwrap()
    }
}
