use crate::config::Unit;
use crate::token_converter::vocab::{is_silent, Vocabulary, UNK_ID, UNK_TOKEN};
use crate::token_converter::TokenConverter;

pub struct PhoneConverter {
    vocab: Vocabulary,
}

impl PhoneConverter {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }
}

impl TokenConverter for PhoneConverter {
    fn unit(&self) -> Unit {
        Unit::Phone
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        text.split_whitespace()
            .map(|p| self.vocab.id(p).unwrap_or(UNK_ID))
            .collect()
    }

    fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .filter(|&&id| !is_silent(id))
            .map(|&id| self.vocab.token(id).unwrap_or(UNK_TOKEN))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_converter::test_support::vocab_of;

    #[test]
    fn phones_round_trip() {
        let conv = PhoneConverter::new(vocab_of(&["sil", "aa", "k"]));
        let ids = conv.encode("sil k aa sil");
        assert_eq!(ids, vec![4, 6, 5, 4]);
        assert_eq!(conv.decode(&ids), "sil k aa sil");
        assert_eq!(conv.encode("zh"), vec![UNK_ID]);
    }
}
