use crate::config::Unit;
use crate::token_converter::vocab::{is_silent, Vocabulary, SPACE_TOKEN, UNK_ID, UNK_TOKEN};
use crate::token_converter::TokenConverter;

pub struct CharConverter {
    vocab: Vocabulary,
    space_id: Option<usize>,
}

impl CharConverter {
    pub fn new(vocab: Vocabulary) -> Self {
        let space_id = vocab.id(SPACE_TOKEN);
        Self { vocab, space_id }
    }
}

impl TokenConverter for CharConverter {
    fn unit(&self) -> Unit {
        Unit::Char
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        let mut buf = [0u8; 4];
        text.trim()
            .chars()
            .map(|c| {
                if c == ' ' {
                    self.space_id.unwrap_or(UNK_ID)
                } else {
                    self.vocab.id(c.encode_utf8(&mut buf)).unwrap_or(UNK_ID)
                }
            })
            .collect()
    }

    fn decode(&self, ids: &[usize]) -> String {
        let mut out = String::new();
        for &id in ids.iter().filter(|&&id| !is_silent(id)) {
            match self.vocab.token(id) {
                Some(SPACE_TOKEN) => out.push(' '),
                Some(token) if id != UNK_ID => out.push_str(token),
                _ => out.push_str(UNK_TOKEN),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_converter::test_support::vocab_of;

    #[test]
    fn spaces_use_the_space_token() {
        let conv = CharConverter::new(vocab_of(&["a", "b", "<space>"]));
        let ids = conv.encode("ab ba");
        assert_eq!(ids, vec![4, 5, 6, 5, 4]);
        assert_eq!(conv.decode(&ids), "ab ba");
    }

    #[test]
    fn unknown_char_is_unk() {
        let conv = CharConverter::new(vocab_of(&["a"]));
        assert_eq!(conv.encode("az"), vec![4, UNK_ID]);
        assert_eq!(conv.decode(&[4, UNK_ID]), "a<unk>");
    }
}
