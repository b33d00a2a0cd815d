use crate::config::Unit;
use crate::token_converter::vocab::{is_silent, Vocabulary, UNK_ID, UNK_TOKEN};
use crate::token_converter::TokenConverter;

pub struct WordConverter {
    vocab: Vocabulary,
    /// Spell OOV words with character ids when every character is known.
    char_fallback: bool,
}

impl WordConverter {
    pub fn new(vocab: Vocabulary, char_fallback: bool) -> Self {
        Self {
            vocab,
            char_fallback,
        }
    }

    fn encode_word(&self, word: &str, out: &mut Vec<usize>) {
        if let Some(id) = self.vocab.id(word) {
            out.push(id);
            return;
        }
        if self.char_fallback {
            let spelled: Option<Vec<usize>> = word
                .chars()
                .map(|c| self.vocab.id(c.encode_utf8(&mut [0u8; 4])))
                .collect();
            if let Some(ids) = spelled {
                out.extend(ids);
                return;
            }
        }
        out.push(UNK_ID);
    }
}

impl TokenConverter for WordConverter {
    fn unit(&self) -> Unit {
        if self.char_fallback {
            Unit::WordChar
        } else {
            Unit::Word
        }
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        let mut ids = Vec::new();
        for word in text.split_whitespace() {
            self.encode_word(word, &mut ids);
        }
        ids
    }

    fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .filter(|&&id| !is_silent(id))
            .map(|&id| self.vocab.token(id).unwrap_or(UNK_TOKEN))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
