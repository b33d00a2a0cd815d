use std::path::Path;

use crate::config::Unit;
use crate::error::AsrError;
use crate::token_converter::vocab::{is_silent, Vocabulary, UNK_ID, UNK_TOKEN};
use crate::token_converter::TokenConverter;

/// Word-boundary marker prefixed to word-initial pieces.
pub const WORD_BOUNDARY: char = '\u{2581}';

enum Segmenter {
    #[cfg(feature = "sentencepiece")]
    SentencePiece(sentencepiece::SentencePieceProcessor),
    /// Greedy longest match over the dictionary pieces.
    LongestMatch { max_piece_chars: usize },
}

pub struct WordpieceConverter {
    vocab: Vocabulary,
    segmenter: Segmenter,
}

impl WordpieceConverter {
    pub fn load(vocab: Vocabulary, model_path: &Path) -> Result<Self, AsrError> {
        if !model_path.is_file() {
            return Err(AsrError::missing("wordpiece model", model_path));
        }
        #[cfg(feature = "sentencepiece")]
        {
            let spp = sentencepiece::SentencePieceProcessor::open(model_path)
                .map_err(|e| AsrError::runtime("open sentencepiece model", e))?;
            Ok(Self {
                vocab,
                segmenter: Segmenter::SentencePiece(spp),
            })
        }
        #[cfg(not(feature = "sentencepiece"))]
        {
            tracing::debug!(
                model = %model_path.display(),
                "sentencepiece feature disabled; segmenting by longest dictionary match"
            );
            Ok(Self::longest_match(vocab))
        }
    }

    pub fn longest_match(vocab: Vocabulary) -> Self {
        let max_piece_chars = vocab.tokens().map(|t| t.chars().count()).max().unwrap_or(1);
        Self {
            vocab,
            segmenter: Segmenter::LongestMatch { max_piece_chars },
        }
    }

    fn segment_word(&self, word: &[char], max_piece_chars: usize, out: &mut Vec<usize>) {
        let mut start = 0;
        while start < word.len() {
            let longest = (start + 1..=word.len().min(start + max_piece_chars))
                .rev()
                .find_map(|end| {
                    let piece: String = word[start..end].iter().collect();
                    self.vocab.id(&piece).map(|id| (end, id))
                });
            match longest {
                Some((end, id)) => {
                    out.push(id);
                    start = end;
                }
                None => {
                    if out.last() != Some(&UNK_ID) {
                        out.push(UNK_ID);
                    }
                    start += 1;
                }
            }
        }
    }
}

impl TokenConverter for WordpieceConverter {
    fn unit(&self) -> Unit {
        Unit::Wordpiece
    }

    fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        match &self.segmenter {
            #[cfg(feature = "sentencepiece")]
            Segmenter::SentencePiece(spp) => match spp.encode(text) {
                Ok(pieces) => pieces
                    .iter()
                    .map(|p| self.vocab.id(&p.piece).unwrap_or(UNK_ID))
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "sentencepiece encoding failed; emitting <unk>");
                    vec![UNK_ID]
                }
            },
            Segmenter::LongestMatch { max_piece_chars } => {
                let mut ids = Vec::new();
                for word in text.split_whitespace() {
                    let chars: Vec<char> = std::iter::once(WORD_BOUNDARY).chain(word.chars()).collect();
                    self.segment_word(&chars, *max_piece_chars, &mut ids);
                }
                ids
            }
        }
    }

    fn decode(&self, ids: &[usize]) -> String {
        let joined: String = ids
            .iter()
            .filter(|&&id| !is_silent(id))
            .map(|&id| match self.vocab.token(id) {
                Some(token) if id != UNK_ID => token.to_string(),
                _ => format!("{WORD_BOUNDARY}{UNK_TOKEN}"),
            })
            .collect();
        joined.replace(WORD_BOUNDARY, " ").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_converter::test_support::vocab_of;

    fn converter() -> WordpieceConverter {
        WordpieceConverter::longest_match(vocab_of(&["\u{2581}he", "llo", "\u{2581}wor", "ld", "\u{2581}a"]))
    }

    #[test]
    fn longest_match_round_trips_in_vocabulary_text() {
        let conv = converter();
        let ids = conv.encode("hello world");
        assert_eq!(ids, vec![4, 5, 6, 7]);
        assert_eq!(conv.decode(&ids), "hello world");
    }

    #[test]
    fn unmatched_span_becomes_single_unk() {
        let conv = converter();
        assert_eq!(conv.encode("a zz"), vec![8, UNK_ID]);
        assert_eq!(conv.decode(&[8, UNK_ID]), "a <unk>");
    }

    #[test]
    fn missing_model_file_is_missing_resource() {
        let err = WordpieceConverter::load(vocab_of(&[]), Path::new("/nonexistent/wp.model"))
            .err()
            .unwrap();
        assert!(matches!(err, AsrError::MissingResource { .. }));
    }
}
