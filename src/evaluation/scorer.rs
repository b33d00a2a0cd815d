use crate::config::Unit;
use crate::error::AsrError;
use crate::evaluation::edit_distance::score_or_worst_case;
use crate::token_converter::Vocabulary;
use crate::types::ErrorCounts;

/// Which decoder output a character-level evaluation reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharTask {
    Main,
    Sub1,
}

/// Unit family scoring, chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitScorer {
    /// WER plus an OOV count of the references.
    Word,
    Wordpiece,
    /// WER and CER.
    Char { task: CharTask },
    Phone,
}

impl UnitScorer {
    /// Resolves scoring from the model unit and an optional `recog_unit`.
    ///
    /// A `recog_unit` equal to the model unit is the same as none. Otherwise
    /// `recog_unit` picks wordpiece or the character sub-task. A phone model
    /// scores PER for any other `recog_unit`; every remaining combination is
    /// [`AsrError::InvalidUnit`].
    pub fn resolve(unit: Unit, recog_unit: Option<Unit>) -> Result<Self, AsrError> {
        let recog = recog_unit.filter(|&r| r != unit);
        match (unit, recog) {
            (Unit::Word | Unit::WordChar, None) => Ok(Self::Word),
            (Unit::Wordpiece, None) | (_, Some(Unit::Wordpiece)) => Ok(Self::Wordpiece),
            (Unit::Char, None) => Ok(Self::Char {
                task: CharTask::Main,
            }),
            (_, Some(r)) if r.mentions_char() => Ok(Self::Char {
                task: CharTask::Sub1,
            }),
            (Unit::Phone, _) => Ok(Self::Phone),
            (unit, Some(r)) => Err(AsrError::invalid_unit(format!(
                "{unit} (recog_unit {r})"
            ))),
        }
    }

    /// Metric names in reporting order.
    pub fn metrics(self) -> &'static [&'static str] {
        match self {
            Self::Word | Self::Wordpiece => &["WER"],
            Self::Char { .. } => &["WER", "CER"],
            Self::Phone => &["PER"],
        }
    }

    pub fn reports_oov(self) -> bool {
        self == Self::Word
    }

    pub fn reads_sub1(self) -> bool {
        self
            == Self::Char {
                task: CharTask::Sub1,
            }
    }

    /// Error counts of one utterance, one entry per [`metrics`](Self::metrics).
    pub fn score(self, utt_id: &str, reference: &str, hypothesis: &str) -> Vec<ErrorCounts> {
        let ref_words: Vec<&str> = reference.split_whitespace().collect();
        let hyp_words: Vec<&str> = hypothesis.split_whitespace().collect();
        let by_words = score_or_worst_case(utt_id, &ref_words, &hyp_words);
        match self {
            Self::Word | Self::Wordpiece | Self::Phone => vec![by_words],
            Self::Char { .. } => {
                let ref_chars = chars_without_spaces(reference);
                let hyp_chars = chars_without_spaces(hypothesis);
                let ref_chars: Vec<&str> = ref_chars.iter().map(String::as_str).collect();
                let hyp_chars: Vec<&str> = hyp_chars.iter().map(String::as_str).collect();
                vec![by_words, score_or_worst_case(utt_id, &ref_chars, &hyp_chars)]
            }
        }
    }
}

fn chars_without_spaces(text: &str) -> Vec<String> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(String::from)
        .collect()
}

/// Reference words missing from `vocab`.
pub fn count_oov(reference: &str, vocab: &Vocabulary) -> usize {
    reference
        .split_whitespace()
        .filter(|w| !vocab.contains(w))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_converter::test_support::vocab_of;

    #[test]
    fn dispatch_follows_unit_and_recog_unit() {
        assert_eq!(UnitScorer::resolve(Unit::Word, None).unwrap(), UnitScorer::Word);
        assert_eq!(UnitScorer::resolve(Unit::WordChar, None).unwrap(), UnitScorer::Word);
        assert_eq!(
            UnitScorer::resolve(Unit::Wordpiece, None).unwrap(),
            UnitScorer::Wordpiece
        );
        assert_eq!(
            UnitScorer::resolve(Unit::Word, Some(Unit::Wordpiece)).unwrap(),
            UnitScorer::Wordpiece
        );
        assert_eq!(
            UnitScorer::resolve(Unit::Char, None).unwrap(),
            UnitScorer::Char {
                task: CharTask::Main
            }
        );
        let sub = UnitScorer::resolve(Unit::Word, Some(Unit::Char)).unwrap();
        assert!(sub.reads_sub1());
        assert_eq!(UnitScorer::resolve(Unit::Phone, None).unwrap(), UnitScorer::Phone);
        assert_eq!(
            UnitScorer::resolve(Unit::Phone, Some(Unit::Word)).unwrap(),
            UnitScorer::Phone
        );
        assert_eq!(
            UnitScorer::resolve(Unit::Word, Some(Unit::Word)).unwrap(),
            UnitScorer::Word
        );
        assert!(matches!(
            UnitScorer::resolve(Unit::Word, Some(Unit::Phone)),
            Err(AsrError::InvalidUnit { .. })
        ));
    }

    #[test]
    fn char_scoring_reports_wer_and_space_free_cer() {
        let scorer = UnitScorer::Char {
            task: CharTask::Main,
        };
        let counts = scorer.score("u1", "ab cd", "ab ce");
        assert_eq!(scorer.metrics(), &["WER", "CER"]);
        assert_eq!(counts[0].substitutions, 1);
        assert_eq!(counts[0].reference_len, 2);
        assert_eq!(counts[1].substitutions, 1);
        assert_eq!(counts[1].reference_len, 4);
    }

    #[test]
    fn oov_counts_reference_words_outside_the_dictionary() {
        let vocab = vocab_of(&["hello", "world"]);
        assert_eq!(count_oov("hello big world again", &vocab), 2);
    }
}
