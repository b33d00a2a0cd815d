use crate::token_converter::vocab::{is_silent, SPACE_TOKEN, UNK_ID, UNK_TOKEN};
use crate::token_converter::TokenConverter;
use crate::types::Hypothesis;

/// A word spelled by the character decoder and the input frames it attended to.
#[derive(Debug, Clone, PartialEq)]
struct SpelledWord {
    text: String,
    first: usize,
    last: usize,
}

impl SpelledWord {
    fn distance(&self, frame: usize) -> usize {
        if frame < self.first {
            self.first - frame
        } else {
            frame.saturating_sub(self.last)
        }
    }
}

fn spelled_words(chars: &Hypothesis, char_conv: &dyn TokenConverter) -> Vec<SpelledWord> {
    let mut words = Vec::new();
    let mut current: Option<SpelledWord> = None;
    for (i, &id) in chars.ids.iter().enumerate() {
        if is_silent(id) {
            continue;
        }
        let frame = chars.attention_peaks.get(i).copied().unwrap_or(0);
        match char_conv.vocab().token(id) {
            Some(SPACE_TOKEN) => words.extend(current.take()),
            Some(token) if id != UNK_ID => {
                let w = current.get_or_insert_with(|| SpelledWord {
                    text: String::new(),
                    first: frame,
                    last: frame,
                });
                w.text.push_str(token);
                w.first = w.first.min(frame);
                w.last = w.last.max(frame);
            }
            // unknown characters split nothing and spell nothing
            _ => {}
        }
    }
    words.extend(current);
    words
}

/// Renders a word hypothesis, replacing each `<unk>` with the character-level
/// word whose attended frames lie closest to the `<unk>`'s attention peak.
///
/// Both hypotheses carry peaks in input-frame units. Without any spelled word
/// the `<unk>` is kept.
pub fn resolve_unk(
    words: &Hypothesis,
    word_conv: &dyn TokenConverter,
    chars: &Hypothesis,
    char_conv: &dyn TokenConverter,
) -> String {
    let spelled = spelled_words(chars, char_conv);
    let mut out: Vec<String> = Vec::with_capacity(words.ids.len());
    for (i, &id) in words.ids.iter().enumerate() {
        if id != UNK_ID {
            let text = word_conv.decode(&[id]);
            if !text.is_empty() {
                out.push(text);
            }
            continue;
        }
        let peak = words.attention_peaks.get(i).copied().unwrap_or(0);
        let nearest = spelled.iter().min_by_key(|w| w.distance(peak));
        out.push(match nearest {
            Some(w) => w.text.clone(),
            None => UNK_TOKEN.to_string(),
        });
    }
    out.join(" ")
}
