use crate::error::AsrError;
use crate::types::ErrorCounts;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Match,
    Sub,
    Ins,
    Del,
}

/// Minimum edit-distance alignment of `hypothesis` against `reference`,
/// broken down into substitutions, insertions and deletions.
///
/// Ties prefer a match or substitution over an insertion, and an insertion
/// over a deletion.
pub fn align_counts<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> ErrorCounts {
    let n = reference.len();
    let m = hypothesis.len();
    let width = m + 1;
    let mut cost = vec![0usize; (n + 1) * width];
    let mut ops = vec![Op::Match; (n + 1) * width];
    for i in 1..=n {
        cost[i * width] = i;
        ops[i * width] = Op::Del;
    }
    for j in 1..=m {
        cost[j] = j;
        ops[j] = Op::Ins;
    }
    for i in 1..=n {
        for j in 1..=m {
            let same = reference[i - 1] == hypothesis[j - 1];
            let diag = cost[(i - 1) * width + j - 1] + usize::from(!same);
            let ins = cost[i * width + j - 1] + 1;
            let del = cost[(i - 1) * width + j] + 1;
            let (best, op) = if diag <= ins && diag <= del {
                (diag, if same { Op::Match } else { Op::Sub })
            } else if ins <= del {
                (ins, Op::Ins)
            } else {
                (del, Op::Del)
            };
            cost[i * width + j] = best;
            ops[i * width + j] = op;
        }
    }

    let mut counts = ErrorCounts {
        reference_len: n,
        ..ErrorCounts::default()
    };
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        match ops[i * width + j] {
            Op::Match => {
                i -= 1;
                j -= 1;
            }
            Op::Sub => {
                counts.substitutions += 1;
                i -= 1;
                j -= 1;
            }
            Op::Ins => {
                counts.insertions += 1;
                j -= 1;
            }
            Op::Del => {
                counts.deletions += 1;
                i -= 1;
            }
        }
    }
    counts
}

/// Counts charged when an utterance cannot be aligned: every reference token
/// deleted and every hypothesis token inserted.
pub fn worst_case(reference_len: usize, hypothesis_len: usize) -> ErrorCounts {
    ErrorCounts {
        substitutions: 0,
        insertions: hypothesis_len,
        deletions: reference_len,
        reference_len,
    }
}

/// Scores one utterance. An empty reference or a token containing control
/// characters cannot be aligned and yields [`AsrError::Alignment`].
pub fn score_tokens(reference: &[&str], hypothesis: &[&str]) -> Result<ErrorCounts, AsrError> {
    if reference.is_empty() {
        return Err(AsrError::alignment("empty reference"));
    }
    if let Some(bad) = reference
        .iter()
        .chain(hypothesis)
        .find(|t| t.chars().any(char::is_control))
    {
        return Err(AsrError::alignment(format!(
            "token {bad:?} contains control characters"
        )));
    }
    Ok(align_counts(reference, hypothesis))
}

/// Like [`score_tokens`], but an unalignable utterance is charged the worst case.
pub fn score_or_worst_case(utt_id: &str, reference: &[&str], hypothesis: &[&str]) -> ErrorCounts {
    match score_tokens(reference, hypothesis) {
        Ok(counts) => counts,
        Err(e) => {
            tracing::warn!(utt_id, error = %e, "charging worst-case errors");
            worst_case(reference.len(), hypothesis.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn identical_sequences_have_no_errors() {
        let c = align_counts(&words("a b c"), &words("a b c"));
        assert_eq!(c.errors(), 0);
        assert_eq!(c.reference_len, 3);
    }

    #[test]
    fn breakdown_matches_the_edit_operations() {
        // "b" substituted by "x", "d" inserted, "c" deleted
        let c = align_counts(&words("a b c e"), &words("a x e d"));
        assert_eq!(c.errors(), 3);
        assert_eq!(c.substitutions + c.insertions + c.deletions, 3);

        let c = align_counts(&words("a b c"), &words("a c"));
        assert_eq!((c.substitutions, c.insertions, c.deletions), (0, 0, 1));

        let c = align_counts(&words("a c"), &words("a b c"));
        assert_eq!((c.substitutions, c.insertions, c.deletions), (0, 1, 0));

        let c = align_counts(&words("a b"), &words("a x"));
        assert_eq!((c.substitutions, c.insertions, c.deletions), (1, 0, 0));
    }

    #[test]
    fn empty_hypothesis_deletes_everything() {
        let c = align_counts(&words("a b c"), &[]);
        assert_eq!(c.deletions, 3);
        assert!((c.error_rate() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn characters_align_too() {
        let r: Vec<char> = "kitten".chars().collect();
        let h: Vec<char> = "sitting".chars().collect();
        assert_eq!(align_counts(&r, &h).errors(), 3);
    }

    #[test]
    fn unalignable_input_falls_back_to_worst_case() {
        assert!(matches!(
            score_tokens(&[], &words("a")),
            Err(AsrError::Alignment { .. })
        ));
        assert!(score_tokens(&["a\u{7}"], &["a"]).is_err());
        let c = score_or_worst_case("utt1", &["a\u{7}", "b"], &words("a b c"));
        assert_eq!(c, worst_case(2, 3));
        assert!((c.error_rate() - 250.0).abs() < 1e-12);
    }
}
