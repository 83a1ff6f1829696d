use std::collections::HashSet;

const TITLE_WEIGHT: f64 = 0.7;
const SYMPTOM_WEIGHT: f64 = 0.3;

/// Minimum word length considered by [`word_overlap`]; shorter tokens are
/// articles/prepositions and only add noise.
const MIN_OVERLAP_WORD_LEN: usize = 4;

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Title similarity in `[0,1]`: Levenshtein distance over lowercased word
/// tokens, normalized by the longer token count. Two empty titles are
/// identical (distance zero over zero length).
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    let max_len = ta.len().max(tb.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::generic_levenshtein(&ta, &tb);
    1.0 - distance as f64 / max_len as f64
}

/// Jaccard index of two id sets in `[0,1]`; 0 when both sets are empty.
pub fn symptom_similarity(a: &[i64], b: &[i64]) -> f64 {
    let sa: HashSet<i64> = a.iter().copied().collect();
    let sb: HashSet<i64> = b.iter().copied().collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    intersection as f64 / union as f64
}

/// Combined similarity score in `[0,100]`.
///
/// Weighted 70/30 between title and symptom similarity. When neither report
/// carries symptoms the symptom leg says nothing, so the full weight shifts
/// to the title; otherwise identical titles could never reach 100.
pub fn similarity(title_a: &str, title_b: &str, symptoms_a: &[i64], symptoms_b: &[i64]) -> u8 {
    let title = title_similarity(title_a, title_b);
    let combined = if symptoms_a.is_empty() && symptoms_b.is_empty() {
        title
    } else {
        TITLE_WEIGHT * title + SYMPTOM_WEIGHT * symptom_similarity(symptoms_a, symptoms_b)
    };
    (combined * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Word-overlap similarity in `[0,100]`: Jaccard index over words longer
/// than 3 characters. Used for free-text retrieval of prior solutions.
pub fn word_overlap(a: &str, b: &str) -> u8 {
    let sa: HashSet<String> = tokens(a)
        .into_iter()
        .filter(|w| w.chars().count() >= MIN_OVERLAP_WORD_LEN)
        .collect();
    let sb: HashSet<String> = tokens(b)
        .into_iter()
        .filter(|w| w.chars().count() >= MIN_OVERLAP_WORD_LEN)
        .collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0;
    }
    let intersection = sa.intersection(&sb).count();
    ((intersection as f64 / union as f64) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_scores_maximum() {
        assert_eq!(similarity("Motor no arranca", "Motor no arranca", &[], &[]), 100);
        assert_eq!(
            similarity("Motor no arranca", "Motor no arranca", &[1, 2], &[1, 2]),
            100
        );
    }

    #[test]
    fn titles_are_symmetric() {
        let a = "Fuga de aceite en bomba";
        let b = "Fuga de aceite";
        assert_eq!(similarity(a, b, &[1], &[2]), similarity(b, a, &[2], &[1]));
    }

    #[test]
    fn extended_title_stays_above_duplicate_threshold() {
        let score = similarity("Motor no arranca", "Motor no arranca correctamente", &[], &[]);
        assert!(score > 70, "score was {score}");
    }

    #[test]
    fn unrelated_report_is_rejected() {
        let score = similarity("Totalmente diferente", "Motor no arranca", &[5, 6, 7], &[1, 2]);
        assert!(score < 70, "score was {score}");
    }

    #[test]
    fn empty_titles_compare_by_length() {
        assert_eq!(title_similarity("", ""), 1.0);
        assert_eq!(title_similarity("", "motor"), 0.0);
    }

    #[test]
    fn symptom_jaccard_handles_empty_sets() {
        assert_eq!(symptom_similarity(&[], &[]), 0.0);
        assert_eq!(symptom_similarity(&[1, 2], &[1, 2]), 1.0);
        assert_eq!(symptom_similarity(&[1, 2], &[2, 3]), 1.0 / 3.0);
    }

    #[test]
    fn word_overlap_ignores_short_words() {
        // "de" and "en" are too short to count.
        let s = word_overlap("Fuga de aceite en bomba", "bomba con fuga de aceite");
        assert!(s > 50, "overlap was {s}");
        assert_eq!(word_overlap("", ""), 0);
    }
}
