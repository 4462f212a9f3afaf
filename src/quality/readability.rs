//! Flesch reading ease
//!
//! `206.835 - 1.015 * (words / sentences) - 84.6 * (syllables / words)`.
//! Syllables are estimated by counting vowel groups, with a silent trailing
//! `e` discounted and a floor of one per word.

/// Reading ease over pre-split sentences. Returns 0.0 when there are no words.
pub fn flesch_reading_ease<S: AsRef<str>>(sentences: &[S]) -> f64 {
    let mut sentence_count = 0usize;
    let mut words = 0usize;
    let mut syllables = 0usize;

    for sentence in sentences {
        let mut counted = false;
        for word in sentence.as_ref().split_whitespace() {
            let letters: String = word.chars().filter(|c| c.is_alphabetic()).collect();
            if letters.is_empty() {
                continue;
            }
            words += 1;
            syllables += count_syllables(&letters);
            counted = true;
        }
        if counted {
            sentence_count += 1;
        }
    }

    if words == 0 || sentence_count == 0 {
        return 0.0;
    }

    let words_per_sentence = words as f64 / sentence_count as f64;
    let syllables_per_word = syllables as f64 / words as f64;
    206.835 - 1.015 * words_per_sentence - 84.6 * syllables_per_word
}

pub fn count_syllables(word: &str) -> usize {
    let lower = word.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');

    let mut count = 0;
    let mut previous_vowel = false;
    for &c in &chars {
        let vowel = is_vowel(c);
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }

    // silent e: "make", but not "the" or "table"
    if chars.len() > 2 && chars.ends_with(&['e']) && !chars.ends_with(&['l', 'e']) && count > 1 {
        count -= 1;
    }

    count.max(1)
}

/// Advisory guidance for a reading-ease score.
pub fn reading_level_recommendation(score: f64) -> Option<&'static str> {
    if score < 50.0 {
        Some("Simplify language: shorten sentences and prefer common words")
    } else if score > 80.0 {
        Some("Language may be too simple for the audience: add technical depth")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_syllables() {
        assert_eq!(count_syllables("cat"), 1);
        assert_eq!(count_syllables("make"), 1);
        assert_eq!(count_syllables("table"), 2);
        assert_eq!(count_syllables("the"), 1);
        assert_eq!(count_syllables("beautiful"), 3);
        assert_eq!(count_syllables("rhythm"), 1);
    }

    #[test]
    fn test_simple_text_scores_high() {
        let score = flesch_reading_ease(&["The cat sat on the mat.", "It was a good day."]);
        assert!(score > 90.0, "score was {}", score);
    }

    #[test]
    fn test_dense_text_scores_low() {
        let score = flesch_reading_ease(&[
            "Institutional interoperability considerations necessitate comprehensive organizational transformation initiatives.",
        ]);
        assert!(score < 30.0, "score was {}", score);
    }

    #[test]
    fn test_empty_text_scores_zero() {
        let empty: [&str; 0] = [];
        assert_eq!(flesch_reading_ease(&empty), 0.0);
        assert_eq!(flesch_reading_ease(&["[1] ..."]), 0.0);
    }

    #[test]
    fn test_recommendations() {
        assert!(reading_level_recommendation(30.0).is_some());
        assert!(reading_level_recommendation(65.0).is_none());
        assert!(reading_level_recommendation(90.0).is_some());
    }
}
