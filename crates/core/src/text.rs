//! Text utilities shared by the FAQ cache, the sparse retriever and prompt budgeting.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Terms too common to carry retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "de", "del", "do", "el", "en", "es", "for",
    "from", "how", "i", "in", "is", "it", "la", "las", "los", "me", "my", "of", "on", "or", "para",
    "por", "que", "the", "to", "un", "una", "what", "when", "where", "y", "you",
];

/// Combining Diacritical Marks blocks. Only these are folded away; vowel
/// signs and tone marks of abugidas (Thai, Devanagari, ...) change meaning
/// and must survive.
const ACCENT_BLOCKS: &[(char, char)] = &[
    ('\u{0300}', '\u{036F}'),
    ('\u{1AB0}', '\u{1AFF}'),
    ('\u{1DC0}', '\u{1DFF}'),
    ('\u{20D0}', '\u{20FF}'),
    ('\u{FE20}', '\u{FE2F}'),
];

fn is_accent_mark(c: char) -> bool {
    ACCENT_BLOCKS.iter().any(|&(lo, hi)| (lo..=hi).contains(&c))
}

/// Fold a question into its cache key form.
///
/// Lowercases, strips accents, turns punctuation into whitespace and
/// collapses runs of whitespace. `"¿Cuándo  es la Inscripción?"` and
/// `"cuando es la inscripcion"` fold to the same key.
pub fn normalize_question(input: &str) -> String {
    let folded: String = input
        .nfd()
        .filter(|c| !is_accent_mark(*c))
        .nfc()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() || is_combining_mark(c) { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract sparse query terms: normalized, stopwords and single characters removed.
pub fn extract_terms(input: &str) -> Vec<String> {
    normalize_question(input)
        .split(' ')
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Rough token estimate (~4 chars per token) used when no tokenizer count is available.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_accents_and_punctuation() {
        assert_eq!(
            normalize_question("¿Cuándo  es la Inscripción?"),
            "cuando es la inscripcion"
        );
        assert_eq!(
            normalize_question("Deadline for   REGISTRATION!!"),
            "deadline for registration"
        );
    }

    #[test]
    fn normalize_keeps_abugida_vowel_and_tone_marks() {
        // Thai tone marks: "forest", "aunt", and the unmarked syllable.
        let forest = normalize_question("ป่า");
        let aunt = normalize_question("ป้า");
        assert_ne!(forest, aunt);
        assert_ne!(forest, normalize_question("ปา"));
        assert_eq!(forest, "ป่า");

        // Devanagari vowel signs.
        assert_ne!(normalize_question("किताब"), normalize_question("कताब"));
        assert_eq!(normalize_question("किताब"), "किताब");
    }

    #[test]
    fn normalize_still_folds_latin_accents() {
        assert_eq!(normalize_question("Cuándo"), "cuando");
        assert_eq!(normalize_question("Ñandú  Über"), "nandu uber");
        assert_eq!(normalize_question("Thành phố"), "thanh pho");
    }

    #[test]
    fn normalize_empty_and_symbols_only() {
        assert_eq!(normalize_question(""), "");
        assert_eq!(normalize_question("?!... "), "");
    }

    #[test]
    fn extract_terms_drops_stopwords() {
        let terms = extract_terms("What is the deadline for registration?");
        assert_eq!(terms, vec!["deadline", "registration"]);
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
