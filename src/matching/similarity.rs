//! Title normalization and string similarity on a 0-100 scale.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PAREN_YEAR: Regex = Regex::new(r"\s*\(\d{4}\)\s*").unwrap();
    static ref LEADING_ARTICLE: Regex = Regex::new(r"^(the|a|an)\s+").unwrap();
    static ref TRAILING_ARTICLE: Regex = Regex::new(r",\s*(the|a|an)$").unwrap();
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Lowercase, drop a parenthesized year, drop a leading or trailing article
/// ("The Dark Knight" and "Dark Knight, The" both become "dark knight"),
/// strip punctuation and collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let without_year = PAREN_YEAR.replace_all(&lowered, " ");
    let trimmed = without_year.trim();
    let without_trailing = TRAILING_ARTICLE.replace(trimmed, "");
    let without_leading = LEADING_ARTICLE.replace(without_trailing.trim(), "");
    let without_punct = NON_WORD.replace_all(&without_leading, "");
    WHITESPACE.replace_all(without_punct.trim(), " ").into_owned()
}

fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Similarity of the two strings after sorting their whitespace tokens, so
/// that word order does not matter.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fn sorted_tokens(s: &str) -> String {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    }
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Best similarity of the shorter string against every equally long window of
/// the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    let long_chars: Vec<char> = long.chars().collect();
    let window = short.chars().count();
    let mut best: f64 = 0.0;
    for start in 0..=(long_chars.len() - window) {
        let candidate: String = long_chars[start..start + window].iter().collect();
        best = best.max(ratio(short, &candidate));
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Title component of the match confidence: the higher of the order-insensitive
/// and the substring similarity of the normalized titles.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    token_sort_ratio(&a, &b).max(partial_ratio(&a, &b))
}
