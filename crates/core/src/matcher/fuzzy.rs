//! Order-insensitive edit-distance similarity.

use crate::normalize::{is_article, normalize};

/// Similarity of two free-text strings in `0..=100`.
///
/// Both sides are normalized, stripped of articles and reduced to their
/// sorted tokens before the Levenshtein ratio is taken, so word order does
/// not matter: "King, Stephen" and "Stephen King" score 100, as do
/// "Gunslinger, The" and "The Gunslinger".
///
/// The function is symmetric and `score(a, a) == 100` for every `a`.
pub fn score(candidate: &str, reference: &str) -> u8 {
    ratio(&sort_key(candidate), &sort_key(reference))
}

fn sort_key(text: &str) -> String {
    let normalized = normalize(text);
    let all: Vec<&str> = normalized.split_whitespace().collect();
    // Articles go wherever they sit; a text made only of articles keeps them.
    let mut tokens: Vec<&str> = all.iter().copied().filter(|t| !is_article(t)).collect();
    if tokens.is_empty() {
        tokens = all;
    }
    tokens.sort_unstable();
    tokens.join(" ")
}

/// `100 * (1 - distance / max_len)`, rounded.
fn ratio(a: &str, b: &str) -> u8 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let max_len = len_a.max(len_b);

    if max_len == 0 {
        return 100;
    }
    if len_a == 0 || len_b == 0 {
        return 0;
    }

    let distance = strsim::levenshtein(a, b).min(max_len);
    (((max_len - distance) * 100 + max_len / 2) / max_len) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_scores_100() {
        for s in ["The Gunslinger", "", "....", "Les Misérables", "a"] {
            assert_eq!(score(s, s), 100, "score({:?}, itself)", s);
        }
    }

    #[test]
    fn test_word_order_insensitive() {
        assert_eq!(score("King, Stephen", "Stephen King"), 100);
        assert_eq!(score("Gunslinger, The", "The Gunslinger"), 100);
        assert_eq!(score("Art of War, The", "The Art of War"), 100);
        assert_eq!(score("Stand, The (epub)", "the stand"), 100);
    }

    #[test]
    fn test_articles_only_text_still_compares() {
        assert_eq!(score("The", "the"), 100);
        assert!(score("A", "An") < 100);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            ("The Gunslinger", "the gunslinger sample"),
            ("Dune", "Dune Messiah"),
            ("", "Dune"),
            ("Ender's Game", "Enders Shadow"),
            ("Stephen King", "Steven King"),
        ];
        for (a, b) in pairs {
            assert_eq!(score(a, b), score(b, a), "asymmetric for {:?} / {:?}", a, b);
        }
    }

    #[test]
    fn test_empty_side_scores_zero() {
        assert_eq!(score("", "Dune"), 0);
        assert_eq!(score("(epub)", "Dune"), 0);
    }

    #[test]
    fn test_case_and_accent_insensitive() {
        assert_eq!(score("CAFÉ SOCIETY", "cafe society"), 100);
    }

    #[test]
    fn test_near_misses() {
        let close = score("Steven King", "Stephen King");
        assert!(close >= 80 && close < 100, "got {}", close);

        let subset = score("Dune", "Dune Messiah");
        assert!(subset < 50, "got {}", subset);
    }
}
