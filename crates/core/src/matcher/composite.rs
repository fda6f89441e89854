//! Scoring release titles and extracted metadata against wanted items.

use std::collections::{BTreeSet, HashMap};

use super::config::MatcherConfig;
use super::fuzzy::score;
use super::types::{MatchFields, MatchScore};
use crate::library::{ItemKind, WantedItem};
use crate::normalize::{
    normalize, normalize_author, normalize_isbn, strip_leading_article, title_tokens,
};
use crate::postprocess::PartialMetadata;

/// Words release groups add to titles that never belong to a book title.
const FORMAT_WORDS: &[&str] = &[
    "epub", "mobi", "azw", "azw3", "kf8", "pdf", "cbz", "cbr", "djvu", "fb2", "lit", "retail",
    "ebook", "ebooks", "kindle", "repack",
];

const SERIES_WORDS: &[&str] = &["book", "vol", "volume", "part", "series"];

const ISSUE_WORDS: &[&str] = &["issue", "no", "vol", "volume", "edition", "magazine"];

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("february", 2),
    ("feb", 2),
    ("march", 3),
    ("mar", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("june", 6),
    ("jun", 6),
    ("july", 7),
    ("jul", 7),
    ("august", 8),
    ("aug", 8),
    ("september", 9),
    ("sep", 9),
    ("sept", 9),
    ("october", 10),
    ("oct", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

/// Score a raw release title against a wanted item.
///
/// Returns `None` below `threshold`, and for magazine releases whose year or
/// month names contradict the wanted issue date.
pub fn match_result(
    result_title: &str,
    wanted: &WantedItem,
    cfg: &MatcherConfig,
    threshold: u8,
) -> Option<MatchScore> {
    let score = score_release(result_title, wanted, cfg)?;
    score.clears(threshold).then_some(score)
}

/// Score extracted file metadata against a wanted item.
///
/// Equal ISBNs are an exact match. Otherwise the better of a per-field
/// comparison and a comparison of all fields joined as one release-style
/// string is used; the latter copes with filenames whose author and title
/// were split the wrong way round.
pub fn match_metadata(
    meta: &PartialMetadata,
    wanted: &WantedItem,
    cfg: &MatcherConfig,
    threshold: u8,
) -> Option<MatchScore> {
    let isbn_match = match (meta.isbn.as_deref(), wanted.isbn.as_deref()) {
        (Some(a), Some(b)) => normalize_isbn(a).is_some() && normalize_isbn(a) == normalize_isbn(b),
        _ => false,
    };
    if isbn_match {
        return Some(MatchScore::new(100, MatchFields::TitleAuthor));
    }

    let by_fields = meta
        .title
        .as_deref()
        .and_then(|title| score_fields(title, meta.author.as_deref(), meta, wanted, cfg));

    let joined = [
        meta.author.as_deref(),
        meta.title.as_deref(),
        meta.year.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");
    let by_text = if joined.is_empty() {
        None
    } else {
        score_release(&joined, wanted, cfg)
    };

    let best = match (by_fields, by_text) {
        (Some(a), Some(b)) => Some(if b.score > a.score { b } else { a }),
        (a, b) => a.or(b),
    }?;

    best.clears(threshold).then_some(best)
}

/// The highest scoring wanted item for a file, at or above `threshold`.
///
/// Ties go to the item that was wanted first.
pub fn best_match<'a>(
    meta: &PartialMetadata,
    candidates: &'a [WantedItem],
    cfg: &MatcherConfig,
    threshold: u8,
) -> Option<(&'a WantedItem, MatchScore)> {
    candidates
        .iter()
        .filter_map(|item| match_metadata(meta, item, cfg, threshold).map(|s| (item, s)))
        .max_by(|(a, sa), (b, sb)| {
            sa.score
                .cmp(&sb.score)
                .then_with(|| b.created_at.cmp(&a.created_at))
        })
}

/// Tokens of the wanted item that a release may legitimately contain
/// besides the title.
struct WantedTokens {
    title: BTreeSet<String>,
    author: BTreeSet<String>,
    series_name: BTreeSet<String>,
    series_position: Option<String>,
    kind: ItemKind,
    has_series: bool,
}

impl WantedTokens {
    fn of(wanted: &WantedItem) -> Self {
        let series_name = wanted
            .series
            .as_deref()
            .map(|s| {
                let normalized = normalize(s);
                strip_leading_article(&normalized)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title: title_tokens(&wanted.title),
            author: wanted
                .author
                .as_deref()
                .map(|a| {
                    normalize_author(a)
                        .split_whitespace()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            series_name,
            series_position: wanted
                .series_position
                .as_deref()
                .map(|p| normalize(p).trim_start_matches('0').to_string())
                .filter(|p| !p.is_empty()),
            kind: wanted.kind,
            has_series: wanted.series.is_some(),
        }
    }

    fn is_series(&self, token: &str) -> bool {
        if self.series_name.contains(token) {
            return true;
        }
        if self.has_series && SERIES_WORDS.contains(&token) {
            return true;
        }
        match &self.series_position {
            Some(pos) => token.trim_start_matches('0') == pos.as_str(),
            None => false,
        }
    }

    fn is_noise(&self, token: &str) -> bool {
        if FORMAT_WORDS.contains(&token) || is_year(token) {
            return true;
        }
        self.kind == ItemKind::Magazine
            && (month_number(token).is_some()
                || ISSUE_WORDS.contains(&token)
                || token.chars().all(|c| c.is_ascii_digit()))
    }

    fn series_present(&self, tokens: &[String]) -> bool {
        !self.series_name.is_empty() && self.series_name.iter().all(|s| tokens.contains(s))
    }
}

fn score_release(text: &str, wanted: &WantedItem, cfg: &MatcherConfig) -> Option<MatchScore> {
    let normalized = normalize(text);
    let tokens: Vec<String> = normalized.split_whitespace().map(str::to_string).collect();
    let wt = WantedTokens::of(wanted);

    if wanted.kind == ItemKind::Magazine && !issue_date_agrees(&tokens, wanted, &wt) {
        return None;
    }

    let mut budget = token_counts(&wanted.title);
    let title_part: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| match budget.get_mut(*t) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            Some(_) => false,
            None => !(wt.author.contains(*t) || wt.is_series(t) || wt.is_noise(t)),
        })
        .collect();

    let author_part: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !wt.title.contains(*t) && !wt.is_series(t) && !wt.is_noise(t))
        .collect();

    let title_score = score(&title_part.join(" "), &wanted.title);
    let author_score = match wanted.author.as_deref() {
        Some(author) if !author_part.is_empty() => {
            Some(score(&author_part.join(" "), &normalize_author(author)))
        }
        _ => None,
    };

    Some(combine(
        title_score,
        author_score,
        wt.series_present(&tokens),
        wanted,
        cfg,
    ))
}

fn score_fields(
    title: &str,
    author: Option<&str>,
    meta: &PartialMetadata,
    wanted: &WantedItem,
    cfg: &MatcherConfig,
) -> Option<MatchScore> {
    let wt = WantedTokens::of(wanted);

    if wanted.kind == ItemKind::Magazine {
        let dated = [title, meta.year.as_deref().unwrap_or_default()].join(" ");
        let tokens: Vec<String> = normalize(&dated)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if !issue_date_agrees(&tokens, wanted, &wt) {
            return None;
        }
    }

    let tokens: Vec<String> = normalize(title)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let mut budget = token_counts(&wanted.title);
    let cleaned: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| match budget.get_mut(*t) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            Some(_) => false,
            None => !(wt.is_series(t) || wt.is_noise(t)),
        })
        .collect();

    let title_score = score(&cleaned.join(" "), &wanted.title);
    let author_score = match (author, wanted.author.as_deref()) {
        (Some(found), Some(expected)) => {
            Some(score(&normalize_author(found), &normalize_author(expected)))
        }
        _ => None,
    };

    let series_present = match (meta.series.as_deref(), wanted.series.as_deref()) {
        (Some(found), Some(expected)) => score(found, expected) == 100,
        _ => wt.series_present(&tokens),
    };

    Some(combine(title_score, author_score, series_present, wanted, cfg))
}

fn combine(
    title: u8,
    author: Option<u8>,
    series_present: bool,
    wanted: &WantedItem,
    cfg: &MatcherConfig,
) -> MatchScore {
    match author {
        Some(author) => {
            let title_weight = u32::from(cfg.title_weight);
            let author_weight = u32::from(cfg.author_weight);
            let total = title_weight + author_weight;
            let composite = if total == 0 {
                u32::from(title)
            } else {
                (u32::from(title) * title_weight + u32::from(author) * author_weight + total / 2)
                    / total
            };
            let fields = if series_present {
                MatchFields::TitleAuthorSeries
            } else {
                MatchFields::TitleAuthor
            };
            MatchScore::new(composite.min(100) as u8, fields)
        }
        // Magazines have no author, so title-only is their full match.
        None if wanted.kind == ItemKind::Magazine && wanted.author.is_none() => {
            MatchScore::new(title, MatchFields::TitleOnly)
        }
        None => MatchScore::new(
            title.saturating_sub(cfg.missing_author_penalty),
            MatchFields::TitleOnly,
        ),
    }
}

/// Years and month names in the release must agree with the issue date.
fn issue_date_agrees(tokens: &[String], wanted: &WantedItem, wt: &WantedTokens) -> bool {
    let Some(date) = wanted.issue_date.as_deref() else {
        return true;
    };

    let foreign: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !wt.title.contains(*t))
        .collect();

    if let Some(year) = date.get(..4).filter(|y| is_year(y)) {
        let years: Vec<&str> = foreign.iter().copied().filter(|t| is_year(t)).collect();
        if !years.is_empty() && !years.contains(&year) {
            return false;
        }
    }

    if let Some(month) = date.get(5..7).and_then(|m| m.parse::<u32>().ok()) {
        let months: Vec<u32> = foreign.iter().filter_map(|t| month_number(t)).collect();
        if !months.is_empty() && !months.contains(&month) {
            return false;
        }
    }

    true
}

/// Occurrences of each normalized token of a title. A release may repeat a
/// title word (a series name sharing "the"), only the title's own count is
/// kept.
fn token_counts(title: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in normalize(title).split_whitespace() {
        *counts.entry(token.to_string()).or_insert(0) += 1;
    }
    counts
}

fn is_year(token: &str) -> bool {
    token.len() == 4
        && token.chars().all(|c| c.is_ascii_digit())
        && (token.starts_with("18") || token.starts_with("19") || token.starts_with("20"))
}

fn month_number(token: &str) -> Option<u32> {
    MONTHS
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, n)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::WantedStatus;
    use chrono::{Duration, Utc};

    fn wanted(kind: ItemKind, title: &str, author: Option<&str>) -> WantedItem {
        let now = Utc::now();
        WantedItem {
            id: format!("w-{}", title),
            kind,
            title: title.to_string(),
            author: author.map(str::to_string),
            series: None,
            series_position: None,
            isbn: None,
            issue_date: None,
            formats: Vec::new(),
            status: WantedStatus::Wanted,
            file_path: None,
            snatch_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn gunslinger() -> WantedItem {
        wanted(ItemKind::Book, "The Gunslinger", Some("Stephen King"))
    }

    #[test]
    fn test_exact_release_scores_full() {
        let cfg = MatcherConfig::default();
        let m = match_result("Stephen King - The Gunslinger.epub", &gunslinger(), &cfg, 80).unwrap();
        assert_eq!(m.score, 100);
        assert_eq!(m.fields, MatchFields::TitleAuthor);
    }

    #[test]
    fn test_noise_tokens_are_ignored() {
        let cfg = MatcherConfig::default();
        let m = match_result(
            "Stephen King - The Gunslinger (2003) [Retail] EPUB",
            &gunslinger(),
            &cfg,
            80,
        )
        .unwrap();
        assert_eq!(m.score, 100);
    }

    #[test]
    fn test_series_marks_fields() {
        let cfg = MatcherConfig::default();
        let mut item = gunslinger();
        item.series = Some("The Dark Tower".to_string());
        item.series_position = Some("1".to_string());

        let m = match_result(
            "Stephen King - The Dark Tower 01 - The Gunslinger",
            &item,
            &cfg,
            80,
        )
        .unwrap();
        assert_eq!(m.score, 100);
        assert_eq!(m.fields, MatchFields::TitleAuthorSeries);
    }

    #[test]
    fn test_missing_author_applies_penalty() {
        let cfg = MatcherConfig::default();
        let m = match_result("The Gunslinger", &gunslinger(), &cfg, 0).unwrap();
        assert_eq!(m.score, 90);
        assert_eq!(m.fields, MatchFields::TitleOnly);

        let anonymous = wanted(ItemKind::Book, "The Gunslinger", None);
        let m = match_result("Stephen King - The Gunslinger", &anonymous, &cfg, 0).unwrap();
        assert_eq!(m.fields, MatchFields::TitleOnly);
        assert!(m.score < 100);
    }

    #[test]
    fn test_wrong_book_rejected() {
        let cfg = MatcherConfig::default();
        assert!(match_result("Stephen King - The Drawing of the Three", &gunslinger(), &cfg, 80).is_none());
        assert!(match_result("Frank Herbert - Dune Messiah", &wanted(ItemKind::Book, "Dune", Some("Frank Herbert")), &cfg, 80).is_none());
    }

    #[test]
    fn test_garbage_input_never_panics() {
        let cfg = MatcherConfig::default();
        for garbage in ["", "....", "[]()", "\u{0}\u{1}", "🦀🦀🦀"] {
            assert!(match_result(garbage, &gunslinger(), &cfg, 80).is_none());
        }
        let empty = wanted(ItemKind::Book, "", None);
        let _ = match_result("", &empty, &cfg, 0);
    }

    #[test]
    fn test_magazine_issue_date() {
        let cfg = MatcherConfig::default();
        let mut wired = wanted(ItemKind::Magazine, "Wired", None);
        wired.issue_date = Some("2024-05".to_string());

        let m = match_result("Wired - May 2024 (True PDF)", &wired, &cfg, 90);
        assert!(m.is_some(), "same issue should match");
        assert!(match_result("Wired - June 2024", &wired, &cfg, 0).is_none());
        assert!(match_result("Wired - May 2023", &wired, &cfg, 0).is_none());
    }

    #[test]
    fn test_match_metadata_by_isbn() {
        let cfg = MatcherConfig::default();
        let mut item = gunslinger();
        item.isbn = Some("978-0-452-28423-4".to_string());
        let meta = PartialMetadata {
            isbn: Some("0452284236".to_string()),
            ..Default::default()
        };
        let m = match_metadata(&meta, &item, &cfg, 90).unwrap();
        assert_eq!(m.score, 100);
    }

    #[test]
    fn test_match_metadata_swapped_fields() {
        let cfg = MatcherConfig::default();
        // Parsed from "The Gunslinger - Stephen King.epub" as "Author - Title".
        let meta = PartialMetadata {
            title: Some("Stephen King".to_string()),
            author: Some("The Gunslinger".to_string()),
            ..Default::default()
        };
        let m = match_metadata(&meta, &gunslinger(), &cfg, 90).unwrap();
        assert_eq!(m.score, 100);
    }

    #[test]
    fn test_best_match_prefers_score_then_age() {
        let cfg = MatcherConfig::default();
        let meta = PartialMetadata {
            title: Some("The Gunslinger".to_string()),
            author: Some("Stephen King".to_string()),
            ..Default::default()
        };

        let mut older = gunslinger();
        older.id = "older".to_string();
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = gunslinger();
        let other = wanted(ItemKind::Book, "Carrie", Some("Stephen King"));

        let candidates = vec![other, newer, older];
        let (item, m) = best_match(&meta, &candidates, &cfg, 90).unwrap();
        assert_eq!(item.id, "older");
        assert_eq!(m.score, 100);

        let stranger = PartialMetadata {
            title: Some("Moby Dick".to_string()),
            ..Default::default()
        };
        assert!(best_match(&stranger, &candidates, &cfg, 90).is_none());
    }
}
