//! Cross-provider deduplication of search results.

use crate::normalize::normalize;
use crate::snatch::detect_format;

use super::types::SearchResult;

/// Maximum size difference, in percent of the larger size, for two results
/// with the same normalized title to count as the same release.
const SIZE_TOLERANCE_PERCENT: u64 = 1;

/// Whether two results are the same release listed twice.
///
/// Releases in different formats are never duplicates, even when their
/// titles only differ by the extension.
pub fn is_duplicate(a: &SearchResult, b: &SearchResult) -> bool {
    if normalize(&a.title) != normalize(&b.title) {
        return false;
    }
    if detect_format(&a.title) != detect_format(&b.title) {
        return false;
    }
    let larger = a.size_bytes.max(b.size_bytes);
    let diff = a.size_bytes.abs_diff(b.size_bytes);
    diff.saturating_mul(100) <= larger.saturating_mul(SIZE_TOLERANCE_PERCENT)
}

/// Collapse duplicates, keeping the copy from the most reliable provider.
///
/// Input pairs are `(reliability_rank, result)`; lower ranks win and equal
/// ranks keep the copy seen first. Output preserves first-seen order.
pub fn deduplicate(results: Vec<(u32, SearchResult)>) -> Vec<SearchResult> {
    let mut kept: Vec<(u32, SearchResult)> = Vec::with_capacity(results.len());

    for (rank, result) in results {
        match kept.iter_mut().find(|(_, k)| is_duplicate(k, &result)) {
            Some(existing) if rank < existing.0 => *existing = (rank, result),
            Some(_) => {}
            None => kept.push((rank, result)),
        }
    }

    kept.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MediaKind, ResultMetadata};

    fn result(title: &str, provider: &str, size: u64) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            provider: provider.to_string(),
            media_kind: MediaKind::Torrent,
            size_bytes: size,
            posted_at: None,
            locator: format!("{}:{}", provider, title),
            metadata: ResultMetadata::default(),
        }
    }

    #[test]
    fn test_same_title_within_tolerance() {
        let a = result("Stephen King - The Gunslinger.epub", "a", 2_000_000);
        let b = result("stephen king the gunslinger", "b", 2_015_000);
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_size_outside_tolerance() {
        let a = result("The Gunslinger", "a", 2_000_000);
        let b = result("The Gunslinger", "b", 2_100_000);
        assert!(!is_duplicate(&a, &b));
    }

    #[test]
    fn test_format_variants_are_distinct() {
        let epub = result("Stephen King - The Gunslinger.epub", "a", 2_000_000);
        let mobi = result("Stephen King - The Gunslinger.mobi", "a", 2_000_000);
        let pdf = result("Stephen King - The Gunslinger (pdf)", "a", 2_000_000);
        assert!(!is_duplicate(&epub, &mobi));
        assert!(!is_duplicate(&epub, &pdf));

        let deduped = deduplicate(vec![(1, epub), (1, mobi), (1, pdf)]);
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn test_keeps_most_reliable_provider() {
        let deduped = deduplicate(vec![
            (5, result("The Gunslinger", "flaky", 1_000_000)),
            (1, result("The Gunslinger", "solid", 1_005_000)),
            (3, result("Carrie", "middling", 500_000)),
        ]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].provider, "solid");
        assert_eq!(deduped[1].provider, "middling");
    }

    #[test]
    fn test_equal_rank_keeps_first_seen() {
        let deduped = deduplicate(vec![
            (1, result("Dune", "first", 100)),
            (1, result("Dune", "second", 100)),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].provider, "first");
    }
}
