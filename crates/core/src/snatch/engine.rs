//! Choosing at most one result per wanted item, and recording the choice.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::library::{LibraryStore, NewSnatch, SearchToken, SnatchOutcome, StoreError, WantedItem};
use crate::matcher::{match_result, MatchScore, MatcherConfig};
use crate::metrics;
use crate::provider::SearchResult;

use super::policy::SnatchPolicy;

/// Book, comic and audio formats recognized in release titles.
const KNOWN_FORMATS: &[&str] = &[
    "epub", "mobi", "azw3", "azw", "pdf", "cbz", "cbr", "djvu", "fb2", "lit", "mp3", "m4b",
];

/// Why a result was not eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum Rejection {
    RejectWord(String),
    TooSmall,
    TooLarge,
    /// A snatch of this locator already failed for the item.
    PreviouslyFailed,
    /// The release format is not one the item accepts.
    FormatNotAccepted(String),
    BelowThreshold,
}

/// A result with the outcome of every policy check.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub result: SearchResult,
    /// Format detected from the title, if any.
    pub format: Option<String>,
    /// Match score, when the result got far enough to be scored.
    pub score: Option<MatchScore>,
    pub rejection: Option<Rejection>,
}

impl RankedResult {
    pub fn is_eligible(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Detect a known format from a release title.
///
/// The last format word wins, so "Title (pdf) [converted].epub" is an epub.
pub fn detect_format(title: &str) -> Option<&'static str> {
    let lowered = title.to_lowercase();
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .rev()
        .find_map(|token| KNOWN_FORMATS.iter().copied().find(|f| *f == token))
}

fn evaluate(
    result: SearchResult,
    wanted: &WantedItem,
    policy: &SnatchPolicy,
    matcher: &MatcherConfig,
) -> RankedResult {
    let format = detect_format(&result.title).map(str::to_string);

    let rejection = if let Some(word) = policy.reject_word_in(&result.title) {
        Some(Rejection::RejectWord(word.to_string()))
    } else if policy.too_small(result.size_bytes) {
        Some(Rejection::TooSmall)
    } else if policy.too_large(result.size_bytes) {
        Some(Rejection::TooLarge)
    } else if policy.excluded_locators.contains(&result.locator) {
        Some(Rejection::PreviouslyFailed)
    } else {
        match format.as_deref() {
            Some(f) if !wanted.accepts_format(f) => Some(Rejection::FormatNotAccepted(f.to_string())),
            _ => None,
        }
    };

    if rejection.is_some() {
        return RankedResult {
            result,
            format,
            score: None,
            rejection,
        };
    }

    let score = match_result(&result.title, wanted, matcher, 0);
    let rejection = match score {
        Some(s) if s.clears(policy.min_score) => None,
        _ => Some(Rejection::BelowThreshold),
    };

    RankedResult {
        result,
        format,
        score,
        rejection,
    }
}

/// Evaluate and order results, most eligible first.
///
/// Eligible results come first, by match score, then preferred format,
/// then size (bigger first). Remaining ties go to the newest post.
pub fn rank_results(
    results: Vec<SearchResult>,
    wanted: &WantedItem,
    policy: &SnatchPolicy,
    matcher: &MatcherConfig,
) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = results
        .into_iter()
        .map(|r| evaluate(r, wanted, policy, matcher))
        .collect();

    ranked.sort_by(|a, b| compare(a, b, policy));
    ranked
}

fn compare(a: &RankedResult, b: &RankedResult, policy: &SnatchPolicy) -> Ordering {
    let score = |r: &RankedResult| r.score.map(|s| s.score).unwrap_or(0);

    b.is_eligible()
        .cmp(&a.is_eligible())
        .then_with(|| score(b).cmp(&score(a)))
        .then_with(|| {
            policy
                .format_rank(a.format.as_deref())
                .cmp(&policy.format_rank(b.format.as_deref()))
        })
        .then_with(|| b.result.size_bytes.cmp(&a.result.size_bytes))
        .then_with(|| b.result.posted_at.cmp(&a.result.posted_at))
}

/// Pick the result to snatch, if any clears every filter.
pub fn decide(
    results: Vec<SearchResult>,
    wanted: &WantedItem,
    policy: &SnatchPolicy,
    matcher: &MatcherConfig,
) -> Option<SearchResult> {
    let considered = results.len();
    let chosen = rank_results(results, wanted, policy, matcher)
        .into_iter()
        .find(RankedResult::is_eligible);

    match &chosen {
        Some(r) => debug!(
            wanted_id = %wanted.id,
            title = %r.result.title,
            score = r.score.map(|s| s.score).unwrap_or(0),
            "Selected result"
        ),
        None => debug!(
            wanted_id = %wanted.id,
            considered = considered,
            "No result cleared the snatch policy"
        ),
    }

    chosen.map(|r| r.result)
}

/// Records snatch decisions through the store's atomic transition.
pub struct SnatchEngine {
    store: Arc<dyn LibraryStore>,
}

impl SnatchEngine {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    /// Move `wanted` to Snatched with `chosen` as its open snatch.
    ///
    /// Safe to call from concurrent cycles: exactly one of them gets
    /// [`SnatchOutcome::Snatched`], the others see `AlreadySnatched` or
    /// `Superseded` and must drop their result.
    pub fn snatch(
        &self,
        wanted: &WantedItem,
        token: SearchToken,
        chosen: &SearchResult,
        client_name: &str,
    ) -> Result<SnatchOutcome, StoreError> {
        let outcome = self.store.try_snatch(
            &wanted.id,
            token,
            NewSnatch {
                result_title: chosen.title.clone(),
                provider: chosen.provider.clone(),
                locator: chosen.locator.clone(),
                media_kind: chosen.media_kind,
                size_bytes: chosen.size_bytes,
                client: client_name.to_string(),
            },
        )?;

        match &outcome {
            SnatchOutcome::Snatched(record) => {
                metrics::SNATCH_DECISIONS.with_label_values(&["snatched"]).inc();
                info!(
                    wanted_id = %wanted.id,
                    snatch_id = %record.id,
                    title = %record.result_title,
                    provider = %record.provider,
                    "Snatched result"
                );
            }
            SnatchOutcome::AlreadySnatched => {
                metrics::SNATCH_DECISIONS
                    .with_label_values(&["already_snatched"])
                    .inc();
                debug!(wanted_id = %wanted.id, "Item was snatched by another cycle");
            }
            SnatchOutcome::Superseded => {
                metrics::SNATCH_DECISIONS.with_label_values(&["superseded"]).inc();
                debug!(wanted_id = %wanted.id, token = token.0, "Newer search cycle already completed");
            }
        }

        Ok(outcome)
    }
}
