//! Track matching across catalogs.
//!
//! A source track is compared against the candidates one destination search
//! returned. An ISRC hit wins outright. Otherwise every candidate inside the
//! duration tolerance gets a composite of title and album similarity, and
//! the best one is accepted if it reaches the threshold. Artists are never
//! scored: their spelling and splitting differ too much between platforms.
//!
//! Everything here is pure: no I/O, and results borrow from the candidate slice.

use crate::models::Track;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DURATION_TOLERANCE_MS: u64 = 5000;
pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_TITLE_WEIGHT: f64 = 0.7;
pub const DEFAULT_ALBUM_WEIGHT: f64 = 0.3;

// "(feat. X)", "[ft X]", "(with X)"
static FEATURING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\(\[]\s*(feat\.?|ft\.?|featuring|with)\s[^\)\]]*[\)\]]").expect("valid regex")
});

// "(Remastered 2011)", "- 2011 Remaster", "- Remastered Version"
static REMASTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\(\[][^\)\]]*remaster[^\)\]]*[\)\]]|\s-\s[^-]*remaster[^-]*$").expect("valid regex")
});

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

/// Lower-case, drop featuring credits and remaster suffixes, and reduce
/// punctuation to single spaces.
pub fn normalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let without_credits = FEATURING.replace_all(&lower, " ");
    let without_remaster = REMASTER.replace_all(&without_credits, " ");
    NON_ALNUM
        .replace_all(&without_remaster, " ")
        .trim()
        .to_string()
}

/// Edit-distance similarity in `[0, 1]` over normalized strings.
///
/// Falls back to the raw lower-cased strings when normalization leaves
/// nothing to compare (titles made only of punctuation, for instance).
pub fn similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    if na.is_empty() || nb.is_empty() {
        return strsim::normalized_levenshtein(&a.trim().to_lowercase(), &b.trim().to_lowercase());
    }
    strsim::normalized_levenshtein(&na, &nb)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Inclusive bound on `|source - candidate|` when both durations are known.
    pub duration_tolerance_ms: u64,
    /// Inclusive acceptance bound on the composite score.
    pub threshold: f64,
    pub title_weight: f64,
    pub album_weight: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            duration_tolerance_ms: DEFAULT_DURATION_TOLERANCE_MS,
            threshold: DEFAULT_THRESHOLD,
            title_weight: DEFAULT_TITLE_WEIGHT,
            album_weight: DEFAULT_ALBUM_WEIGHT,
        }
    }
}

/// How an accepted match was decided. Serialized into reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MatchMethod {
    Isrc,
    Fuzzy { score: f64 },
}

/// Outcome of matching one source track against a candidate set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult<'a> {
    ExactByIsrc(&'a Track),
    FuzzyMatch(&'a Track, f64),
    NoMatch,
}

impl<'a> MatchResult<'a> {
    pub fn track(&self) -> Option<&'a Track> {
        match self {
            MatchResult::ExactByIsrc(t) | MatchResult::FuzzyMatch(t, _) => Some(t),
            MatchResult::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        !matches!(self, MatchResult::NoMatch)
    }

    pub fn method(&self) -> Option<MatchMethod> {
        match self {
            MatchResult::ExactByIsrc(_) => Some(MatchMethod::Isrc),
            MatchResult::FuzzyMatch(_, score) => Some(MatchMethod::Fuzzy { score: *score }),
            MatchResult::NoMatch => None,
        }
    }
}

/// A destination track paired with its composite score against a source track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate<'a> {
    pub track: &'a Track,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    options: MatchOptions,
}

impl Matcher {
    pub fn new(options: MatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Pick the best candidate for `source`, or `NoMatch`.
    ///
    /// Ties keep the earliest candidate, so the result follows the
    /// destination's search order.
    pub fn find_match<'a>(&self, source: &Track, candidates: &'a [Track]) -> MatchResult<'a> {
        if let Some(isrc) = source.normalized_isrc() {
            if let Some(hit) = candidates
                .iter()
                .find(|c| c.normalized_isrc().as_deref() == Some(isrc.as_str()))
            {
                return MatchResult::ExactByIsrc(hit);
            }
        }

        let best = self
            .qualifying(source, candidates)
            .into_iter()
            .fold(None::<MatchCandidate<'a>>, |best, c| match best {
                Some(b) if b.score >= c.score => Some(b),
                _ => Some(c),
            });

        match best {
            Some(b) if b.score >= self.options.threshold => MatchResult::FuzzyMatch(b.track, b.score),
            _ => MatchResult::NoMatch,
        }
    }

    /// Strict equivalence used against tracks already in a destination
    /// playlist: equal ISRCs, or identical normalized titles (and albums,
    /// when both are known) within the duration tolerance. Near-miss titles
    /// such as "Part 1" and "Part 2" are different recordings here even when
    /// their fuzzy score clears the threshold.
    pub fn same_recording(&self, source: &Track, existing: &Track) -> bool {
        if let (Some(a), Some(b)) = (source.normalized_isrc(), existing.normalized_isrc()) {
            if a == b {
                return true;
            }
        }
        if !self.duration_ok(source, existing) || normalize(&source.title) != normalize(&existing.title) {
            return false;
        }
        match (non_blank(&source.album), non_blank(&existing.album)) {
            (Some(a), Some(b)) => normalize(a) == normalize(b),
            _ => true,
        }
    }

    /// Candidates that pass the duration filter, scored, in input order.
    pub fn qualifying<'a>(&self, source: &Track, candidates: &'a [Track]) -> Vec<MatchCandidate<'a>> {
        candidates
            .iter()
            .filter_map(|c| self.score(source, c).map(|score| MatchCandidate { track: c, score }))
            .collect()
    }

    /// Unknown durations pass; known ones must be within tolerance.
    pub fn duration_ok(&self, source: &Track, candidate: &Track) -> bool {
        match (source.duration_ms, candidate.duration_ms) {
            (Some(a), Some(b)) => a.abs_diff(b) <= self.options.duration_tolerance_ms,
            _ => true,
        }
    }

    /// Composite score, or `None` when the candidate is disqualified by duration.
    pub fn score(&self, source: &Track, candidate: &Track) -> Option<f64> {
        if !self.duration_ok(source, candidate) {
            return None;
        }
        let title = similarity(&source.title, &candidate.title);
        let albums = (non_blank(&source.album), non_blank(&candidate.album));
        let score = match albums {
            (Some(a), Some(b)) => {
                let o = &self.options;
                (title * o.title_weight + similarity(a, b) * o.album_weight) / (o.title_weight + o.album_weight)
            }
            _ => title,
        };
        Some(score)
    }
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
