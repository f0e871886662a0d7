//! Related-track discovery for autoplay.
//!
//! When a queue drains with autoplay enabled, the manager seeds a search from
//! the last played track. This module owns the pure parts of that pipeline:
//! query building from a noise-stripped title, candidate filtering against a
//! per-guild play history, and the history itself.

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};

use crate::track::Track;

/// How many played identifiers are remembered per guild.
pub const HISTORY_CAP: usize = 50;

/// The most recent slice of the history that blocks repeats.
pub const NO_REPEAT_WINDOW: usize = 25;

/// Enough candidates; stop running further query variants.
pub const CANDIDATE_TARGET: usize = 20;

#[derive(Debug, Default)]
struct GuildHistory {
    ring: VecDeque<String>,
    members: HashSet<String>,
}

/// Per-guild FIFO ring of played track identifiers with set-backed lookups.
#[derive(Debug, Default)]
pub struct AutoplayHistory {
    guilds: DashMap<String, GuildHistory>,
}

impl AutoplayHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers `identifier` for `guild_id`, evicting oldest-first at cap.
    pub fn record(&self, guild_id: &str, identifier: &str) {
        let mut history = self.guilds.entry(guild_id.to_string()).or_default();
        if !history.members.insert(identifier.to_string()) {
            return;
        }
        history.ring.push_back(identifier.to_string());
        while history.ring.len() > HISTORY_CAP {
            if let Some(evicted) = history.ring.pop_front() {
                history.members.remove(&evicted);
            }
        }
    }

    /// The last [`NO_REPEAT_WINDOW`] identifiers played in the guild.
    pub fn recent(&self, guild_id: &str) -> HashSet<String> {
        match self.guilds.get(guild_id) {
            Some(history) => history
                .ring
                .iter()
                .rev()
                .take(NO_REPEAT_WINDOW)
                .cloned()
                .collect(),
            None => HashSet::new(),
        }
    }

    pub fn len(&self, guild_id: &str) -> usize {
        self.guilds.get(guild_id).map_or(0, |h| h.ring.len())
    }

    /// Drops everything remembered for the guild.
    pub fn forget(&self, guild_id: &str) {
        self.guilds.remove(guild_id);
    }
}

const NOISE_TOKENS: &[&str] = &[
    "official", "oficial", "video", "videoclip", "audio", "lyrics", "lyric",
    "visualizer", "remastered", "hd", "hq", "4k", "mv",
];

/// Lowercases a title and strips bracketed segments plus common filler words
/// ("official video", "lyrics", ...) that poison search relevance.
pub fn strip_noise(title: &str) -> String {
    let mut cleaned = String::with_capacity(title.len());
    let mut depth = 0usize;
    for c in title.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(c.to_ascii_lowercase()),
            _ => {}
        }
    }

    cleaned
        .split_whitespace()
        .filter(|word| {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            !NOISE_TOKENS.contains(&word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// YouTube uploads by artist channels carry a " - Topic" author suffix.
fn clean_author(author: &str) -> String {
    author
        .trim_end_matches(" - Topic")
        .trim()
        .to_string()
}

/// Query variants tried in order; the last entry is the broad author
/// fallback. Never empty for a track with a title or an author.
pub fn build_queries(seed: &Track) -> Vec<String> {
    let title = strip_noise(seed.title());
    let author = clean_author(seed.author());

    let mut queries = Vec::new();
    let mut push = |q: String| {
        let q = q.trim().to_string();
        if !q.is_empty() && !queries.contains(&q) {
            queries.push(q);
        }
    };

    if !author.is_empty() && !title.is_empty() {
        push(format!("{author} {title}"));
    }
    push(title);
    // Broader fallback: anything by the same artist.
    push(author);
    queries
}

/// Whether a search hit is usable as an autoplay candidate for `seed`.
///
/// Rejects the seed itself, anything in the recent-play window, streams, and
/// near-duplicates (same cleaned title, or one cleaned title a prefix of the
/// other, which catches remaster/nightcore/sped-up re-uploads).
pub fn is_acceptable(candidate: &Track, seed: &Track, recent: &HashSet<String>) -> bool {
    if candidate.identifier() == seed.identifier() {
        return false;
    }
    if recent.contains(candidate.identifier()) {
        return false;
    }
    if candidate.is_stream() {
        return false;
    }

    let candidate_title = strip_noise(candidate.title());
    let seed_title = strip_noise(seed.title());
    if candidate_title.is_empty() {
        return false;
    }
    if candidate_title == seed_title {
        return false;
    }
    if candidate_title.starts_with(&seed_title) || seed_title.starts_with(&candidate_title) {
        return false;
    }
    true
}

/// Folds one batch of search hits into `candidates`, deduplicating by
/// identifier. Returns true once [`CANDIDATE_TARGET`] is reached.
pub fn collect_candidates(
    candidates: &mut Vec<Track>,
    hits: Vec<Track>,
    seed: &Track,
    recent: &HashSet<String>,
) -> bool {
    for hit in hits {
        if candidates.len() >= CANDIDATE_TARGET {
            break;
        }
        if !is_acceptable(&hit, seed, recent) {
            continue;
        }
        if candidates.iter().any(|c| c.identifier() == hit.identifier()) {
            continue;
        }
        candidates.push(hit);
    }
    candidates.len() >= CANDIDATE_TARGET
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::test_support::track;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_history_evicts_oldest_first() {
        let history = AutoplayHistory::new();
        for i in 0..(HISTORY_CAP + 5) {
            history.record("g", &format!("t{i}"));
        }

        assert_eq!(history.len("g"), HISTORY_CAP);
        let recent = history.recent("g");
        assert_eq!(recent.len(), NO_REPEAT_WINDOW);
        // The newest entry is in the window, evicted and old ones are not.
        assert!(recent.contains(&format!("t{}", HISTORY_CAP + 4)));
        assert!(!recent.contains("t0"));
        assert!(!recent.contains("t10"));
    }

    #[test]
    fn test_history_ignores_duplicates_and_forgets_guilds() {
        let history = AutoplayHistory::new();
        history.record("g", "a");
        history.record("g", "a");
        assert_eq!(history.len("g"), 1);

        history.forget("g");
        assert_eq!(history.len("g"), 0);
        assert!(history.recent("g").is_empty());
    }

    #[test]
    fn test_strip_noise_table() {
        let cases = [
            ("Song Name (Official Video)", "song name"),
            ("Song Name [HD] [Lyrics]", "song name"),
            ("Artist - Track (feat. Someone) Official Audio", "artist - track"),
            ("PLAIN TITLE", "plain title"),
            ("Nested (outer (inner)) rest", "nested rest"),
        ];
        for (input, expected) in cases {
            assert_eq!(strip_noise(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_build_queries_ends_with_author_fallback() {
        let seed = track("id", "Song Name (Official Video)", "Artist - Topic");
        let queries = build_queries(&seed);

        assert_eq!(
            queries,
            vec![
                "Artist song name".to_string(),
                "song name".to_string(),
                "Artist".to_string(),
            ]
        );
    }

    #[test]
    fn test_candidate_exclusion_filters() {
        let seed = track("seed", "Cool Song", "Artist");
        let recent: HashSet<String> = ["recent".to_string()].into();

        // Same identifier as the seed.
        assert!(!is_acceptable(&track("seed", "Other", "x"), &seed, &recent));
        // Recently played.
        assert!(!is_acceptable(&track("recent", "Other", "x"), &seed, &recent));
        // Exact title after noise stripping.
        assert!(!is_acceptable(
            &track("c1", "Cool Song (Official Video)", "y"),
            &seed,
            &recent
        ));
        // Prefix-overlap near-duplicate.
        assert!(!is_acceptable(
            &track("c2", "Cool Song sped up", "y"),
            &seed,
            &recent
        ));
        // A genuinely different track passes.
        assert!(is_acceptable(
            &track("c3", "Another Tune", "y"),
            &seed,
            &recent
        ));
    }

    #[test]
    fn test_collect_candidates_stops_at_target() {
        let seed = track("seed", "Seed Song", "Artist");
        let recent = HashSet::new();
        let mut candidates = Vec::new();

        let hits: Vec<Track> = (0..(CANDIDATE_TARGET + 10))
            .map(|i| track(&format!("c{i}"), &format!("Unique Title {i}"), "a"))
            .collect();

        let full = collect_candidates(&mut candidates, hits, &seed, &recent);
        assert!(full);
        assert_eq!(candidates.len(), CANDIDATE_TARGET);

        // Duplicate identifiers never land twice.
        let mut more = Vec::new();
        collect_candidates(
            &mut more,
            vec![
                track("dup", "Title One", "a"),
                track("dup", "Title One", "a"),
            ],
            &seed,
            &recent,
        );
        assert_eq!(more.len(), 1);
    }
}
