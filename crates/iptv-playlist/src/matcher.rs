//! Weighted fuzzy search over playlist entries.
//!
//! Each searchable field is scored with a normalized Levenshtein similarity in
//! `[0, 1]`, taking the better of a whole-field comparison and the best
//! query-sized window of the field (so `"news"` finds `"Alpha News"`). Field
//! scores are scaled by their weight; an entry's score is its best weighted
//! field, with the sum of all weighted fields as tie-breaker.

use strsim::normalized_levenshtein;

use crate::entry::PlaylistEntry;

/// Minimum score an entry needs to be returned at all.
pub const RELEVANCE_FLOOR: f64 = 0.6;

/// Window matches never outrank an equally close whole-field match.
const WINDOW_PENALTY: f64 = 0.9;

/// Relative weight of each searchable field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWeights {
    pub name: f64,
    pub alternate: f64,
    pub group: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            name: 1.0,
            alternate: 0.6,
            group: 0.3,
        }
    }
}

#[derive(Debug)]
struct IndexedEntry {
    name: Vec<char>,
    alternate: Option<Vec<char>>,
    group: Option<Vec<char>>,
}

/// Pre-normalized search fields for a list of entries.
#[derive(Debug)]
pub struct FuzzyIndex {
    docs: Vec<IndexedEntry>,
    weights: MatchWeights,
    floor: f64,
}

impl FuzzyIndex {
    pub fn build(entries: &[PlaylistEntry]) -> Self {
        Self::with_weights(entries, MatchWeights::default(), RELEVANCE_FLOOR)
    }

    pub fn with_weights(entries: &[PlaylistEntry], weights: MatchWeights, floor: f64) -> Self {
        let docs = entries
            .iter()
            .map(|entry| IndexedEntry {
                name: normalize(&entry.name),
                alternate: entry.alternate_name().map(normalize),
                group: entry.group.as_deref().map(normalize),
            })
            .collect();

        Self {
            docs,
            weights,
            floor,
        }
    }

    /// Index and score of the best entry for `query`.
    ///
    /// Returns `None` when the index is empty, the query is blank, or no entry
    /// reaches the relevance floor. Ties keep the earliest entry.
    pub fn best_match(&self, query: &str) -> Option<(usize, f64)> {
        let query = normalize(query);
        if query.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for (idx, doc) in self.docs.iter().enumerate() {
            let (score, total) = self.score(&query, doc);
            let better = match best {
                None => true,
                Some((_, best_score, best_total)) => {
                    score > best_score || (score == best_score && total > best_total)
                }
            };
            if better {
                best = Some((idx, score, total));
            }
        }

        best.filter(|(_, score, _)| *score >= self.floor)
            .map(|(idx, score, _)| (idx, score))
    }

    fn score(&self, query: &[char], doc: &IndexedEntry) -> (f64, f64) {
        let fields = [
            (Some(&doc.name), self.weights.name),
            (doc.alternate.as_ref(), self.weights.alternate),
            (doc.group.as_ref(), self.weights.group),
        ];

        let mut best = 0.0_f64;
        let mut total = 0.0_f64;
        for (field, weight) in fields {
            let Some(field) = field else { continue };
            let weighted = similarity(query, field) * weight;
            best = best.max(weighted);
            total += weighted;
        }
        (best, total)
    }
}

fn normalize(text: &str) -> Vec<char> {
    text.trim().to_lowercase().chars().collect()
}

fn similarity(query: &[char], field: &[char]) -> f64 {
    if field.is_empty() {
        return 0.0;
    }

    let query_str: String = query.iter().collect();
    let whole = normalized_levenshtein(&query_str, &field.iter().collect::<String>());
    if field.len() <= query.len() {
        return whole;
    }

    let window = field
        .windows(query.len())
        .map(|w| normalized_levenshtein(&query_str, &w.iter().collect::<String>()))
        .fold(0.0_f64, f64::max);

    whole.max(window * WINDOW_PENALTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, id: Option<&str>, group: Option<&str>) -> PlaylistEntry {
        let mut entry = PlaylistEntry::new(name, format!("http://example.com/{name}"));
        entry.tvg_id = id.map(str::to_string);
        entry.group = group.map(str::to_string);
        entry
    }

    fn channels() -> Vec<PlaylistEntry> {
        vec![
            entry("Alpha News", Some("news.uk"), Some("News")),
            entry("BBC One", Some("bbc1.uk"), Some("UK")),
            entry("Cartoon Club", None, Some("Kids")),
        ]
    }

    #[test]
    fn exact_name_wins() {
        let index = FuzzyIndex::build(&channels());
        let (idx, score) = index.best_match("BBC One").unwrap();
        assert_eq!(idx, 1);
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn single_typo_still_matches() {
        let index = FuzzyIndex::build(&channels());
        assert_eq!(index.best_match("bbc onr").map(|(i, _)| i), Some(1));
        assert_eq!(index.best_match("Cartone Club").map(|(i, _)| i), Some(2));
    }

    #[test]
    fn substring_of_name_matches() {
        let index = FuzzyIndex::build(&channels());
        assert_eq!(index.best_match("cartoon").map(|(i, _)| i), Some(2));
    }

    #[test]
    fn alternate_id_matches_with_lower_weight() {
        let index = FuzzyIndex::build(&channels());
        let (idx, score) = index.best_match("bbc1.uk").unwrap();
        assert_eq!(idx, 1);
        assert!(score < 1.0);
    }

    #[test]
    fn unrelated_query_is_rejected() {
        let index = FuzzyIndex::build(&channels());
        assert_eq!(index.best_match("zzzzqqq"), None);
    }

    #[test]
    fn group_alone_cannot_clear_the_floor() {
        let index = FuzzyIndex::build(&[entry("Cartoon Club", None, Some("Kids"))]);
        assert_eq!(index.best_match("kids"), None);
    }

    #[test]
    fn blank_query_and_empty_index_match_nothing() {
        assert_eq!(FuzzyIndex::build(&channels()).best_match("   "), None);
        assert_eq!(FuzzyIndex::build(&[]).best_match("anything"), None);
    }

    #[test]
    fn ties_keep_playlist_order() {
        let index = FuzzyIndex::build(&[
            entry("Sports", None, None),
            entry("Sports", None, None),
        ]);
        assert_eq!(index.best_match("sports").map(|(i, _)| i), Some(0));
    }
}
