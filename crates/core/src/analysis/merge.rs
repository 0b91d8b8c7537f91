//! Merging of per-provider match sets. Pure and idempotent: the same inputs
//! always merge to the same output.

use std::collections::BTreeMap;

use super::PatternMatch;

/// Unions per-provider match lists, starting from the first available
/// provider's list and appending each remaining provider's matches.
/// Duplicates share both the matched text and the sentence ordinal; the
/// first occurrence wins. The result is stable-sorted by ordinal, so
/// same-ordinal matches keep their order of appearance.
pub fn merge_matches(per_provider: &BTreeMap<String, Vec<PatternMatch>>) -> Vec<PatternMatch> {
    let mut merged: Vec<PatternMatch> = Vec::new();

    for matches in per_provider.values() {
        for candidate in matches {
            let duplicate = merged.iter().any(|seen| {
                seen.text == candidate.text && seen.sentence_number == candidate.sentence_number
            });
            if !duplicate {
                merged.push(candidate.clone());
            }
        }
    }

    merged.sort_by_key(|m| m.sentence_number);
    merged
}
