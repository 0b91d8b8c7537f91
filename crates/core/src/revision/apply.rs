use serde::{Deserialize, Serialize};

use crate::analysis::PatternMatch;

/// Marker recorded in place of replacement text when a sentence is removed.
pub const DELETED_MARKER: &str = "[DELETED]";

/// The concrete buffer mutation for one match. `Keep` never reaches the
/// applier; the engine skips it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Edit {
    Rewrite(String),
    Delete,
}

/// One entry in the append-only revision log. Sentence ordinals are valid
/// only at capture time; the log is never re-numbered against the buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub pattern: String,
    pub match_text: String,
    pub sentence_number: usize,
    pub original: String,
    pub revised: String,
    pub sequence: usize,
}

/// The single mutable text buffer for one revision session. Cloned from the
/// caller's source at session start and handed back at session end; `&mut`
/// access is the single-writer invariant.
#[derive(Debug)]
pub struct WorkingText {
    text: String,
}

impl WorkingText {
    pub fn new(source: &str) -> Self {
        Self {
            text: source.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Replaces the first literal occurrence of `needle`. Ordinals are
    /// pre-edit, so addressing is by substring, not by sentence number.
    fn replace_first(&mut self, needle: &str, replacement: &str) -> bool {
        match self.text.find(needle) {
            Some(position) => {
                self.text
                    .replace_range(position..position + needle.len(), replacement);
                true
            }
            None => false,
        }
    }

    /// Removes the first literal occurrence of `needle` and tidies the
    /// whitespace seam the removal leaves behind.
    fn remove_first(&mut self, needle: &str) -> bool {
        let position = match self.text.find(needle) {
            Some(position) => position,
            None => return false,
        };
        self.text.replace_range(position..position + needle.len(), "");

        // Removing the last sentence leaves the preceding separator with
        // nothing after it; trim it away instead of merging a seam.
        if position == self.text.len() {
            let trimmed = self.text.trim_end().len();
            self.text.truncate(trimmed);
            return true;
        }

        let after_is_space = self.text[position..]
            .chars()
            .next()
            .map_or(false, char::is_whitespace);
        let before_is_space = position == 0
            || self.text[..position]
                .chars()
                .next_back()
                .map_or(false, char::is_whitespace);

        if after_is_space && before_is_space {
            let width = self.text[position..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(0);
            self.text.replace_range(position..position + width, "");
        }
        true
    }
}

/// Applies treatments to the working buffer and keeps the immutable revision
/// log. Must be driven strictly sequentially; the `&mut` receiver and buffer
/// make a second concurrent writer unrepresentable.
#[derive(Debug, Default)]
pub struct EditApplier {
    records: Vec<RevisionRecord>,
}

impl EditApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[RevisionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RevisionRecord> {
        self.records
    }

    /// Executes one edit against the buffer and appends a record. Returns
    /// `None` when the sentence is no longer present (an earlier edit in the
    /// same pass already consumed it), in which case nothing is recorded.
    pub fn apply(
        &mut self,
        buffer: &mut WorkingText,
        candidate: &PatternMatch,
        edit: Edit,
    ) -> Option<&RevisionRecord> {
        let applied = match &edit {
            Edit::Rewrite(replacement) => buffer.replace_first(&candidate.sentence, replacement),
            Edit::Delete => buffer.remove_first(&candidate.sentence),
        };
        if !applied {
            return None;
        }

        let revised = match edit {
            Edit::Rewrite(replacement) => replacement,
            Edit::Delete => DELETED_MARKER.to_string(),
        };

        self.records.push(RevisionRecord {
            pattern: candidate.pattern.clone(),
            match_text: candidate.text.clone(),
            sentence_number: candidate.sentence_number,
            original: candidate.sentence.clone(),
            revised,
            sequence: self.records.len(),
        });
        self.records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(sentence: &str, ordinal: usize) -> PatternMatch {
        PatternMatch::new("repeats", "the sky", sentence, ordinal, "alpha")
            .expect("test match must satisfy construction rules")
    }

    #[test]
    fn delete_removes_first_occurrence_and_tidies_whitespace() {
        let mut buffer = WorkingText::new("The sky was blue. The sky was blue. It rained.");
        let mut applier = EditApplier::new();

        let record = applier
            .apply(
                &mut buffer,
                &candidate("The sky was blue.", 2),
                Edit::Delete,
            )
            .expect("sentence is present");

        assert_eq!(buffer.as_str(), "The sky was blue. It rained.");
        assert_eq!(record.revised, DELETED_MARKER);
        assert_eq!(record.original, "The sky was blue.");
        assert_eq!(record.sentence_number, 2);
    }

    #[test]
    fn delete_in_the_middle_leaves_single_space() {
        let mut buffer = WorkingText::new("First part. Middle bit here. Last part.");
        let mut applier = EditApplier::new();

        applier
            .apply(
                &mut buffer,
                &candidate("Middle bit here.", 2),
                Edit::Delete,
            )
            .expect("sentence is present");
        assert_eq!(buffer.as_str(), "First part. Last part.");
    }

    #[test]
    fn delete_at_the_end_strips_the_preceding_separator() {
        let mut buffer = WorkingText::new("The sky was blue. It rained.");
        let mut applier = EditApplier::new();

        applier
            .apply(&mut buffer, &candidate("It rained.", 2), Edit::Delete)
            .expect("sentence is present");
        assert_eq!(buffer.as_str(), "The sky was blue.");
    }

    #[test]
    fn rewrite_replaces_sentence_in_place() {
        let mut buffer = WorkingText::new("It was a dark and stormy night. Rain fell.");
        let mut applier = EditApplier::new();

        let record = applier
            .apply(
                &mut buffer,
                &candidate("It was a dark and stormy night.", 1),
                Edit::Rewrite("Storm clouds pressed low over the town.".to_string()),
            )
            .expect("sentence is present");

        assert_eq!(
            buffer.as_str(),
            "Storm clouds pressed low over the town. Rain fell."
        );
        assert_eq!(record.revised, "Storm clouds pressed low over the town.");
    }

    #[test]
    fn missing_sentence_records_nothing() {
        let mut buffer = WorkingText::new("Only this sentence.");
        let mut applier = EditApplier::new();

        let result = applier.apply(&mut buffer, &candidate("Gone already.", 1), Edit::Delete);
        assert!(result.is_none());
        assert!(applier.records().is_empty());
        assert_eq!(buffer.as_str(), "Only this sentence.");
    }

    #[test]
    fn sequence_numbers_follow_log_order() {
        let mut buffer = WorkingText::new("One here. Two here. Three here.");
        let mut applier = EditApplier::new();

        applier.apply(&mut buffer, &candidate("One here.", 1), Edit::Delete);
        applier.apply(&mut buffer, &candidate("Three here.", 3), Edit::Delete);

        let sequences: Vec<usize> = applier.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(buffer.as_str(), "Two here.");
    }
}
