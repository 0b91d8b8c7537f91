//! Sentence splitting and numbering. Ordinals are only stable for one
//! analysis pass; any edit invalidates them, so callers re-number before
//! every pass.

const TERMINATORS: &[char] = &['.', '!', '?', '\u{3002}', '\u{ff01}', '\u{ff1f}'];
const CLOSERS: &[char] = &['"', '\'', '\u{201d}', '\u{2019}', '\u{300d}'];

/// Splits text into trimmed, verbatim sentence slices. A sentence ends at a
/// terminator followed by whitespace (trailing closing quotes are pulled into
/// the sentence) or at a line break.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let mut end = idx + ch.len_utf8();
        let terminal = TERMINATORS.contains(&ch);

        if terminal {
            while let Some(&(quote_idx, quote)) = chars.peek() {
                if CLOSERS.contains(&quote) {
                    end = quote_idx + quote.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
        }

        let at_break = ch == '\n'
            || (terminal
                && chars
                    .peek()
                    .map_or(true, |&(_, next)| next.is_whitespace()));

        if at_break {
            let piece = text[start..end].trim();
            if !piece.is_empty() {
                sentences.push(piece);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Renders text with 1-based sentence numbers, one sentence per line. This is
/// the form embedded in detection prompts so providers can report ordinals.
pub fn number_text(text: &str) -> String {
    split_sentences(text)
        .iter()
        .enumerate()
        .map(|(index, sentence)| format!("{}. {}", index + 1, sentence))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminators() {
        let text = "The sky was blue. The sky was blue. It rained.";
        assert_eq!(
            split_sentences(text),
            vec!["The sky was blue.", "The sky was blue.", "It rained."]
        );
    }

    #[test]
    fn keeps_decimal_points_inside_sentences() {
        let text = "The bill came to 3.50 dollars. She paid.";
        assert_eq!(
            split_sentences(text),
            vec!["The bill came to 3.50 dollars.", "She paid."]
        );
    }

    #[test]
    fn pulls_closing_quotes_into_the_sentence() {
        let text = "\"Stop there!\" he said. They stopped.";
        assert_eq!(
            split_sentences(text),
            vec!["\"Stop there!\"", "he said.", "They stopped."]
        );
    }

    #[test]
    fn line_breaks_end_sentences() {
        let text = "A heading without punctuation\nThen a sentence.";
        assert_eq!(
            split_sentences(text),
            vec!["A heading without punctuation", "Then a sentence."]
        );
    }

    #[test]
    fn numbering_is_one_based() {
        let numbered = number_text("First. Second.");
        assert_eq!(numbered, "1. First.\n2. Second.");
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_sentences("   \n  ").is_empty());
        assert_eq!(number_text(""), "");
    }
}
