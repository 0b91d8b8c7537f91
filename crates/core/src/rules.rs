//! Mechanical cleanup applied to model output before it touches the working
//! buffer. Each rule pairs a search pattern with its disposition; the set is
//! evaluated uniformly, in order.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub enum RewriteRule {
    /// Replace every occurrence with a literal.
    Replace { pattern: Regex, replacement: String },
    /// Replace every occurrence through a function of the captures.
    ReplaceWith {
        pattern: Regex,
        rule: fn(&Captures<'_>) -> String,
    },
    /// Remove every occurrence.
    Delete { pattern: Regex },
}

impl RewriteRule {
    pub fn apply(&self, text: &str) -> String {
        match self {
            RewriteRule::Replace {
                pattern,
                replacement,
            } => pattern.replace_all(text, replacement.as_str()).into_owned(),
            RewriteRule::ReplaceWith { pattern, rule } => pattern
                .replace_all(text, |caps: &Captures<'_>| rule(caps))
                .into_owned(),
            RewriteRule::Delete { pattern } => pattern.replace_all(text, "").into_owned(),
        }
    }
}

pub fn apply_rules(text: &str, rules: &[RewriteRule]) -> String {
    rules
        .iter()
        .fold(text.to_string(), |current, rule| rule.apply(&current))
}

fn collapse_whitespace(caps: &Captures<'_>) -> String {
    if caps[0].contains('\n') {
        "\n".to_string()
    } else {
        " ".to_string()
    }
}

static OUTPUT_RULES: Lazy<Vec<RewriteRule>> = Lazy::new(|| {
    vec![
        RewriteRule::Delete {
            pattern: Regex::new(r"```[a-zA-Z]*\n?").expect("valid fence regex"),
        },
        RewriteRule::Replace {
            pattern: Regex::new("[\u{201c}\u{201d}]").expect("valid quote regex"),
            replacement: "\"".to_string(),
        },
        RewriteRule::ReplaceWith {
            pattern: Regex::new(r"\s{2,}").expect("valid whitespace regex"),
            rule: collapse_whitespace,
        },
    ]
});

/// Rules applied to every rewrite reply before it is committed: code fences
/// removed, curly quotes straightened, whitespace runs collapsed.
pub fn default_output_rules() -> &'static [RewriteRule] {
    &OUTPUT_RULES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        let cleaned = apply_rules("```json\nThe sentence.\n```", default_output_rules());
        assert_eq!(cleaned.trim(), "The sentence.");
    }

    #[test]
    fn straightens_curly_quotes() {
        let cleaned = apply_rules("\u{201c}Hello\u{201d} she said.", default_output_rules());
        assert_eq!(cleaned, "\"Hello\" she said.");
    }

    #[test]
    fn collapses_whitespace_runs() {
        let cleaned = apply_rules("one  two\n\n\nthree", default_output_rules());
        assert_eq!(cleaned, "one two\nthree");
    }

    #[test]
    fn rules_apply_in_order() {
        let rules = vec![
            RewriteRule::Replace {
                pattern: Regex::new("aa").expect("valid regex"),
                replacement: "b".to_string(),
            },
            RewriteRule::Delete {
                pattern: Regex::new("b").expect("valid regex"),
            },
        ];
        assert_eq!(apply_rules("aab", &rules), "");
    }
}
