mod merge;

pub use merge::merge_matches;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::executor::{ExecuteError, ResilientExecutor};
use crate::logging::{LogRecord, LogSink};
use crate::prompts::{PromptArguments, PromptError, PromptRegistry};
use crate::provider::{Provider, QueryRequest};
use crate::sentence;

/// A natural-language description of an undesirable textual characteristic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatternSpec {
    pub id: String,
    pub description: String,
}

impl PatternSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// One detected occurrence of a pattern. Ephemeral: the sentence ordinal is
/// only valid against the text that was analyzed, so matches are recomputed
/// after every edit.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub text: String,
    pub sentence: String,
    pub sentence_number: usize,
    pub provider: String,
}

impl PatternMatch {
    /// Constructs a match, rejecting anything below the two-word floor or
    /// with an empty containing sentence.
    pub fn new(
        pattern: impl Into<String>,
        text: impl Into<String>,
        sentence: impl Into<String>,
        sentence_number: usize,
        provider: impl Into<String>,
    ) -> Option<Self> {
        let text = text.into();
        let sentence = sentence.into();
        if text.split_whitespace().count() < 2 || sentence.trim().is_empty() {
            return None;
        }

        Some(Self {
            pattern: pattern.into(),
            text,
            sentence,
            sentence_number,
            provider: provider.into(),
        })
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid pattern specification: {0}")]
    InvalidPatternSpec(String),
    #[error("no enabled providers are available")]
    NoActiveProviders,
    #[error("failed to render analysis prompt: {0}")]
    Prompt(#[from] PromptError),
}

/// Wire shape each provider is instructed to emit.
#[derive(Debug, Deserialize)]
struct RawMatch {
    #[serde(rename = "match")]
    text: String,
    sentence: String,
    #[serde(alias = "sentence_number")]
    sentence_count: usize,
}

/// Asks every enabled provider to locate occurrences of one pattern in a
/// body of text. Structurally invalid replies are re-requested with a
/// stricter directive; a provider that never produces parseable output just
/// contributes nothing for the pass.
pub struct PatternAnalyzer<'a> {
    prompts: &'a PromptRegistry,
    executor: ResilientExecutor,
    sink: &'a dyn LogSink,
}

impl<'a> PatternAnalyzer<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        executor: ResilientExecutor,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            prompts,
            executor,
            sink,
        }
    }

    pub fn analyze(
        &self,
        text: &str,
        pattern: &PatternSpec,
        providers: &mut [Provider],
    ) -> Result<BTreeMap<String, Vec<PatternMatch>>, AnalysisError> {
        if pattern.description.trim().is_empty() {
            return Err(AnalysisError::InvalidPatternSpec(
                "pattern description is empty".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(AnalysisError::InvalidPatternSpec(
                "input text is empty".to_string(),
            ));
        }
        if !providers.iter().any(Provider::is_enabled) {
            return Err(AnalysisError::NoActiveProviders);
        }

        // Ordinals from prior passes are stale, so numbering is redone here.
        let numbered = sentence::number_text(text);

        let mut args = PromptArguments::new();
        args.insert("pattern".to_string(), pattern.description.clone());
        args.insert("text".to_string(), numbered);
        let detect_prompt = self.prompts.format("detect", &args)?;
        let strict_prompt = self.prompts.format("detect_strict", &args)?;

        let mut results = BTreeMap::new();
        for provider in providers.iter_mut().filter(|p| p.is_enabled()) {
            let name = provider.name().to_string();
            match self.analyze_with(provider, pattern, &detect_prompt, &strict_prompt) {
                Ok(matches) => {
                    self.sink.log(LogRecord::info(format!(
                        "provider `{}` reported {} match(es) for pattern `{}`",
                        name,
                        matches.len(),
                        pattern.id
                    )));
                    results.insert(name, matches);
                }
                Err(reason) => {
                    self.sink.log(LogRecord::warn(format!(
                        "provider `{}` contributed nothing this pass: {}",
                        name, reason
                    )));
                }
            }
        }

        Ok(results)
    }

    /// One provider's detection sequence: execute, parse, and on malformed
    /// output re-issue with the strict directive, bounded by the executor's
    /// attempt ceiling. Providers not known to emit structured output
    /// reliably get the strict directive from the first request.
    fn analyze_with(
        &self,
        provider: &mut Provider,
        pattern: &PatternSpec,
        detect_prompt: &str,
        strict_prompt: &str,
    ) -> Result<Vec<PatternMatch>, ProviderPassError> {
        let mut strict = !provider.capabilities().supports_json;
        let mut last_parse_failure = String::new();

        for _ in 0..self.executor.config().max_attempts {
            let prompt = if strict { strict_prompt } else { detect_prompt };
            let reply = self.executor.execute(
                provider,
                &QueryRequest::from_prompt(prompt),
                self.sink,
            )?;

            match parse_matches(&reply, &pattern.id, provider.name()) {
                Ok(matches) => return Ok(matches),
                Err(failure) => {
                    self.sink.log(LogRecord::warn(format!(
                        "provider `{}` returned structurally invalid output ({}); requesting valid structured output only",
                        provider.name(),
                        failure
                    )));
                    last_parse_failure = failure;
                    strict = true;
                }
            }
        }

        Err(ProviderPassError::Unparseable(last_parse_failure))
    }
}

#[derive(Debug, Error)]
enum ProviderPassError {
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error("no parseable structured output after repeated requests: {0}")]
    Unparseable(String),
}

fn parse_matches(
    reply: &str,
    pattern_id: &str,
    provider: &str,
) -> Result<Vec<PatternMatch>, String> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let body = extract_json_array(&cleaned).ok_or_else(|| "no JSON array found".to_string())?;
    let raw: Vec<RawMatch> = serde_json::from_str(body).map_err(|err| err.to_string())?;

    Ok(raw
        .into_iter()
        .filter_map(|entry| {
            PatternMatch::new(
                pattern_id,
                entry.text,
                entry.sentence,
                entry.sentence_count,
                provider,
            )
        })
        .collect())
}

fn extract_json_array(reply: &str) -> Option<&str> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::logging::VecLogSink;
    use crate::provider::{Capabilities, ProviderAdapter, ProviderCallError, QueryReply};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        fn new<I, S>(responses: I) -> (Self, Arc<AtomicUsize>)
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl ProviderAdapter for ScriptedProvider {
        fn query(&self, _request: &QueryRequest) -> Result<QueryReply, ProviderCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.responses.lock().expect("mock mutex poisoned");
            guard
                .pop_front()
                .map(QueryReply::new)
                .ok_or(ProviderCallError::Empty)
        }
    }

    fn provider_from(adapter: ScriptedProvider, name: &str) -> Provider {
        Provider::new(name, Box::new(adapter), Capabilities { supports_json: true })
    }

    fn analyzer_parts() -> (PromptRegistry, ResilientExecutor, VecLogSink) {
        (
            PromptRegistry::new().unwrap(),
            ResilientExecutor::new(ExecutorConfig::immediate()),
            VecLogSink::new(),
        )
    }

    const DETECT_REPLY: &str = r#"[{"match": "The sky was blue", "sentence": "The sky was blue.", "sentence_count": 2}]"#;

    #[test]
    fn analyze_parses_structured_matches() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let (adapter, _) = ScriptedProvider::new([DETECT_REPLY]);
        let mut providers = vec![provider_from(adapter, "alpha")];

        let pattern = PatternSpec::new("repeats", "repeated phrases");
        let results = analyzer
            .analyze(
                "The sky was blue. The sky was blue. It rained.",
                &pattern,
                &mut providers,
            )
            .unwrap();

        let matches = &results["alpha"];
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "The sky was blue");
        assert_eq!(matches[0].sentence_number, 2);
        assert_eq!(matches[0].provider, "alpha");
    }

    #[test]
    fn malformed_reply_triggers_strict_rerequest() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let (adapter, calls) = ScriptedProvider::new(["not json at all", DETECT_REPLY]);
        let mut providers = vec![provider_from(adapter, "alpha")];

        let pattern = PatternSpec::new("repeats", "repeated phrases");
        let results = analyzer
            .analyze(
                "The sky was blue. The sky was blue. It rained.",
                &pattern,
                &mut providers,
            )
            .unwrap();

        assert_eq!(results["alpha"].len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(sink.contains("structurally invalid output"));
    }

    #[test]
    fn persistent_garbage_drops_provider_contribution() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let garbage = std::iter::repeat("still not json").take(10);
        let (adapter, _) = ScriptedProvider::new(garbage);
        let mut providers = vec![provider_from(adapter, "alpha")];

        let pattern = PatternSpec::new("repeats", "repeated phrases");
        let results = analyzer
            .analyze("One sentence here. Another one there.", &pattern, &mut providers)
            .unwrap();

        assert!(results.is_empty());
        assert!(sink.contains("contributed nothing this pass"));
        assert!(providers[0].is_enabled(), "parse failures are not network failures");
    }

    struct RecordingProvider {
        prompts_seen: Arc<Mutex<Vec<String>>>,
    }

    impl ProviderAdapter for RecordingProvider {
        fn query(&self, request: &QueryRequest) -> Result<QueryReply, ProviderCallError> {
            let mut guard = self.prompts_seen.lock().expect("mock mutex poisoned");
            guard.push(
                request
                    .messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
            Ok(QueryReply::new("[]"))
        }
    }

    fn recording_provider(name: &str, supports_json: bool) -> (Provider, Arc<Mutex<Vec<String>>>) {
        let prompts_seen = Arc::new(Mutex::new(Vec::new()));
        (
            Provider::new(
                name,
                Box::new(RecordingProvider {
                    prompts_seen: prompts_seen.clone(),
                }),
                Capabilities { supports_json },
            ),
            prompts_seen,
        )
    }

    #[test]
    fn provider_without_json_support_gets_the_strict_directive_first() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let (provider, seen) = recording_provider("loose", false);
        let mut providers = vec![provider];

        analyzer
            .analyze(
                "The sky was blue. It rained.",
                &PatternSpec::new("repeats", "repeated phrases"),
                &mut providers,
            )
            .unwrap();

        let seen = seen.lock().expect("mock mutex poisoned");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("valid JSON only"));
    }

    #[test]
    fn provider_with_json_support_gets_the_plain_detect_prompt() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let (provider, seen) = recording_provider("structured", true);
        let mut providers = vec![provider];

        analyzer
            .analyze(
                "The sky was blue. It rained.",
                &PatternSpec::new("repeats", "repeated phrases"),
                &mut providers,
            )
            .unwrap();

        let seen = seen.lock().expect("mock mutex poisoned");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("careful copy editor"));
        assert!(!seen[0].contains("valid JSON only"));
    }

    #[test]
    fn empty_pattern_fails_before_any_network_call() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let (adapter, calls) = ScriptedProvider::new([DETECT_REPLY]);
        let mut providers = vec![provider_from(adapter, "alpha")];

        let err = analyzer
            .analyze("Some text here.", &PatternSpec::new("p", "   "), &mut providers)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidPatternSpec(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_text_is_rejected() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);
        let mut providers = Vec::new();

        let err = analyzer
            .analyze("", &PatternSpec::new("p", "clichés"), &mut providers)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidPatternSpec(_)));
    }

    #[test]
    fn all_disabled_is_no_active_providers() {
        let (prompts, executor, sink) = analyzer_parts();
        let analyzer = PatternAnalyzer::new(&prompts, executor, &sink);

        let err = analyzer
            .analyze("Some text here.", &PatternSpec::new("p", "clichés"), &mut [])
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NoActiveProviders));
    }

    #[test]
    fn one_word_matches_are_rejected_at_construction() {
        assert!(PatternMatch::new("p", "single", "A sentence.", 1, "alpha").is_none());
        assert!(PatternMatch::new("p", "two words", "", 1, "alpha").is_none());
        assert!(PatternMatch::new("p", "two words", "A sentence.", 1, "alpha").is_some());
    }

    #[test]
    fn json_array_is_located_inside_prose() {
        let reply = "Here are the matches:\n[{\"match\": \"a b\", \"sentence\": \"A b.\", \"sentence_count\": 1}]\nDone.";
        let matches = parse_matches(reply, "p", "alpha").unwrap();
        assert_eq!(matches.len(), 1);
    }
}
