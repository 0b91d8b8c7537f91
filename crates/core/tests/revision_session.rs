use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use prose_core::{
    merge_matches, AnalysisError, Capabilities, ExecutorConfig, PatternAnalyzer, PatternSpec,
    PromptRegistry, Provider, ProviderAdapter, ProviderCallError, QueryReply, QueryRequest,
    ResilientExecutor, RevisionEngine, RevisionError, Treatment, VecLogSink, DELETED_MARKER,
};

struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ()>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn new<I>(responses: I) -> (Self, Arc<AtomicUsize>)
    where
        I: IntoIterator<Item = Result<&'static str, ()>>,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
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
        match guard.pop_front() {
            Some(Ok(text)) => Ok(QueryReply::new(text)),
            _ => Err(ProviderCallError::Empty),
        }
    }
}

fn scripted(name: &str, responses: Vec<Result<&'static str, ()>>) -> (Provider, Arc<AtomicUsize>) {
    let (adapter, calls) = ScriptedProvider::new(responses);
    (
        Provider::new(name, Box::new(adapter), Capabilities::default()),
        calls,
    )
}

fn executor() -> ResilientExecutor {
    ResilientExecutor::new(ExecutorConfig::immediate())
}

const SOURCE: &str = "The sky was blue. The sky was blue. It rained.";
const DETECT_REPLY: &str =
    r#"[{"match": "The sky was blue", "sentence": "The sky was blue.", "sentence_count": 2}]"#;

#[test]
fn batch_delete_session_produces_expected_text_and_log() {
    let prompts = PromptRegistry::new().expect("built-in prompts parse");
    let sink = VecLogSink::new();
    let engine = RevisionEngine::new(&prompts, executor(), &sink)
        .with_pattern_retry(3, std::time::Duration::ZERO);

    let (provider, _) = scripted("alpha", vec![Ok(DETECT_REPLY)]);
    let mut providers = vec![provider];

    let pattern = PatternSpec::new("repeats", "repeated phrases");
    let outcome = engine
        .revise_batch(SOURCE, &pattern, Treatment::Delete, &mut providers)
        .expect("batch delete succeeds");

    assert_eq!(outcome.text, "The sky was blue. It rained.");
    assert_eq!(outcome.revisions.len(), 1);
    let record = &outcome.revisions[0];
    assert_eq!(record.revised, DELETED_MARKER);
    assert_eq!(record.original, "The sky was blue.");
    assert_eq!(record.sentence_number, 2);
    assert_eq!(record.sequence, 0);
}

#[test]
fn delete_round_trip_leaves_no_matches_for_the_removed_sentence() {
    let prompts = PromptRegistry::new().expect("built-in prompts parse");
    let sink = VecLogSink::new();
    let engine = RevisionEngine::new(&prompts, executor(), &sink)
        .with_pattern_retry(3, std::time::Duration::ZERO);

    let (provider, _) = scripted("alpha", vec![Ok(DETECT_REPLY)]);
    let mut providers = vec![provider];
    let pattern = PatternSpec::new("repeats", "repeated phrases");
    let outcome = engine
        .revise_batch(SOURCE, &pattern, Treatment::Delete, &mut providers)
        .expect("batch delete succeeds");

    // Re-analyze the revised text with a fresh provider; an honest provider
    // reports no occurrences because only one copy of the sentence remains.
    let (provider, _) = scripted("alpha", vec![Ok("[]")]);
    let mut providers = vec![provider];
    let analyzer = PatternAnalyzer::new(&prompts, executor(), &sink);
    let results = analyzer
        .analyze(&outcome.text, &pattern, &mut providers)
        .expect("analysis succeeds");
    assert!(results["alpha"].is_empty());
}

#[test]
fn two_providers_merge_and_dedupe_before_treatment() {
    let prompts = PromptRegistry::new().expect("built-in prompts parse");
    let sink = VecLogSink::new();
    let analyzer = PatternAnalyzer::new(&prompts, executor(), &sink);

    let (alpha, _) = scripted("alpha", vec![Ok(DETECT_REPLY)]);
    let (beta, _) = scripted("beta", vec![Ok(DETECT_REPLY)]);
    let mut providers = vec![alpha, beta];

    let pattern = PatternSpec::new("repeats", "repeated phrases");
    let per_provider = analyzer
        .analyze(SOURCE, &pattern, &mut providers)
        .expect("analysis succeeds");
    assert_eq!(per_provider.len(), 2);

    let merged = merge_matches(&per_provider);
    assert_eq!(merged.len(), 1, "identical (text, ordinal) pairs collapse");
}

#[test]
fn disabled_provider_makes_revision_fail_with_no_active_providers() {
    let prompts = PromptRegistry::new().expect("built-in prompts parse");
    let sink = VecLogSink::new();

    // Provider A fails five consecutive times during analysis and is
    // disabled for the session.
    let (provider, calls) = scripted("a", vec![Err(()); 8]);
    let mut providers = vec![provider];
    let analyzer = PatternAnalyzer::new(&prompts, executor(), &sink);
    let pattern = PatternSpec::new("repeats", "repeated phrases");

    let results = analyzer
        .analyze(SOURCE, &pattern, &mut providers)
        .expect("degraded analysis still returns");
    assert!(results.is_empty(), "provider A contributed nothing");
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(!providers[0].is_enabled());
    assert!(sink.contains("disabling provider `a`"));

    // A subsequent revise call over the same session's provider set fails
    // fast: the only provider is disabled.
    let engine = RevisionEngine::new(&prompts, executor(), &sink)
        .with_pattern_retry(3, std::time::Duration::ZERO);
    let err = engine
        .revise_batch(SOURCE, &pattern, Treatment::Delete, &mut providers)
        .unwrap_err();
    assert!(matches!(
        err,
        RevisionError::Analysis(AnalysisError::NoActiveProviders)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 5, "disabled provider was probed");
}

#[test]
fn empty_pattern_spec_never_touches_the_network() {
    let prompts = PromptRegistry::new().expect("built-in prompts parse");
    let sink = VecLogSink::new();
    let analyzer = PatternAnalyzer::new(&prompts, executor(), &sink);

    let (provider, calls) = scripted("alpha", vec![Ok(DETECT_REPLY)]);
    let mut providers = vec![provider];

    let err = analyzer
        .analyze(SOURCE, &PatternSpec::new("empty", ""), &mut providers)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidPatternSpec(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn degraded_pass_still_returns_the_healthy_providers_matches() {
    let prompts = PromptRegistry::new().expect("built-in prompts parse");
    let sink = VecLogSink::new();
    let analyzer = PatternAnalyzer::new(&prompts, executor(), &sink);

    let (broken, _) = scripted("broken", vec![Err(()); 8]);
    let (healthy, _) = scripted("healthy", vec![Ok(DETECT_REPLY)]);
    let mut providers = vec![broken, healthy];

    let pattern = PatternSpec::new("repeats", "repeated phrases");
    let results = analyzer
        .analyze(SOURCE, &pattern, &mut providers)
        .expect("best-effort analysis succeeds");

    assert!(!results.contains_key("broken"));
    assert_eq!(results["healthy"].len(), 1);
}
