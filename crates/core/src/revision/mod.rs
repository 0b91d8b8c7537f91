pub mod apply;

pub use apply::{Edit, EditApplier, RevisionRecord, WorkingText, DELETED_MARKER};

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::analysis::{merge_matches, AnalysisError, PatternAnalyzer, PatternMatch, PatternSpec};
use crate::executor::{ExecuteError, ResilientExecutor};
use crate::logging::{LogRecord, LogSink};
use crate::prompts::{PromptArguments, PromptError, PromptRegistry};
use crate::provider::{Provider, QueryRequest};
use crate::rules::{apply_rules, default_output_rules};

const AUTO_REWRITE_INSTRUCTION: &str =
    "Vary the wording naturally so the characteristic disappears.";

const REWRITE_SYSTEM_PROMPT: &str =
    "You are a careful copy editor revising one sentence of a longer draft.";

/// The action applied to one match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Treatment {
    /// Leave the sentence alone. Produces no revision record.
    Keep,
    /// Have the designated provider produce a replacement sentence, with an
    /// optional controller-supplied instruction instead of the automatic one.
    Rewrite(Option<String>),
    /// Remove the sentence entirely.
    Delete,
}

/// How one selected pattern's matches are treated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FilterMode {
    /// One treatment for every match at once.
    Batch(Treatment),
    /// The controller chooses per match.
    Iterative,
}

/// The controller side of the two-level selection state machine. Level 0
/// picks the next pattern (or signals completion with `None`); level 1 picks
/// the mode; in iterative mode the controller is asked per match. Decouples
/// the engine from any particular input surface.
pub trait TreatmentSelector {
    fn next_pattern(&mut self, patterns: &[PatternSpec]) -> Option<usize>;
    fn mode(&mut self, pattern: &PatternSpec) -> FilterMode;
    fn treat(&mut self, candidate: &PatternMatch) -> Treatment;
}

/// Non-interactive form: one predetermined pattern and treatment, one pass,
/// then done.
pub struct FixedSelector {
    treatment: Treatment,
    done: bool,
}

impl FixedSelector {
    pub fn new(treatment: Treatment) -> Self {
        Self {
            treatment,
            done: false,
        }
    }
}

impl TreatmentSelector for FixedSelector {
    fn next_pattern(&mut self, patterns: &[PatternSpec]) -> Option<usize> {
        if self.done || patterns.is_empty() {
            return None;
        }
        self.done = true;
        Some(0)
    }

    fn mode(&mut self, _pattern: &PatternSpec) -> FilterMode {
        FilterMode::Batch(self.treatment.clone())
    }

    fn treat(&mut self, _candidate: &PatternMatch) -> Treatment {
        self.treatment.clone()
    }
}

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("failed to render rewrite prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("selected pattern index {0} is out of range")]
    UnknownPattern(usize),
    #[error("pattern `{pattern}` could not be revised after {attempts} attempts: {source}")]
    PatternExhausted {
        pattern: String,
        attempts: usize,
        #[source]
        source: ExecuteError,
    },
}

#[derive(Debug)]
pub struct RevisionOutcome {
    pub text: String,
    pub revisions: Vec<RevisionRecord>,
}

enum PatternAttemptError {
    /// A rewrite query failed; the whole pattern pass is retried against the
    /// still-unmutated buffer.
    Rewrite(ExecuteError),
    Fatal(RevisionError),
}

/// Drives analyze → merge → select → apply over one working buffer until the
/// controller signals completion.
pub struct RevisionEngine<'a> {
    prompts: &'a PromptRegistry,
    executor: ResilientExecutor,
    sink: &'a dyn LogSink,
    pattern_attempts: usize,
    pattern_retry_delay: Duration,
}

impl<'a> RevisionEngine<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        executor: ResilientExecutor,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            prompts,
            executor,
            sink,
            pattern_attempts: 3,
            pattern_retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_pattern_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.pattern_attempts = attempts.max(1);
        self.pattern_retry_delay = delay;
        self
    }

    /// Runs a full revision session over `source`. The buffer is cloned from
    /// the caller's text, owned exclusively for the session, and handed back
    /// with the append-only revision log.
    pub fn revise(
        &self,
        source: &str,
        patterns: &[PatternSpec],
        providers: &mut [Provider],
        selector: &mut dyn TreatmentSelector,
    ) -> Result<RevisionOutcome, RevisionError> {
        let mut buffer = WorkingText::new(source);
        let mut applier = EditApplier::new();

        while let Some(index) = selector.next_pattern(patterns) {
            let pattern = patterns
                .get(index)
                .ok_or(RevisionError::UnknownPattern(index))?;
            let mode = selector.mode(pattern);
            self.revise_pattern(&mut buffer, &mut applier, pattern, &mode, providers, selector)?;
        }

        Ok(RevisionOutcome {
            text: buffer.into_string(),
            revisions: applier.into_records(),
        })
    }

    /// Single-pass convenience: one pattern, batch mode, one treatment.
    pub fn revise_batch(
        &self,
        source: &str,
        pattern: &PatternSpec,
        treatment: Treatment,
        providers: &mut [Provider],
    ) -> Result<RevisionOutcome, RevisionError> {
        let mut selector = FixedSelector::new(treatment);
        self.revise(source, std::slice::from_ref(pattern), providers, &mut selector)
    }

    fn revise_pattern(
        &self,
        buffer: &mut WorkingText,
        applier: &mut EditApplier,
        pattern: &PatternSpec,
        mode: &FilterMode,
        providers: &mut [Provider],
        selector: &mut dyn TreatmentSelector,
    ) -> Result<(), RevisionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_pattern(buffer, applier, pattern, mode, providers, selector) {
                Ok(()) => return Ok(()),
                Err(PatternAttemptError::Fatal(err)) => return Err(err),
                Err(PatternAttemptError::Rewrite(err)) => {
                    if attempt >= self.pattern_attempts {
                        return Err(RevisionError::PatternExhausted {
                            pattern: pattern.id.clone(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    self.sink.log(LogRecord::warn(format!(
                        "rewrite failed for pattern `{}` ({}); retrying the whole revision attempt",
                        pattern.id, err
                    )));
                    if !self.pattern_retry_delay.is_zero() {
                        thread::sleep(self.pattern_retry_delay);
                    }
                }
            }
        }
    }

    /// One full attempt for one pattern: analyze the current buffer, merge,
    /// gather treatments (including all rewrite replies), then commit edits.
    /// No edit is committed until every provider call has succeeded, so a
    /// retried attempt re-derives the same match set.
    fn attempt_pattern(
        &self,
        buffer: &mut WorkingText,
        applier: &mut EditApplier,
        pattern: &PatternSpec,
        mode: &FilterMode,
        providers: &mut [Provider],
        selector: &mut dyn TreatmentSelector,
    ) -> Result<(), PatternAttemptError> {
        let analyzer = PatternAnalyzer::new(self.prompts, self.executor, self.sink);
        let per_provider = analyzer
            .analyze(buffer.as_str(), pattern, providers)
            .map_err(|err| PatternAttemptError::Fatal(err.into()))?;
        let merged = merge_matches(&per_provider);

        if merged.is_empty() {
            self.sink.log(LogRecord::info(format!(
                "no matches for pattern `{}`",
                pattern.id
            )));
            return Ok(());
        }

        self.sink.log(LogRecord::info(format!(
            "{} match(es) for pattern `{}` after merging",
            merged.len(),
            pattern.id
        )));

        let mut planned: Vec<(PatternMatch, Edit)> = Vec::new();
        for candidate in merged {
            let treatment = match mode {
                FilterMode::Batch(treatment) => treatment.clone(),
                FilterMode::Iterative => selector.treat(&candidate),
            };

            match treatment {
                Treatment::Keep => {}
                Treatment::Delete => planned.push((candidate, Edit::Delete)),
                Treatment::Rewrite(instruction) => {
                    let replacement = self.request_rewrite(
                        pattern,
                        &candidate,
                        instruction.as_deref(),
                        providers,
                    )?;
                    planned.push((candidate, Edit::Rewrite(replacement)));
                }
            }
        }

        for (candidate, edit) in planned {
            applier.apply(buffer, &candidate, edit);
        }
        Ok(())
    }

    fn request_rewrite(
        &self,
        pattern: &PatternSpec,
        candidate: &PatternMatch,
        instruction: Option<&str>,
        providers: &mut [Provider],
    ) -> Result<String, PatternAttemptError> {
        let mut args = PromptArguments::new();
        args.insert("pattern".to_string(), pattern.description.clone());
        args.insert("sentence".to_string(), candidate.sentence.clone());
        args.insert(
            "instruction".to_string(),
            instruction.unwrap_or(AUTO_REWRITE_INSTRUCTION).to_string(),
        );
        let prompt = self
            .prompts
            .format("rewrite", &args)
            .map_err(|err| PatternAttemptError::Fatal(err.into()))?;

        // The rewrite provider is the first still-enabled one.
        let provider = providers
            .iter_mut()
            .find(|p| p.is_enabled())
            .ok_or(PatternAttemptError::Fatal(RevisionError::Analysis(
                AnalysisError::NoActiveProviders,
            )))?;

        let reply = self
            .executor
            .execute(
                provider,
                &QueryRequest::with_system(REWRITE_SYSTEM_PROMPT, prompt),
                self.sink,
            )
            .map_err(PatternAttemptError::Rewrite)?;

        let cleaned = apply_rules(&reply, default_output_rules())
            .trim()
            .to_string();
        if cleaned.is_empty() {
            self.sink.log(LogRecord::warn(format!(
                "rewrite for sentence {} came back empty; keeping the original",
                candidate.sentence_number
            )));
            return Ok(candidate.sentence.clone());
        }
        Ok(cleaned)
    }
}
