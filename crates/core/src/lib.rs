pub mod analysis;
pub mod config;
pub mod executor;
pub mod logging;
pub mod prompts;
pub mod provider;
pub mod revision;
pub mod rules;
pub mod sentence;

pub use analysis::{merge_matches, AnalysisError, PatternAnalyzer, PatternMatch, PatternSpec};
pub use config::{Config, ConfigError, ConfigStore, ProviderConfig, RevisionSettings};
pub use executor::{ExecuteError, ExecutorConfig, ResilientExecutor};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink, VecLogSink,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptTemplate};
pub use provider::{
    Capabilities, Message, Provider, ProviderAdapter, ProviderCallError, QueryReply, QueryRequest,
    Role, Usage,
};
pub use revision::{
    Edit, EditApplier, FilterMode, FixedSelector, RevisionEngine, RevisionError, RevisionOutcome,
    RevisionRecord, Treatment, TreatmentSelector, WorkingText, DELETED_MARKER,
};
pub use rules::{apply_rules, default_output_rules, RewriteRule};
