use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Role of one entry in an ordered chat-style request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One uniform request against any backend: an ordered message list.
#[derive(Clone, Debug, Default)]
pub struct QueryRequest {
    pub messages: Vec<Message>,
}

impl QueryRequest {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
        }
    }

    pub fn with_system(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(prompt)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.iter().all(|m| m.content.trim().is_empty())
    }
}

/// Token counters as reported by a backend. Backends that report nothing
/// leave all fields at zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

#[derive(Clone, Debug)]
pub struct QueryReply {
    pub text: String,
    pub usage: Usage,
}

impl QueryReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
        }
    }
}

/// Failure of a single network round trip. Adapters never retry; they map
/// whatever went wrong into one of these and return it.
#[derive(Debug, Error)]
pub enum ProviderCallError {
    #[error("network request failed: {0}")]
    Network(#[source] Box<dyn StdError + Send + Sync>),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("failed to parse provider response: {0}")]
    Malformed(String),
    #[error("provider returned an empty response")]
    Empty,
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
}

impl ProviderCallError {
    pub fn network<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Network(Box::new(source))
    }
}

/// Uniform interface over one backend. One call is exactly one network
/// round trip; retry and pacing live in the executor.
pub trait ProviderAdapter: Send + Sync {
    fn query(&self, request: &QueryRequest) -> Result<QueryReply, ProviderCallError>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    pub supports_json: bool,
}

/// One backend plus its session state: consecutive-failure counter, enabled
/// flag, and accumulated usage. Built once per session; once disabled it
/// stays disabled for the rest of the session.
pub struct Provider {
    name: String,
    adapter: Box<dyn ProviderAdapter>,
    capabilities: Capabilities,
    consecutive_failures: u32,
    enabled: bool,
    usage: Usage,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        adapter: Box<dyn ProviderAdapter>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            name: name.into(),
            adapter,
            capabilities,
            consecutive_failures: 0,
            enabled: true,
            usage: Usage::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub(crate) fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    pub(crate) fn record_success(&mut self, usage: &Usage) {
        self.consecutive_failures = 0;
        self.usage.accumulate(usage);
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("enabled", &self.enabled)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}
