use thiserror::Error;

/// Construction-time failures. Call-time failures are typed as
/// `prose_core::ProviderCallError` so the executor can classify them.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}
