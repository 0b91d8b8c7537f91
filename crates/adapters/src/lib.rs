mod base_url;
mod error;
mod llm;

pub use base_url::check_base_url;
pub use error::AdapterError;
pub use llm::{create_provider_adapter, create_provider_adapter_from_profile};

pub use prose_core::config::{Config, ConfigStore, ProviderConfig};
pub use prose_core::provider::{ProviderAdapter, ProviderCallError, QueryReply, QueryRequest};
