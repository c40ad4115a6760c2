//! Provider-level error type. Distinct from the dispatcher-level error
//! taxonomy in `broker-core::error_taxonomy`: this one is about an adapter
//! failing to do its job (bad config, unsupported operation), not about
//! classifying an upstream HTTP response.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider config invalid or missing for this account: {0}")]
    InvalidConfig(String),

    #[error("provider does not support this operation: {0}")]
    Unsupported(String),

    #[error("oauth exchange failed: {0}")]
    OAuthExchange(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
