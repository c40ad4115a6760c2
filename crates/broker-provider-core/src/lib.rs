pub mod errors;
pub mod headers;
pub mod pkce;
pub mod provider;
pub mod registry;

pub use errors::ProviderError;
pub use pkce::Pkce;
pub use provider::{
    AuthKind, HttpMethod, OAuthExchange, ProviderAdapter, ProviderDescriptor, RateLimitInfo,
    UpstreamRequest, UpstreamResponseMeta, UsageInfo,
};
pub use registry::ProviderRegistry;
