pub mod anthropic_oauth;
pub mod compatible;

pub use anthropic_oauth::AnthropicOAuthProvider;
pub use compatible::{CompatibleProvider, CompatibleProviderConfig};
