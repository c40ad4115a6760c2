//! Composition root for the broker crates. No global singletons:
//! dependencies are constructed once here and passed down by
//! reference/`Arc`, never reached for through a static.

use std::sync::Arc;

use broker_provider_core::ProviderRegistry;
use broker_providers::{AnthropicOAuthProvider, CompatibleProvider};
use broker_storage::{AccountRepository, RequestRepository};

use crate::config::CoreConfig;
use crate::dispatcher::Dispatcher;
use crate::oauth_flow::OAuthFlow;
use crate::token_manager::TokenManager;
use crate::upstream_client::{UpstreamClient, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_TOTAL_TIMEOUT_MS};

pub struct AppContext {
    pub registry: Arc<ProviderRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub oauth_flow: Arc<OAuthFlow>,
    pub config: Arc<CoreConfig>,
}

/// Builds the full dependency graph for one running process: registers the
/// fixed set of provider adapters (Anthropic family only), and assembles
/// the dispatcher over whatever storage the caller has already opened.
/// Storage construction stays in `apps/broker`/`broker-storage` — this
/// crate only knows the repository traits.
pub fn bootstrap(
    accounts: Arc<dyn AccountRepository>,
    requests: Arc<dyn RequestRepository>,
    config: CoreConfig,
    redirect_uri: String,
) -> AppContext {
    let config = Arc::new(config);

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(AnthropicOAuthProvider::new(config.client_id.clone(), redirect_uri)));
    registry.register(Arc::new(CompatibleProvider::anthropic_compatible()));
    registry.register(Arc::new(CompatibleProvider::openai_compatible()));
    registry.register(Arc::new(CompatibleProvider::openrouter()));
    registry.register(Arc::new(CompatibleProvider::kilo()));
    registry.register(Arc::new(CompatibleProvider::zai()));
    let registry = Arc::new(registry);

    let token_manager = Arc::new(TokenManager::new(accounts.clone()));
    let upstream = Arc::new(UpstreamClient::new(DEFAULT_TOTAL_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS));

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        accounts,
        requests,
        token_manager,
        upstream,
        config.clone(),
    ));
    let oauth_flow = Arc::new(OAuthFlow::new());

    AppContext { registry, dispatcher, oauth_flow, config }
}
