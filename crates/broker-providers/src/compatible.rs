//! The shared Anthropic-compatible adapter base: bearer auth, configurable
//! endpoint, no token refresh, optional model-mapping body rewrite.
//! `openai-compatible`, `anthropic-compatible`, `openrouter`, `kilo`, and
//! `zai` are five instances of this one adapter with different configs,
//! rather than one struct per provider tag.

use async_trait::async_trait;
use broker_provider_core::provider::{AuthKind, ProviderDescriptor};
use broker_provider_core::ProviderAdapter;

/// Static per-tag configuration. `name`/`default_base_url` are leaked as
/// `'static` the same way the rest of the descriptor is, since the set of
/// compatible back-ends is fixed at startup.
pub struct CompatibleProviderConfig {
    pub name: &'static str,
    pub default_base_url: &'static str,
    pub auth_kind: AuthKind,
}

pub struct CompatibleProvider {
    descriptor: ProviderDescriptor,
}

impl CompatibleProvider {
    pub fn new(config: CompatibleProviderConfig) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                name: config.name,
                auth_kind: config.auth_kind,
                default_base_url: config.default_base_url,
                supports_streaming: true,
            },
        }
    }

    pub fn openai_compatible() -> Self {
        Self::new(CompatibleProviderConfig {
            name: "openai-compatible",
            default_base_url: "https://api.openai.com",
            auth_kind: AuthKind::Bearer,
        })
    }

    pub fn anthropic_compatible() -> Self {
        Self::new(CompatibleProviderConfig {
            name: "anthropic-compatible",
            default_base_url: "https://api.anthropic.com",
            auth_kind: AuthKind::ApiKeyHeader,
        })
    }

    pub fn openrouter() -> Self {
        Self::new(CompatibleProviderConfig {
            name: "openrouter",
            default_base_url: "https://openrouter.ai/api",
            auth_kind: AuthKind::Bearer,
        })
    }

    pub fn kilo() -> Self {
        Self::new(CompatibleProviderConfig {
            name: "kilo",
            default_base_url: "https://api.kilocode.ai",
            auth_kind: AuthKind::Bearer,
        })
    }

    pub fn zai() -> Self {
        Self::new(CompatibleProviderConfig {
            name: "zai",
            default_base_url: "https://api.z.ai/api/anthropic",
            auth_kind: AuthKind::ApiKeyHeader,
        })
    }
}

#[async_trait]
impl ProviderAdapter for CompatibleProvider {
    fn name(&self) -> &str {
        self.descriptor.name
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, _path: &str) -> bool {
        true
    }
}
