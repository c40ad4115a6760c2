//! Trivial provider registry: a name-keyed `HashMap` of trait objects,
//! plus `resolve_path` to find the first registered adapter whose
//! `can_handle` returns true.

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ProviderAdapter;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    by_name: HashMap<String, Arc<dyn ProviderAdapter>>,
    /// Registration order, preserved so path resolution is deterministic.
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let name = adapter.name().to_string();
        if !self.by_name.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.by_name.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.by_name.get(name).cloned()
    }

    /// First registered adapter whose `can_handle` accepts this path.
    pub fn resolve_path(&self, path: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .find(|adapter| adapter.can_handle(path))
            .cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AuthKind, ProviderDescriptor};
    use async_trait::async_trait;

    struct Adapter {
        descriptor: ProviderDescriptor,
        handles: &'static str,
    }

    #[async_trait]
    impl ProviderAdapter for Adapter {
        fn name(&self) -> &str {
            self.descriptor.name
        }
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }
        fn can_handle(&self, path: &str) -> bool {
            path.starts_with(self.handles)
        }
    }

    #[test]
    fn get_looks_up_by_name_regardless_of_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Adapter {
            descriptor: ProviderDescriptor {
                name: "a",
                auth_kind: AuthKind::Bearer,
                default_base_url: "",
                supports_streaming: true,
            },
            handles: "/v1",
        }));
        registry.register(Arc::new(Adapter {
            descriptor: ProviderDescriptor {
                name: "b",
                auth_kind: AuthKind::Bearer,
                default_base_url: "",
                supports_streaming: true,
            },
            handles: "/v1/messages",
        }));

        assert_eq!(registry.get("b").unwrap().name(), "b");
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn resolve_path_returns_first_match_in_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Adapter {
            descriptor: ProviderDescriptor {
                name: "a",
                auth_kind: AuthKind::Bearer,
                default_base_url: "",
                supports_streaming: true,
            },
            handles: "/v1",
        }));
        registry.register(Arc::new(Adapter {
            descriptor: ProviderDescriptor {
                name: "b",
                auth_kind: AuthKind::Bearer,
                default_base_url: "",
                supports_streaming: true,
            },
            handles: "/v1/messages",
        }));

        let resolved = registry.resolve_path("/v1/messages").unwrap();
        assert_eq!(resolved.name(), "a");
        assert!(registry.resolve_path("/unrelated").is_none());
    }
}
