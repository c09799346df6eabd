//! In-memory provider registry.
//!
//! Read-heavy, writer-rare. The admin API rebuilds entries one at a time
//! after a mutation or a key rotation; a transient in-between state is
//! acceptable because the registry converges on the persisted catalog.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::ProviderConfig;
use crate::llm::{ChatProvider, ProviderKind};

/// Everything the gateway needs to dispatch to one provider.
pub struct ProviderHandle {
    pub provider: Arc<dyn ChatProvider>,
    pub kind: ProviderKind,
    pub default_model: String,
    pub models: Vec<String>,
    /// Retained for the native-proxy path.
    pub config: ProviderConfig,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("kind", &self.kind)
            .field("default_model", &self.default_model)
            .field("models", &self.models)
            .finish()
    }
}

/// Builds a handle from a config without the registry knowing any driver.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> anyhow::Result<ProviderHandle> + Send + Sync>;

/// Map of provider key to handle, behind a reader-writer lock.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<ProviderHandle>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<ProviderHandle>> {
        self.providers.read().get(key).cloned()
    }

    pub fn replace(&self, key: impl Into<String>, handle: ProviderHandle) {
        self.providers.write().insert(key.into(), Arc::new(handle));
    }

    pub fn remove(&self, key: &str) {
        self.providers.write().remove(key);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRequest, LlmResponse};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    struct NullProvider;

    #[async_trait]
    impl ChatProvider for NullProvider {
        async fn chat(&self, _req: ChatRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse::default())
        }
    }

    fn handle(model: &str) -> ProviderHandle {
        ProviderHandle {
            provider: Arc::new(NullProvider),
            kind: ProviderKind::OpenAi,
            default_model: model.to_string(),
            models: vec![],
            config: ProviderConfig {
                kind: ProviderKind::OpenAi,
                api_key: None,
                base_url: None,
                model: model.to_string(),
                models: vec![],
                extra_headers: StdHashMap::new(),
                proxy: None,
            },
        }
    }

    #[test]
    fn replace_get_remove() {
        let registry = ProviderRegistry::new();
        assert!(registry.get("openai").is_none());

        registry.replace("openai", handle("gpt-4o"));
        assert_eq!(registry.get("openai").unwrap().default_model, "gpt-4o");

        registry.replace("openai", handle("gpt-4.1"));
        assert_eq!(registry.get("openai").unwrap().default_model, "gpt-4.1");

        registry.remove("openai");
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let registry = ProviderRegistry::new();
        registry.replace("b", handle("m"));
        registry.replace("a", handle("m"));
        assert_eq!(registry.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
