//! Gatehouse API - LLM gateway and workflow orchestrator.
//!
//! One OpenAI-compatible HTTP surface (chat completions, model listing)
//! routed across configurable upstream vendors - OpenAI-compatible,
//! Anthropic, Gemini, Vertex - with request/response translation, SSE
//! streaming, per-token access scopes, a native pass-through proxy, and a
//! thought-signature cache that keeps Gemini tool-calling sessions
//! coherent. Alongside it, a small workflow engine runs graphs fired by
//! HTTP webhooks or cron schedules.
//!
//! # Architecture
//!
//! - [`config`]: configuration loading
//! - [`store`]: SQLite catalog with encryption at rest
//! - [`llm`]: provider capability trait, registry, and drivers
//! - [`gateway`]: auth, routing, chat dispatch, streaming, native proxy
//! - [`api`]: admin CRUD the core consumes
//! - [`runs`]: active-run supervision and cancellation
//! - [`scheduler`] / [`cluster`]: leader-gated cron over optional gossip
//! - [`webhooks`]: HTTP trigger dispatch
//! - [`workflow`]: engine entry and node-handler seam

pub mod api;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logging;
pub mod runs;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod webhooks;
pub mod workflow;

use std::sync::Arc;

use cluster::Cluster;
use config::AppConfig;
use gateway::auth::Authenticator;
use llm::registry::{ProviderFactory, ProviderRegistry};
use llm::signatures::SignatureCache;
use runs::RunSupervisor;
use store::Store;
use workflow::Engine;

/// Application state shared across all handlers.
///
/// The registry, signature cache, active-run table, and the
/// authenticator's throttle are the only process-wide mutable state the
/// core owns; everything else is immutable after startup or lives in the
/// store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub registry: Arc<ProviderRegistry>,
    pub signatures: Arc<SignatureCache>,
    pub authenticator: Arc<Authenticator>,
    pub runs: RunSupervisor,
    pub engine: Arc<Engine>,
    pub cluster: Option<Arc<Cluster>>,
    pub factory: ProviderFactory,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("runs", &self.runs)
            .field("cluster", &self.cluster.is_some())
            .finish()
    }
}

impl AppState {
    /// Rebuild the registry entry for one provider from the store.
    pub async fn reload_provider(&self, key: &str) -> anyhow::Result<()> {
        match self.store.get_provider(key).await? {
            Some(record) => {
                let handle = (self.factory)(&record.config)?;
                self.registry.replace(key, handle);
            }
            None => self.registry.remove(key),
        }
        Ok(())
    }

    /// Rebuild every registry entry from the store. Entry by entry, not an
    /// atomic swap; the registry is eventually consistent with the catalog.
    pub async fn reload_providers(&self) -> anyhow::Result<()> {
        let records = self.store.list_providers().await?;
        let mut seen: Vec<String> = Vec::with_capacity(records.len());

        for record in records {
            match (self.factory)(&record.config) {
                Ok(handle) => {
                    self.registry.replace(record.key.clone(), handle);
                    seen.push(record.key);
                }
                Err(err) => {
                    tracing::error!(
                        provider = %record.key,
                        error = %err,
                        "failed to build provider handle"
                    );
                }
            }
        }

        for key in self.registry.keys() {
            if !seen.contains(&key) {
                self.registry.remove(&key);
            }
        }
        Ok(())
    }
}
