//! Core domain models persisted by the store or held by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::llm::ProviderKind;

/// Configuration for one upstream provider, as persisted by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// API key for the upstream vendor. Encrypted at rest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override. Defaults per provider type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Default model when the caller routes to the bare provider key.
    pub model: String,
    /// Optional allow-list. Non-empty gates which model IDs are accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    /// Extra headers forwarded on every upstream request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_headers: HashMap<String, String>,
    /// Optional HTTP proxy URL for upstream calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl ProviderConfig {
    /// Base URL with the per-type default applied.
    pub fn base_url_or_default(&self) -> String {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.kind.default_base_url().to_string())
    }

    /// Whether `model` is accepted for this provider.
    ///
    /// An empty allow-list accepts everything.
    pub fn allows_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

/// A provider row: key plus config plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub key: String,
    #[serde(flatten)]
    pub config: ProviderConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Prefix of every raw gateway token.
pub const TOKEN_PREFIX: &str = "at_";

/// Number of hex characters following the prefix in a raw token.
pub const TOKEN_HEX_LEN: usize = 64;

/// An API token as persisted. The raw value is never stored, only its
/// SHA-256 hash and a display prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub token_prefix: String,
    /// Scope lists. `None` means unrestricted for that dimension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_webhooks: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    /// Whether the token is past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Trigger type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Http,
    Cron,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }
}

/// A workflow trigger: webhook endpoint or cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    /// Type-dependent settings; cron triggers require `schedule`.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Optional alias, globally unique among triggers when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Public HTTP triggers skip caller authentication.
    #[serde(default)]
    pub public: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Trigger {
    /// The cron schedule expression, for cron-typed triggers.
    pub fn schedule(&self) -> Option<&str> {
        self.config.get("schedule").and_then(|v| v.as_str())
    }
}

/// A node in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
}

/// A workflow graph: nodes wired by edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowGraph {
    /// Nodes reachable from `node_id` along outgoing edges.
    pub fn successors(&self, node_id: &str) -> Vec<&WorkflowNode> {
        self.edges
            .iter()
            .filter(|e| e.from == node_id)
            .filter_map(|e| self.nodes.iter().find(|n| n.id == e.to))
            .collect()
    }

    /// First node of the given type, if any.
    pub fn find_by_kind(&self, kind: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.kind == kind)
    }
}

/// A workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub graph: WorkflowGraph,
    pub version: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunSource {
    Api,
    Webhook,
    Cron,
}

impl RunSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Webhook => "webhook",
            Self::Cron => "cron",
        }
    }
}

/// Snapshot of an active workflow run for listing.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub id: String,
    pub workflow_id: String,
    pub source: RunSource,
    pub started_at: DateTime<Utc>,
}
