//! Durable storage for the gateway catalog.
//!
//! Providers, API tokens, triggers, workflows, and settings live in SQLite.
//! Every operation runs on the blocking pool with a short-lived connection,
//! making the store safe for concurrent async access. Sensitive fields are
//! sealed by [`encryption::SecretBox`] when a passphrase is configured; the
//! box is swappable so key rotation can re-seal in place.

pub mod encryption;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::domain::{
    ApiToken, ProviderConfig, ProviderRecord, Trigger, TriggerKind, Workflow, WorkflowGraph,
    TOKEN_HEX_LEN, TOKEN_PREFIX,
};
use crate::llm::ProviderKind;
use encryption::{SecretBox, KEY_CHECK_PLAINTEXT};

/// Marker distinguishing sealed values from plaintext rows written before a
/// passphrase was configured.
const ENC_PREFIX: &str = "enc:";

/// Settings key holding the encrypted key-check sentinel.
const KEY_CHECK_SETTING: &str = "encryption_key_check";

/// Lowercase hex of `bytes`.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// SHA-256 hex digest of a raw token.
pub fn token_hash(raw: &str) -> String {
    use sha2::{Digest, Sha256};
    hex_encode(&Sha256::digest(raw.as_bytes()))
}

/// Generate a fresh raw token: `at_` + 64 hex chars.
pub fn generate_raw_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; TOKEN_HEX_LEN / 2];
    rand::rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex_encode(&bytes))
}

/// SQLite-backed catalog store.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
    secrets: Arc<RwLock<Option<SecretBox>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .field("encrypted", &self.secrets.read().is_some())
            .finish()
    }
}

impl Store {
    /// Open the store, create the schema, and verify the passphrase
    /// against the stored key-check sentinel.
    pub async fn open<P: Into<PathBuf>>(path: P, passphrase: Option<&str>) -> Result<Self> {
        let store = Self {
            db_path: path.into(),
            secrets: Arc::new(RwLock::new(passphrase.map(SecretBox::from_passphrase))),
        };
        store.migrate_schema().await?;
        store.verify_key_check().await?;
        Ok(store)
    }

    async fn migrate_schema(&self) -> Result<()> {
        self.with_conn(move |conn| {
            conn.pragma_update(None, "journal_mode", "WAL")
                .context("failed to enable WAL mode")?;

            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS providers (
                    key TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    api_key TEXT,
                    base_url TEXT,
                    model TEXT NOT NULL,
                    models TEXT NOT NULL DEFAULT '[]',
                    extra_headers TEXT NOT NULL DEFAULT '{}',
                    proxy TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS api_tokens (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    token_hash TEXT NOT NULL UNIQUE,
                    token_prefix TEXT NOT NULL,
                    allowed_providers TEXT,
                    allowed_models TEXT,
                    allowed_webhooks TEXT,
                    expires_at INTEGER,
                    created_at INTEGER NOT NULL,
                    last_used_at INTEGER
                );

                CREATE TABLE IF NOT EXISTS triggers (
                    id TEXT PRIMARY KEY,
                    workflow_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    config TEXT NOT NULL DEFAULT '{}',
                    alias TEXT UNIQUE,
                    public INTEGER NOT NULL DEFAULT 0,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workflows (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    graph TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workflow_versions (
                    workflow_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    graph TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (workflow_id, version)
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_triggers_workflow ON triggers(workflow_id);
                CREATE INDEX IF NOT EXISTS idx_triggers_kind ON triggers(kind);
                ",
            )
            .context("failed to create schema")?;
            Ok(())
        })
        .await
    }

    /// Run `f` with a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || -> Result<T> {
            let conn = Connection::open(&db_path).context("failed to open database")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            f(&conn)
        })
        .await
        .context("failed to spawn blocking task")?
    }

    /// Seal a sensitive value when a key is configured.
    fn seal(&self, plaintext: &str) -> Result<String> {
        match self.secrets.read().as_ref() {
            Some(secrets) => Ok(format!("{ENC_PREFIX}{}", secrets.encrypt(plaintext)?)),
            None => Ok(plaintext.to_string()),
        }
    }

    /// Open a possibly-sealed value.
    fn open_sealed(&self, stored: &str) -> Result<String> {
        match stored.strip_prefix(ENC_PREFIX) {
            Some(sealed) => match self.secrets.read().as_ref() {
                Some(secrets) => secrets.decrypt(sealed),
                None => anyhow::bail!("encrypted value present but no passphrase configured"),
            },
            None => Ok(stored.to_string()),
        }
    }

    async fn verify_key_check(&self) -> Result<()> {
        if self.secrets.read().is_none() {
            return Ok(());
        }
        match self.get_setting(KEY_CHECK_SETTING).await? {
            Some(stored) => {
                let opened = self
                    .open_sealed(&stored)
                    .context("storage passphrase does not match existing data")?;
                anyhow::ensure!(
                    opened == KEY_CHECK_PLAINTEXT,
                    "storage passphrase does not match existing data"
                );
            }
            None => {
                let sealed = self.seal(KEY_CHECK_PLAINTEXT)?;
                self.put_setting(KEY_CHECK_SETTING, &sealed).await?;
            }
        }
        Ok(())
    }

    // ---- providers ----

    pub async fn list_providers(&self) -> Result<Vec<ProviderRecord>> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, kind, api_key, base_url, model, models, extra_headers, proxy,
                            created_at, updated_at
                     FROM providers ORDER BY key",
                )?;
                let rows = stmt
                    .query_map([], row_to_provider)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(|r| self.decrypt_provider(r)).collect()
    }

    pub async fn get_provider(&self, key: &str) -> Result<Option<ProviderRecord>> {
        let key = key.to_string();
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT key, kind, api_key, base_url, model, models, extra_headers, proxy,
                                created_at, updated_at
                         FROM providers WHERE key = ?1",
                        params![key],
                        row_to_provider,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(|r| self.decrypt_provider(r)).transpose()
    }

    pub async fn put_provider(&self, key: &str, config: &ProviderConfig) -> Result<ProviderRecord> {
        let now = Utc::now().timestamp();
        let provider_key = key.to_string();
        let key = key.to_string();
        let api_key = config
            .api_key
            .as_deref()
            .map(|k| self.seal(k))
            .transpose()?;
        let kind = config.kind.as_str().to_string();
        let base_url = config.base_url.clone();
        let model = config.model.clone();
        let models = serde_json::to_string(&config.models)?;
        let extra_headers = serde_json::to_string(&config.extra_headers)?;
        let proxy = config.proxy.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO providers
                     (key, kind, api_key, base_url, model, models, extra_headers, proxy,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(key) DO UPDATE SET
                     kind = ?2, api_key = ?3, base_url = ?4, model = ?5, models = ?6,
                     extra_headers = ?7, proxy = ?8, updated_at = ?9",
                params![key, kind, api_key, base_url, model, models, extra_headers, proxy, now],
            )?;
            Ok(())
        })
        .await?;

        self.get_provider(&provider_key)
            .await?
            .context("provider vanished after upsert")
    }

    pub async fn delete_provider(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM providers WHERE key = ?1", params![key])?;
            Ok(n > 0)
        })
        .await
    }

    fn decrypt_provider(&self, mut record: ProviderRecord) -> Result<ProviderRecord> {
        if let Some(ref stored) = record.config.api_key {
            record.config.api_key = Some(self.open_sealed(stored)?);
        }
        Ok(record)
    }

    // ---- api tokens ----

    /// Create a token. The raw value is returned exactly once.
    pub async fn create_token(
        &self,
        name: &str,
        allowed_providers: Option<Vec<String>>,
        allowed_models: Option<Vec<String>>,
        allowed_webhooks: Option<Vec<String>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(ApiToken, String)> {
        let raw = generate_raw_token();
        let token = ApiToken {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            token_hash: token_hash(&raw),
            token_prefix: raw[..8].to_string(),
            allowed_providers,
            allowed_models,
            allowed_webhooks,
            expires_at,
            created_at: Utc::now(),
            last_used_at: None,
        };

        let insert = token.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO api_tokens
                     (id, name, token_hash, token_prefix, allowed_providers, allowed_models,
                      allowed_webhooks, expires_at, created_at, last_used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
                params![
                    insert.id,
                    insert.name,
                    insert.token_hash,
                    insert.token_prefix,
                    opt_json(&insert.allowed_providers)?,
                    opt_json(&insert.allowed_models)?,
                    opt_json(&insert.allowed_webhooks)?,
                    insert.expires_at.map(|t| t.timestamp()),
                    insert.created_at.timestamp(),
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok((token, raw))
    }

    pub async fn list_tokens(&self) -> Result<Vec<ApiToken>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, token_hash, token_prefix, allowed_providers, allowed_models,
                        allowed_webhooks, expires_at, created_at, last_used_at
                 FROM api_tokens ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([], row_to_token)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn find_token_by_hash(&self, hash: &str) -> Result<Option<ApiToken>> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, token_hash, token_prefix, allowed_providers, allowed_models,
                            allowed_webhooks, expires_at, created_at, last_used_at
                     FROM api_tokens WHERE token_hash = ?1",
                    params![hash],
                    row_to_token,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn delete_token(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM api_tokens WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    /// Advance `last_used_at`. Callers throttle; the store just writes.
    pub async fn touch_token(&self, id: &str, when: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE api_tokens SET last_used_at = ?2 WHERE id = ?1",
                params![id, when.timestamp()],
            )?;
            Ok(())
        })
        .await
    }

    // ---- triggers ----

    pub async fn list_triggers(&self) -> Result<Vec<Trigger>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workflow_id, kind, config, alias, public, enabled,
                        created_at, updated_at
                 FROM triggers ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([], row_to_trigger)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get_trigger(&self, id: &str) -> Result<Option<Trigger>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, workflow_id, kind, config, alias, public, enabled,
                            created_at, updated_at
                     FROM triggers WHERE id = ?1",
                    params![id],
                    row_to_trigger,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn find_trigger_by_alias(&self, alias: &str) -> Result<Option<Trigger>> {
        let alias = alias.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, workflow_id, kind, config, alias, public, enabled,
                            created_at, updated_at
                     FROM triggers WHERE alias = ?1",
                    params![alias],
                    row_to_trigger,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Enabled cron triggers, for the scheduler tick.
    pub async fn list_enabled_cron_triggers(&self) -> Result<Vec<Trigger>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workflow_id, kind, config, alias, public, enabled,
                        created_at, updated_at
                 FROM triggers WHERE kind = 'cron' AND enabled = 1",
            )?;
            let rows = stmt
                .query_map([], row_to_trigger)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn put_trigger(&self, trigger: &Trigger) -> Result<()> {
        let t = trigger.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO triggers
                     (id, workflow_id, kind, config, alias, public, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     workflow_id = ?2, kind = ?3, config = ?4, alias = ?5, public = ?6,
                     enabled = ?7, updated_at = ?9",
                params![
                    t.id,
                    t.workflow_id,
                    t.kind.as_str(),
                    serde_json::to_string(&t.config)?,
                    t.alias,
                    t.public as i64,
                    t.enabled as i64,
                    t.created_at.timestamp(),
                    t.updated_at.timestamp(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_trigger(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM triggers WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    // ---- workflows ----

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, graph, version, enabled, created_at, updated_at
                 FROM workflows ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([], row_to_workflow)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, graph, version, enabled, created_at, updated_at
                     FROM workflows WHERE id = ?1",
                    params![id],
                    row_to_workflow,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Upsert a workflow. Each write bumps the version and snapshots the
    /// graph into the append-only versions table.
    pub async fn put_workflow(&self, workflow: &Workflow) -> Result<Workflow> {
        let now = Utc::now().timestamp();
        let w = workflow.clone();
        let graph = serde_json::to_string(&w.graph)?;
        self.with_conn(move |conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT version FROM workflows WHERE id = ?1",
                    params![w.id],
                    |row| row.get(0),
                )
                .optional()?;
            let version = existing.map_or(1, |v| v + 1);

            conn.execute(
                "INSERT INTO workflows (id, name, graph, version, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     name = ?2, graph = ?3, version = ?4, enabled = ?5, updated_at = ?6",
                params![w.id, w.name, graph, version, w.enabled as i64, now],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO workflow_versions (workflow_id, version, graph, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![w.id, version, graph, now],
            )?;
            Ok(())
        })
        .await?;

        self.get_workflow(&workflow.id)
            .await?
            .context("workflow vanished after upsert")
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM workflow_versions WHERE workflow_id = ?1",
                params![id],
            )?;
            let n = conn.execute("DELETE FROM workflows WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    pub async fn list_workflow_versions(&self, id: &str) -> Result<Vec<(i64, WorkflowGraph)>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT version, graph FROM workflow_versions
                 WHERE workflow_id = ?1 ORDER BY version DESC",
            )?;
            let rows = stmt
                .query_map(params![id], |row| {
                    let version: i64 = row.get(0)?;
                    let graph: String = row.get(1)?;
                    Ok((version, graph))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(version, graph)| {
                    Ok((version, serde_json::from_str::<WorkflowGraph>(&graph)?))
                })
                .collect()
        })
        .await
    }

    // ---- settings ----

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    // ---- key rotation ----

    /// Re-encrypt every sealed field with a key derived from the new
    /// passphrase, then swap the active box. Caller holds the cluster lock.
    pub async fn rotate_key(&self, new_passphrase: &str) -> Result<[u8; 32]> {
        let providers = self.list_providers().await?;

        let new_key = SecretBox::derive_key(new_passphrase);
        let new_box = SecretBox::from_key(new_key);

        for record in &providers {
            if let Some(ref api_key) = record.config.api_key {
                let sealed = format!("{ENC_PREFIX}{}", new_box.encrypt(api_key)?);
                let key = record.key.clone();
                self.with_conn(move |conn| {
                    conn.execute(
                        "UPDATE providers SET api_key = ?2 WHERE key = ?1",
                        params![key, sealed],
                    )?;
                    Ok(())
                })
                .await?;
            }
        }

        let check = format!("{ENC_PREFIX}{}", new_box.encrypt(KEY_CHECK_PLAINTEXT)?);
        self.put_setting(KEY_CHECK_SETTING, &check).await?;

        *self.secrets.write() = Some(new_box);
        Ok(new_key)
    }

    /// Adopt a key broadcast by the rotating peer.
    pub fn adopt_key(&self, key: [u8; 32]) {
        *self.secrets.write() = Some(SecretBox::from_key(key));
    }
}

fn opt_json(list: &Option<Vec<String>>) -> Result<Option<String>> {
    list.as_ref()
        .map(|l| serde_json::to_string(l).map_err(Into::into))
        .transpose()
}

fn ts(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0).single().unwrap_or_default()
}

fn row_to_provider(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderRecord> {
    let kind: String = row.get(1)?;
    let models: String = row.get(5)?;
    let extra_headers: String = row.get(6)?;
    Ok(ProviderRecord {
        key: row.get(0)?,
        config: ProviderConfig {
            kind: ProviderKind::parse(&kind).unwrap_or(ProviderKind::OpenAi),
            api_key: row.get(2)?,
            base_url: row.get(3)?,
            model: row.get(4)?,
            models: serde_json::from_str(&models).unwrap_or_default(),
            extra_headers: serde_json::from_str::<HashMap<String, String>>(&extra_headers)
                .unwrap_or_default(),
            proxy: row.get(7)?,
        },
        created_at: ts(row.get(8)?),
        updated_at: ts(row.get(9)?),
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiToken> {
    let providers: Option<String> = row.get(4)?;
    let models: Option<String> = row.get(5)?;
    let webhooks: Option<String> = row.get(6)?;
    let expires_at: Option<i64> = row.get(7)?;
    let last_used_at: Option<i64> = row.get(9)?;
    Ok(ApiToken {
        id: row.get(0)?,
        name: row.get(1)?,
        token_hash: row.get(2)?,
        token_prefix: row.get(3)?,
        allowed_providers: providers.and_then(|s| serde_json::from_str(&s).ok()),
        allowed_models: models.and_then(|s| serde_json::from_str(&s).ok()),
        allowed_webhooks: webhooks.and_then(|s| serde_json::from_str(&s).ok()),
        expires_at: expires_at.map(ts),
        created_at: ts(row.get(8)?),
        last_used_at: last_used_at.map(ts),
    })
}

fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trigger> {
    let kind: String = row.get(2)?;
    let config: String = row.get(3)?;
    let public: i64 = row.get(5)?;
    let enabled: i64 = row.get(6)?;
    Ok(Trigger {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        kind: TriggerKind::parse(&kind).unwrap_or(TriggerKind::Http),
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        alias: row.get(4)?,
        public: public != 0,
        enabled: enabled != 0,
        created_at: ts(row.get(7)?),
        updated_at: ts(row.get(8)?),
    })
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    let graph: String = row.get(2)?;
    let enabled: i64 = row.get(4)?;
    Ok(Workflow {
        id: row.get(0)?,
        name: row.get(1)?,
        graph: serde_json::from_str(&graph).unwrap_or_default(),
        version: row.get(3)?,
        enabled: enabled != 0,
        created_at: ts(row.get(5)?),
        updated_at: ts(row.get(6)?),
    })
}
