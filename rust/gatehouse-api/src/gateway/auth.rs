//! Bearer-token authentication for the gateway and webhook surfaces.
//!
//! Config-declared tokens are checked first with constant-time equality;
//! store tokens are found by SHA-256 hash. Successful store hits schedule a
//! throttled `last_used_at` write on a detached task so response completion
//! never aborts it. With no tokens configured anywhere, all traffic is
//! rejected - an open gateway is worse than a loud failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::DeclaredToken;
use crate::domain::ApiToken;
use crate::error::ApiError;
use crate::store::{token_hash, Store};

/// Minimum interval between `last_used_at` writes per token.
pub const LAST_USED_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Outcome of authentication: either unrestricted or carrying a scope.
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// A config token with no scope fields, or the admin surface.
    Unrestricted,
    /// A scoped token (from the store, or a config token with scopes).
    Scoped(Box<ApiToken>),
}

impl AuthResult {
    /// Whether `provider_key/model_id` is reachable under this scope.
    ///
    /// Dimensions are disjunctive: matching either the provider list or
    /// the model list grants access; with both lists absent, everything
    /// is allowed.
    pub fn is_model_allowed(&self, provider_key: &str, full_model_id: &str) -> bool {
        let token = match self {
            Self::Unrestricted => return true,
            Self::Scoped(token) => token,
        };
        let providers = token.allowed_providers.as_deref();
        let models = token.allowed_models.as_deref();

        if providers.is_none() && models.is_none() {
            return true;
        }
        if providers.is_some_and(|p| p.iter().any(|k| k == provider_key)) {
            return true;
        }
        models.is_some_and(|m| m.iter().any(|id| id == full_model_id))
    }

    /// Whether this scope may fire the webhook with `trigger_id` / `alias`.
    pub fn is_webhook_allowed(&self, trigger_id: &str, alias: Option<&str>) -> bool {
        let token = match self {
            Self::Unrestricted => return true,
            Self::Scoped(token) => token,
        };
        match token.allowed_webhooks.as_deref() {
            None => true,
            Some(hooks) => hooks
                .iter()
                .any(|h| h == trigger_id || alias.is_some_and(|a| h == a)),
        }
    }
}

/// Resolves bearer tokens into [`AuthResult`]s.
pub struct Authenticator {
    declared: Vec<DeclaredToken>,
    store: Store,
    /// Per-token timestamp of the last scheduled write.
    last_used: Mutex<HashMap<String, Instant>>,
    /// Per-token writer gate; `try_lock` failure means a writer is already
    /// in flight, which is a signal and not an error.
    writers: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("declared", &self.declared.len())
            .finish()
    }
}

impl Authenticator {
    pub fn new(declared: Vec<DeclaredToken>, store: Store) -> Self {
        Self {
            declared,
            store,
            last_used: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Authenticate an `Authorization` header value.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthResult, ApiError> {
        let bearer = extract_bearer(headers)
            .ok_or_else(|| ApiError::Auth("missing bearer token".to_string()))?;
        self.authenticate_token(&bearer).await
    }

    /// Authenticate a raw token string.
    pub async fn authenticate_token(&self, raw: &str) -> Result<AuthResult, ApiError> {
        let now = Utc::now();

        for declared in &self.declared {
            let matches: bool = declared.token.as_bytes().ct_eq(raw.as_bytes()).into();
            if matches {
                return self.resolve_declared(declared, now);
            }
        }

        let hash = token_hash(raw);
        let token = match self.store.find_token_by_hash(&hash).await {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(error = %err, "token store lookup failed");
                return Err(ApiError::Internal(err));
            }
        };

        let Some(token) = token else {
            if self.declared.is_empty() && !self.any_tokens_exist().await {
                return Err(ApiError::Auth(
                    "no authentication configured; create an API token or declare one in config"
                        .to_string(),
                ));
            }
            tracing::debug!("bearer token not found");
            return Err(ApiError::Auth("invalid token".to_string()));
        };

        if token.is_expired(now) {
            tracing::debug!(token_id = %token.id, "bearer token expired");
            return Err(ApiError::Auth("invalid token".to_string()));
        }

        self.schedule_touch(&token.id, now);
        Ok(AuthResult::Scoped(Box::new(token)))
    }

    fn resolve_declared(
        &self,
        declared: &DeclaredToken,
        now: DateTime<Utc>,
    ) -> Result<AuthResult, ApiError> {
        if let Some(ref raw_expiry) = declared.expires_at {
            let expiry = DateTime::parse_from_rfc3339(raw_expiry).map_err(|err| {
                tracing::error!(error = %err, "config token has invalid expires_at");
                ApiError::Auth("invalid token".to_string())
            })?;
            if expiry.with_timezone(&Utc) <= now {
                tracing::debug!("config token expired");
                return Err(ApiError::Auth("invalid token".to_string()));
            }
        }

        if declared.allowed_providers.is_none()
            && declared.allowed_models.is_none()
            && declared.allowed_webhooks.is_none()
        {
            return Ok(AuthResult::Unrestricted);
        }

        // Wrap scope fields in a synthetic token so scope checks are uniform.
        Ok(AuthResult::Scoped(Box::new(ApiToken {
            id: String::new(),
            name: "config".to_string(),
            token_hash: String::new(),
            token_prefix: String::new(),
            allowed_providers: declared.allowed_providers.clone(),
            allowed_models: declared.allowed_models.clone(),
            allowed_webhooks: declared.allowed_webhooks.clone(),
            expires_at: None,
            created_at: now,
            last_used_at: None,
        })))
    }

    async fn any_tokens_exist(&self) -> bool {
        self.store
            .list_tokens()
            .await
            .map(|tokens| !tokens.is_empty())
            .unwrap_or(true)
    }

    /// Schedule a throttled `last_used_at` write. At most one write per
    /// token per window, and at most one background writer per token.
    fn schedule_touch(&self, token_id: &str, now: DateTime<Utc>) {
        {
            let mut last = self.last_used.lock();
            match last.get(token_id) {
                Some(at) if at.elapsed() < LAST_USED_INTERVAL => return,
                _ => {
                    last.insert(token_id.to_string(), Instant::now());
                }
            }
        }

        let gate = {
            let mut writers = self.writers.lock();
            writers
                .entry(token_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let store = self.store.clone();
        let token_id = token_id.to_string();
        // Detached from the request so response completion cannot abort it.
        tokio::spawn(async move {
            let Ok(_guard) = gate.try_lock() else {
                return;
            };
            if let Err(err) = store.touch_token(&token_id, now).await {
                tracing::warn!(error = %err, token_id = %token_id, "failed to update last_used_at");
            }
        });
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(
        providers: Option<Vec<&str>>,
        models: Option<Vec<&str>>,
        webhooks: Option<Vec<&str>>,
    ) -> AuthResult {
        AuthResult::Scoped(Box::new(ApiToken {
            id: "t1".into(),
            name: "test".into(),
            token_hash: String::new(),
            token_prefix: String::new(),
            allowed_providers: providers.map(|v| v.into_iter().map(String::from).collect()),
            allowed_models: models.map(|v| v.into_iter().map(String::from).collect()),
            allowed_webhooks: webhooks.map(|v| v.into_iter().map(String::from).collect()),
            expires_at: None,
            created_at: Utc::now(),
            last_used_at: None,
        }))
    }

    #[test]
    fn provider_scope_wins_regardless_of_models() {
        let auth = scoped(Some(vec!["openai"]), Some(vec!["anthropic/claude"]), None);
        assert!(auth.is_model_allowed("openai", "openai/gpt-4o"));
        assert!(auth.is_model_allowed("anthropic", "anthropic/claude"));
        assert!(!auth.is_model_allowed("anthropic", "anthropic/other"));
    }

    #[test]
    fn model_scope_alone() {
        let auth = scoped(None, Some(vec!["openai/gpt-4o"]), None);
        assert!(auth.is_model_allowed("openai", "openai/gpt-4o"));
        assert!(!auth.is_model_allowed("openai", "openai/gpt-4.1"));
    }

    #[test]
    fn empty_scopes_allow_everything() {
        let auth = scoped(None, None, None);
        assert!(auth.is_model_allowed("any", "any/model"));
        assert!(auth.is_webhook_allowed("tr1", None));
        assert!(AuthResult::Unrestricted.is_model_allowed("x", "x/y"));
    }

    #[test]
    fn webhook_scope_matches_id_or_alias() {
        let auth = scoped(None, None, Some(vec!["hook-a"]));
        assert!(auth.is_webhook_allowed("tr1", Some("hook-a")));
        assert!(!auth.is_webhook_allowed("tr1", Some("hook-b")));

        let by_id = scoped(None, None, Some(vec!["tr1"]));
        assert!(by_id.is_webhook_allowed("tr1", None));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer at_abc".parse().unwrap());
        assert_eq!(extract_bearer(&headers).as_deref(), Some("at_abc"));

        headers.insert("authorization", "Basic dXNlcg==".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);
    }

    #[tokio::test]
    async fn declared_token_with_scope_is_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db"), None).await.unwrap();
        let auth = Authenticator::new(
            vec![DeclaredToken {
                token: "at_config".into(),
                allowed_providers: Some(vec!["openai".into()]),
                allowed_models: None,
                allowed_webhooks: None,
                expires_at: None,
            }],
            store,
        );

        let result = auth.authenticate_token("at_config").await.unwrap();
        assert!(matches!(result, AuthResult::Scoped(_)));
        assert!(result.is_model_allowed("openai", "openai/gpt-4o"));
        assert!(!result.is_model_allowed("anthropic", "anthropic/claude"));
    }

    #[tokio::test]
    async fn no_tokens_anywhere_rejects_with_explicit_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db"), None).await.unwrap();
        let auth = Authenticator::new(vec![], store);

        let err = auth.authenticate_token("at_whatever").await.unwrap_err();
        assert!(err.to_string().contains("no authentication configured"));
    }

    #[tokio::test]
    async fn store_token_roundtrip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db"), None).await.unwrap();
        let (_token, raw) = store
            .create_token("ok", None, None, None, None)
            .await
            .unwrap();
        let (_expired, raw_expired) = store
            .create_token(
                "expired",
                None,
                None,
                None,
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let auth = Authenticator::new(vec![], store);
        assert!(auth.authenticate_token(&raw).await.is_ok());
        let err = auth.authenticate_token(&raw_expired).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid token");
    }

    #[tokio::test]
    async fn last_used_writes_are_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db"), None).await.unwrap();
        let (token, raw) = store
            .create_token("throttle", None, None, None, None)
            .await
            .unwrap();

        let auth = Authenticator::new(vec![], store.clone());
        auth.authenticate_token(&raw).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let first = store
            .list_tokens()
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.id == token.id)
            .unwrap()
            .last_used_at;
        assert!(first.is_some());

        // A second authentication in the window schedules no further write.
        auth.authenticate_token(&raw).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second = store
            .list_tokens()
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.id == token.id)
            .unwrap()
            .last_used_at;
        assert_eq!(first, second);
    }
}
