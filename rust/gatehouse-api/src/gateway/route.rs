//! Model-ID routing: `provider_key/model_id` parsing and access checks.

use std::sync::Arc;

use crate::error::ApiError;
use crate::gateway::auth::AuthResult;
use crate::llm::registry::{ProviderHandle, ProviderRegistry};

/// Split a routed model ID on its first `/`.
///
/// The suffix keeps any further slashes, so `github/openai/gpt-4.1` routes
/// to provider `github` with model `openai/gpt-4.1`.
pub fn parse_model_id(s: &str) -> Result<(String, String), ApiError> {
    if s.is_empty() {
        return Err(ApiError::BadRequest(
            "model is required; use the form \"provider/model\", e.g. \"openai/gpt-4o\"".to_string(),
        ));
    }
    let Some((provider, model)) = s.split_once('/') else {
        return Err(ApiError::BadRequest(format!(
            "invalid model \"{s}\"; use the form \"provider/model\", e.g. \"openai/gpt-4o\""
        )));
    };
    if provider.is_empty() || model.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "invalid model \"{s}\"; both provider and model must be non-empty, e.g. \"openai/gpt-4o\""
        )));
    }
    Ok((provider.to_string(), model.to_string()))
}

/// Parse and authorize a routed model ID against scope, registry, and the
/// provider's allow-list. Each failure maps to its own status: 403 for
/// scope, 404 for provider or model.
pub fn resolve_model(
    registry: &ProviderRegistry,
    auth: &AuthResult,
    routed_model: &str,
) -> Result<(String, String, Arc<ProviderHandle>), ApiError> {
    let (provider_key, model_id) = parse_model_id(routed_model)?;

    let full_id = format!("{provider_key}/{model_id}");
    if !auth.is_model_allowed(&provider_key, &full_id) {
        return Err(ApiError::Scope(format!(
            "token does not grant access to model \"{full_id}\""
        )));
    }

    let Some(handle) = registry.get(&provider_key) else {
        return Err(ApiError::NotFound(format!(
            "unknown provider \"{provider_key}\""
        )));
    };

    if !handle.models.is_empty() && !handle.models.iter().any(|m| m == &model_id) {
        return Err(ApiError::ModelNotFound(format!(
            "model \"{model_id}\" is not available on provider \"{provider_key}\""
        )));
    }

    Ok((provider_key, model_id, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderConfig;
    use crate::llm::{ChatProvider, ChatRequest, LlmResponse, ProviderKind};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::collections::HashMap;

    #[test]
    fn parse_plain() {
        assert_eq!(
            parse_model_id("openai/gpt-4o").unwrap(),
            ("openai".to_string(), "gpt-4o".to_string())
        );
    }

    #[test]
    fn parse_keeps_suffix_slashes() {
        assert_eq!(
            parse_model_id("github/openai/gpt-4.1").unwrap(),
            ("github".to_string(), "openai/gpt-4.1".to_string())
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_model_id("").is_err());
        assert!(parse_model_id("gpt-4o").is_err());
        assert!(parse_model_id("/gpt-4o").is_err());
        assert!(parse_model_id("openai/").is_err());
    }

    struct NullProvider;

    #[async_trait]
    impl ChatProvider for NullProvider {
        async fn chat(&self, _req: ChatRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse::default())
        }
    }

    fn registry_with(models: Vec<String>) -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry.replace(
            "openai",
            ProviderHandle {
                provider: std::sync::Arc::new(NullProvider),
                kind: ProviderKind::OpenAi,
                default_model: "gpt-4o".into(),
                models: models.clone(),
                config: ProviderConfig {
                    kind: ProviderKind::OpenAi,
                    api_key: None,
                    base_url: None,
                    model: "gpt-4o".into(),
                    models,
                    extra_headers: HashMap::new(),
                    proxy: None,
                },
            },
        );
        registry
    }

    #[test]
    fn resolve_checks_in_order() {
        let registry = registry_with(vec![]);

        // Scope denial comes first.
        let scoped = AuthResult::Scoped(Box::new(crate::domain::ApiToken {
            id: "t".into(),
            name: "t".into(),
            token_hash: String::new(),
            token_prefix: String::new(),
            allowed_providers: None,
            allowed_models: Some(vec!["openai/gpt-4o".into()]),
            allowed_webhooks: None,
            expires_at: None,
            created_at: chrono::Utc::now(),
            last_used_at: None,
        }));
        let err = resolve_model(&registry, &scoped, "anthropic/claude-haiku-4-5").unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("anthropic/claude-haiku-4-5"));

        // Unknown provider is 404.
        let err = resolve_model(&registry, &AuthResult::Unrestricted, "missing/m").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        // Known provider, allowed model.
        let ok = resolve_model(&registry, &AuthResult::Unrestricted, "openai/anything");
        assert!(ok.is_ok());
    }

    #[test]
    fn resolve_enforces_allow_list() {
        let registry = registry_with(vec!["gpt-4o".into()]);
        let err =
            resolve_model(&registry, &AuthResult::Unrestricted, "openai/o3").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(resolve_model(&registry, &AuthResult::Unrestricted, "openai/gpt-4o").is_ok());
    }
}
