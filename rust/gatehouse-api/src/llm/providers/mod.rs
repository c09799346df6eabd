//! Provider drivers and the factory the registry dispatches through.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatProvider;

use std::sync::Arc;

use crate::domain::ProviderConfig;
use crate::llm::registry::{ProviderFactory, ProviderHandle};
use crate::llm::signatures::SignatureCache;
use crate::llm::ProviderKind;

/// Build a dispatchable handle for one provider config.
pub fn build_handle(
    config: &ProviderConfig,
    signatures: &Arc<SignatureCache>,
) -> anyhow::Result<ProviderHandle> {
    let provider: Arc<dyn crate::llm::ChatProvider> = match config.kind {
        ProviderKind::OpenAi | ProviderKind::Gemini | ProviderKind::Vertex => Arc::new(
            OpenAiCompatProvider::new(config.clone(), signatures.clone())?,
        ),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config.clone())?),
    };
    Ok(ProviderHandle {
        provider,
        kind: config.kind,
        default_model: config.model.clone(),
        models: config.models.clone(),
        config: config.clone(),
    })
}

/// The factory handed to callers that rebuild the registry, so neither the
/// registry nor the admin API references a concrete driver.
pub fn factory(signatures: Arc<SignatureCache>) -> ProviderFactory {
    Arc::new(move |config: &ProviderConfig| build_handle(config, &signatures))
}

/// Shared helper: split a `data:` URI into media type and base64 payload.
pub(crate) fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    if media_type.is_empty() {
        return None;
    }
    Some((media_type.to_string(), payload.to_string()))
}

/// Build a reqwest client honoring the provider's proxy setting.
pub(crate) fn build_client(config: &ProviderConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(300));
    if let Some(proxy) = config.proxy.as_deref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_parsing() {
        let (media, data) = parse_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(media, "image/png");
        assert_eq!(data, "aGVsbG8=");

        assert!(parse_data_uri("https://example.com/x.png").is_none());
        assert!(parse_data_uri("data:image/png,plain").is_none());
    }
}
