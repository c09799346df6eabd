//! Native pass-through proxy.
//!
//! Forwards raw vendor requests without any format translation, for callers
//! that want vendor features absent from the OpenAI surface. Only Anthropic
//! and Gemini expose native APIs rich enough to justify this. The body is
//! read once up front because Anthropic carries the model in the body, not
//! the URL; redirects are disabled so the client sees any 3xx itself.

use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;

use crate::error::ApiError;
use crate::llm::ProviderKind;
use crate::AppState;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `ANY /gateway/v1/native/{provider_key}/{upstream_path...}`.
pub async fn native_proxy(
    State(state): State<AppState>,
    Path((provider_key, upstream_path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let auth = state.authenticator.authenticate(&headers).await?;

    let handle = state
        .registry
        .get(&provider_key)
        .ok_or_else(|| ApiError::NotFound(format!("unknown provider \"{provider_key}\"")))?;

    if !handle.kind.supports_native_proxy() {
        return Err(ApiError::BadRequest(format!(
            "provider \"{provider_key}\" ({}) has no native API; only anthropic and gemini do",
            handle.kind.as_str()
        )));
    }

    let model = match handle.kind {
        ProviderKind::Gemini => extract_gemini_model(&upstream_path),
        ProviderKind::Anthropic => extract_body_model(&body),
        _ => None,
    }
    .unwrap_or_default();

    let full_id = format!("{provider_key}/{model}");
    if !auth.is_model_allowed(&provider_key, &full_id) {
        return Err(ApiError::Scope(format!(
            "token does not grant access to model \"{full_id}\""
        )));
    }

    let mut url = format!(
        "{}/{}",
        handle.config.base_url_or_default(),
        upstream_path.trim_start_matches('/')
    );
    if let Some(query) = query {
        url.push('?');
        url.push_str(&query);
    }

    let mut client = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(proxy) = handle.config.proxy.as_deref() {
        client = client.proxy(reqwest::Proxy::all(proxy).map_err(anyhow::Error::from)?);
    }
    let client = client.build().map_err(anyhow::Error::from)?;

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| ApiError::BadRequest(format!("unsupported method {method}")))?;
    let mut request = client.request(reqwest_method, &url);

    if let Some(content_type) = headers.get("content-type").and_then(|v| v.to_str().ok()) {
        request = request.header("content-type", content_type);
    }
    if let Some(ref api_key) = handle.config.api_key {
        request = match handle.kind {
            ProviderKind::Anthropic => request
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            _ => request.header("x-goog-api-key", api_key),
        };
    }
    for (name, value) in &handle.config.extra_headers {
        request = request.header(name, value);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = request
        .send()
        .await
        .map_err(|err| ApiError::Upstream(format!("upstream request failed: {err}")))?;

    Ok(relay_response(upstream).await)
}

/// Copy the upstream response through: status and headers verbatim, body
/// relayed chunk by chunk for SSE and copied whole otherwise.
async fn relay_response(upstream: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "transfer-encoding" || lower == "connection" || lower == "content-length" {
            continue;
        }
        builder = builder.header(name, value);
    }

    let is_sse = upstream
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    let body = if is_sse {
        // Each upstream frame flushes to the client as it arrives.
        Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other))
    } else {
        match upstream.bytes().await {
            Ok(bytes) => Body::from(bytes),
            Err(err) => {
                return ApiError::Upstream(format!("failed to read upstream body: {err}"))
                    .into_response()
            }
        }
    };

    builder.body(body).unwrap_or_else(|_| {
        Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Body::empty())
            .expect("static response")
    })
}

/// Pull the model out of a Gemini path: `.../models/{name}:{method}`.
fn extract_gemini_model(path: &str) -> Option<String> {
    let (_, rest) = path.split_once("models/")?;
    let model = rest.split(['/', ':']).next()?;
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}

/// Pull the top-level `model` out of an Anthropic request body.
fn extract_body_model(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("model")
        .and_then(|m| m.as_str())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_model_from_path() {
        assert_eq!(
            extract_gemini_model("v1beta/models/gemini-2.5-flash:generateContent").as_deref(),
            Some("gemini-2.5-flash")
        );
        assert_eq!(
            extract_gemini_model("v1beta/models/gemini-2.5-pro").as_deref(),
            Some("gemini-2.5-pro")
        );
        assert_eq!(extract_gemini_model("v1beta/operations/123"), None);
    }

    #[test]
    fn anthropic_model_from_body() {
        let body = br#"{"model": "claude-sonnet-4-5", "max_tokens": 10}"#;
        assert_eq!(
            extract_body_model(body).as_deref(),
            Some("claude-sonnet-4-5")
        );
        assert_eq!(extract_body_model(b"not json"), None);
        assert_eq!(extract_body_model(br#"{"messages": []}"#), None);
    }
}
