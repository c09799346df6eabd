//! HTTP webhook dispatch.
//!
//! `POST /webhooks/{id_or_alias}` resolves a trigger (ID first, alias
//! second), authenticates unless the trigger is public, and hands the run
//! to the engine on a background task. `?sync=true` blocks until the first
//! `output` node fires; everything else returns 202 immediately. The
//! background run never borrows the request context - it lives under the
//! run supervisor and only `CancelRun` or completion ends it.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::domain::{RunSource, Trigger, TriggerKind};
use crate::error::ApiError;
use crate::workflow::spawn_run;
use crate::AppState;

/// Create the webhook router.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id_or_alias}", post(dispatch_webhook))
}

async fn dispatch_webhook(
    State(state): State<AppState>,
    Path(id_or_alias): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let trigger = resolve_trigger(&state, &id_or_alias).await?;

    if trigger.kind != TriggerKind::Http {
        return Err(ApiError::BadRequest(format!(
            "trigger \"{id_or_alias}\" is not an HTTP trigger"
        )));
    }
    if !trigger.enabled {
        return Err(ApiError::Scope(format!(
            "trigger \"{id_or_alias}\" is disabled"
        )));
    }

    if !trigger.public {
        let auth = state.authenticator.authenticate(&headers).await?;
        if !auth.is_webhook_allowed(&trigger.id, trigger.alias.as_deref()) {
            return Err(ApiError::Scope(format!(
                "token does not grant access to webhook \"{id_or_alias}\""
            )));
        }
    }

    let workflow = state
        .store
        .get_workflow(&trigger.workflow_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("workflow \"{}\" not found", trigger.workflow_id))
        })?;
    if !workflow.enabled {
        return Err(ApiError::BadRequest(format!(
            "workflow \"{}\" is disabled",
            workflow.id
        )));
    }

    let path = format!("/webhooks/{id_or_alias}");
    let input = build_input(&trigger, &method, &path, query.as_deref(), &headers, &body);

    let sync = query
        .as_deref()
        .is_some_and(|q| query_flag(q, "sync"));
    let has_output = workflow.graph.find_by_kind("output").is_some();

    let (run_id, outcome_rx) = spawn_run(
        &state,
        &workflow,
        input,
        RunSource::Webhook,
        sync && has_output,
    );

    if let Some(mut rx) = outcome_rx {
        // Sync: block until the first output fires. The run itself keeps
        // going in the background and cleans up on its own.
        return Ok(match rx.recv().await {
            Some(outputs) => Json(json!({
                "run_id": run_id,
                "workflow_id": workflow.id,
                "status": "completed",
                "outputs": outputs,
            }))
            .into_response(),
            None => Json(json!({
                "run_id": run_id,
                "workflow_id": workflow.id,
                "status": "completed",
            }))
            .into_response(),
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "run_id": run_id,
            "workflow_id": workflow.id,
            "status": "running",
        })),
    )
        .into_response())
}

async fn resolve_trigger(state: &AppState, id_or_alias: &str) -> Result<Trigger, ApiError> {
    if let Some(trigger) = state.store.get_trigger(id_or_alias).await? {
        return Ok(trigger);
    }
    state
        .store
        .find_trigger_by_alias(id_or_alias)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown trigger \"{id_or_alias}\"")))
}

/// Build the engine input map. Multi-value query params and headers
/// flatten to their first value.
fn build_input(
    trigger: &Trigger,
    method: &Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Value {
    let mut query_map: HashMap<String, String> = HashMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            query_map.entry(key.into_owned()).or_insert(value.into_owned());
        }
    }

    let mut header_map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map
                .entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    // JSON bodies arrive parsed; anything else is passed as a string.
    let body_value = serde_json::from_slice::<Value>(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));

    json!({
        "method": method.as_str(),
        "path": path,
        "trigger_type": "http",
        "trigger_id": trigger.id,
        "triggered_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "query": query_map,
        "headers": header_map,
        "body": body_value,
    })
}

fn query_flag(query: &str, name: &str) -> bool {
    url::form_urlencoded::parse(query.as_bytes())
        .any(|(key, value)| key == name && value == "true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn http_trigger() -> Trigger {
        Trigger {
            id: "tr1".into(),
            workflow_id: "wf1".into(),
            kind: TriggerKind::Http,
            config: json!({}),
            alias: Some("hook-a".into()),
            public: true,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn input_flattens_multi_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "first".parse().unwrap());
        headers.append("x-tag", "second".parse().unwrap());

        let input = build_input(
            &http_trigger(),
            &Method::POST,
            "/webhooks/hook-a",
            Some("a=1&a=2&b=3"),
            &headers,
            br#"{"ok":true}"#,
        );

        assert_eq!(input["query"]["a"], json!("1"));
        assert_eq!(input["query"]["b"], json!("3"));
        assert_eq!(input["headers"]["x-tag"], json!("first"));
        assert_eq!(input["body"], json!({"ok": true}));
        assert_eq!(input["trigger_type"], json!("http"));
        assert_eq!(input["method"], json!("POST"));
    }

    #[test]
    fn non_json_body_is_a_string() {
        let input = build_input(
            &http_trigger(),
            &Method::POST,
            "/webhooks/tr1",
            None,
            &HeaderMap::new(),
            b"plain text",
        );
        assert_eq!(input["body"], json!("plain text"));
    }

    #[test]
    fn sync_flag_detection() {
        assert!(query_flag("sync=true", "sync"));
        assert!(query_flag("a=1&sync=true", "sync"));
        assert!(!query_flag("sync=1", "sync"));
        assert!(!query_flag("async=true", "sync"));
    }
}
