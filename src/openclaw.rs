//! Legacy external planner path. Kept as an optional subsystem: when an
//! OpenClaw webhook or CLI is configured it can produce the plan instead of
//! the internal engine, and its distinct failure mode keeps the historical
//! exit-code contract (`OPENCLAW_DOWN`, exit 2).

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::{PlannerError, Result};
use crate::plan::Plan;

const DEFAULT_TIMEOUT_SECS: f64 = 45.0;

/// Pull the first JSON object out of possibly noisy model output: raw JSON,
/// fenced JSON, or JSON embedded in prose.
pub fn extract_json_from_text(payload: &str) -> Option<Value> {
    let stripped = payload.trim();
    if stripped.is_empty() {
        return None;
    }

    for candidate in [stripped, stripped.trim_matches('`')] {
        if let Ok(decoded) = serde_json::from_str::<Value>(candidate) {
            if decoded.is_object() {
                return Some(decoded);
            }
        }
    }

    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&stripped[start..=end]) {
        Ok(decoded) if decoded.is_object() => Some(decoded),
        _ => None,
    }
}

pub struct OpenClawAdapter {
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    timeout: Duration,
    cli_bin: Option<String>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl OpenClawAdapter {
    pub fn from_env() -> Self {
        let timeout_secs = env_nonempty("OPENCLAW_TIMEOUT_SEC")
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            webhook_url: env_nonempty("OPENCLAW_WEBHOOK_URL"),
            webhook_token: env_nonempty("OPENCLAW_WEBHOOK_TOKEN"),
            timeout: Duration::from_secs_f64(timeout_secs),
            cli_bin: env_nonempty("OPENCLAW_CLI_BIN"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some() || self.cli_bin.is_some()
    }

    /// Ask the external planner for a plan and validate it through the
    /// normal schema. Webhook wins over CLI when both are configured.
    pub async fn plan(&self, task_input: &Value) -> Result<Plan> {
        if self.webhook_url.is_some() {
            let payload = self.call_http(task_input).await?;
            return Plan::from_value(&normalize_plan_payload(payload, task_input)?);
        }
        if self.cli_bin.is_some() {
            let payload = self.call_cli(task_input).await?;
            return Plan::from_value(&normalize_plan_payload(payload, task_input)?);
        }
        Err(PlannerError::OpenClawDown(
            "OpenClaw is not configured".to_string(),
        ))
    }

    async fn call_http(&self, task_input: &Value) -> Result<Value> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| PlannerError::OpenClawDown("OpenClaw is not configured".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PlannerError::OpenClawDown(format!("http client: {e}")))?;

        let mut last_error =
            PlannerError::OpenClawDown("OpenClaw webhook request failed".to_string());
        for attempt in 0..2u8 {
            let mut request = client
                .post(url)
                .header("Accept", "application/json")
                .json(task_input);
            if let Some(token) = &self.webhook_token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) => match response.text().await {
                    Ok(body) => match extract_json_from_text(&body) {
                        Some(decoded) => return Ok(decoded),
                        None => {
                            last_error = PlannerError::OpenClawDown(
                                "OpenClaw returned non-JSON output".to_string(),
                            );
                        }
                    },
                    Err(_) => {
                        last_error = PlannerError::OpenClawDown(
                            "OpenClaw webhook request failed".to_string(),
                        );
                    }
                },
                Err(_) => {
                    last_error =
                        PlannerError::OpenClawDown("OpenClaw webhook request failed".to_string());
                }
            }
            if attempt == 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
        Err(last_error)
    }

    async fn call_cli(&self, task_input: &Value) -> Result<Value> {
        let bin = self
            .cli_bin
            .as_deref()
            .ok_or_else(|| PlannerError::OpenClawDown("OpenClaw is not configured".to_string()))?;

        let mut child = Command::new(bin)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|_| {
                PlannerError::OpenClawDown("OpenClaw CLI is unavailable".to_string())
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            let body = serde_json::to_vec(task_input)?;
            stdin.write_all(&body).await.map_err(|_| {
                PlannerError::OpenClawDown("OpenClaw CLI is unavailable".to_string())
            })?;
        }
        drop(child.stdin.take());

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PlannerError::OpenClawDown("OpenClaw CLI is unavailable".to_string()))?
            .map_err(|_| PlannerError::OpenClawDown("OpenClaw CLI is unavailable".to_string()))?;

        if !output.status.success() {
            return Err(PlannerError::OpenClawDown(
                "OpenClaw CLI returned a non-zero exit code".to_string(),
            ));
        }
        extract_json_from_text(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            PlannerError::OpenClawDown("OpenClaw CLI returned non-JSON output".to_string())
        })
    }
}

/// The external planner may answer with `{plan: {...}}` or a bare plan, and
/// may omit request-level fields; backfill them from the request so schema
/// validation sees a complete payload.
pub fn normalize_plan_payload(payload: Value, task_input: &Value) -> Result<Value> {
    let plan_payload = match payload.get("plan") {
        Some(Value::Object(plan)) => plan.clone(),
        _ => match payload {
            Value::Object(map) => map,
            _ => {
                return Err(PlannerError::invalid_plan(
                    "OpenClaw response did not contain a plan object",
                ))
            }
        },
    };

    let mut merged: Map<String, Value> = plan_payload;
    let request = task_input.as_object().cloned().unwrap_or_default();
    for key in [
        "planId",
        "repo",
        "title",
        "requestedBy",
        "requestedAt",
        "objective",
        "version",
    ] {
        if !merged.contains_key(key) {
            if let Some(value) = request.get(key) {
                merged.insert(key.to_string(), value.clone());
            }
        }
    }
    if !merged.contains_key("constraints") {
        merged.insert(
            "constraints".to_string(),
            request
                .get("constraints")
                .cloned()
                .unwrap_or(Value::Object(Map::new())),
        );
    }
    if !merged.contains_key("context") {
        merged.insert(
            "context".to_string(),
            request
                .get("context")
                .cloned()
                .unwrap_or(Value::Object(Map::new())),
        );
    }
    if !merged.contains_key("routing") {
        if let Some(routing) = request.get("routing") {
            merged.insert("routing".to_string(), routing.clone());
        }
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_raw_json() {
        let decoded = extract_json_from_text(r#"{"a": 1}"#).unwrap();
        assert_eq!(decoded["a"], 1);
    }

    #[test]
    fn extracts_fenced_json() {
        let decoded = extract_json_from_text("```{\"a\": 1}```").unwrap();
        assert_eq!(decoded["a"], 1);
    }

    #[test]
    fn extracts_embedded_json() {
        let decoded =
            extract_json_from_text("Here is the plan:\n{\"a\": {\"b\": 2}}\nthanks").unwrap();
        assert_eq!(decoded["a"]["b"], 2);
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(extract_json_from_text("").is_none());
        assert!(extract_json_from_text("[1, 2]").is_none());
        assert!(extract_json_from_text("no json here").is_none());
    }

    #[test]
    fn normalize_backfills_request_fields() {
        let request = json!({
            "planId": "p1",
            "repo": "demo",
            "title": "t",
            "requestedBy": "alice",
            "requestedAt": 1i64,
            "objective": "o",
            "version": "1.0",
            "constraints": {"x": 1},
            "context": {"y": 2},
            "routing": {"agent": "codex"},
        });
        let response = json!({"plan": {"subtasks": []}});
        let merged = normalize_plan_payload(response, &request).unwrap();
        assert_eq!(merged["planId"], "p1");
        assert_eq!(merged["constraints"]["x"], 1);
        assert_eq!(merged["context"]["y"], 2);
        assert_eq!(merged["routing"]["agent"], "codex");
    }

    #[test]
    fn normalize_prefers_response_fields() {
        let request = json!({"repo": "request-repo"});
        let response = json!({"repo": "response-repo"});
        let merged = normalize_plan_payload(response, &request).unwrap();
        assert_eq!(merged["repo"], "response-repo");
    }

    #[tokio::test]
    async fn unconfigured_adapter_is_down() {
        let adapter = OpenClawAdapter {
            webhook_url: None,
            webhook_token: None,
            timeout: Duration::from_secs(1),
            cli_bin: None,
        };
        assert!(!adapter.is_configured());
        let err = adapter.plan(&json!({})).await.unwrap_err();
        assert_eq!(err.code(), "OPENCLAW_DOWN");
        assert_eq!(err.exit_code(), 2);
    }
}
