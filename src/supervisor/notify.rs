//! Outbound operator notifications over a webhook. Delivery is best-effort:
//! a missing URL or a failed POST is logged and otherwise ignored.

use std::time::Duration;

use serde_json::json;

use crate::log;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Notifier {
    client: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url, token }
    }

    pub async fn send(&self, message: &str) {
        let Some(url) = &self.url else {
            log::warn(
                "notify_skipped",
                json!({"reason": "webhook url not configured", "message": message}),
            );
            return;
        };

        let mut request = self.client.post(url).json(&json!({"content": message}));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                log::error(
                    "notify_failed",
                    json!({"status": response.status().as_u16(), "message": message}),
                );
            }
            Err(e) => {
                log::error(
                    "notify_failed",
                    json!({"error": e.to_string(), "message": message}),
                );
            }
        }
    }
}
