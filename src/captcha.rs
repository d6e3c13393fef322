use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::CaptchaSettings;

/// Narrow contract of the captcha-solving service.
///
/// `None` means unsolved; implementations never fail with an error.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, challenge_url: &str) -> Option<String>;
}

/// Client for the Anti-Captcha `ImageToTextTask` API.
pub struct AntiCaptchaSolver {
    client: Client,
    api_url: String,
    api_key: String,
    poll_attempts: u32,
    poll_delay: Duration,
    budget: Duration,
}

impl AntiCaptchaSolver {
    /// Returns `None` when no API key is configured.
    pub fn from_settings(settings: &CaptchaSettings) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| tracing::error!("Failed to create captcha client: {}", e))
            .ok()?;

        Some(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key,
            poll_attempts: settings.poll_attempts,
            poll_delay: settings.poll_delay,
            budget: settings.budget,
        })
    }

    async fn create_task(&self, challenge_url: &str) -> Option<i64> {
        let response = self.client.get(challenge_url).send().await.ok()?;
        if !response.status().is_success() {
            tracing::warn!("Captcha image download returned {}", response.status());
            return None;
        }
        let image = response.bytes().await.ok()?;

        let payload = json!({
            "clientKey": self.api_key,
            "task": {
                "type": "ImageToTextTask",
                "body": base64::engine::general_purpose::STANDARD.encode(&image),
                "phrase": false,
                "case": false,
                "numeric": 0,
                "math": false,
                "minLength": 0,
                "maxLength": 0
            }
        });

        let task: Value = self
            .client
            .post(format!("{}/createTask", self.api_url))
            .json(&payload)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let task_id = task.get("taskId").and_then(Value::as_i64);
        if task_id.is_none() {
            let reason = task
                .get("errorDescription")
                .and_then(Value::as_str)
                .unwrap_or("no taskId in response");
            tracing::warn!("Captcha task rejected: {}", reason);
        }
        task_id
    }

    async fn poll_result(&self, task_id: i64) -> Option<String> {
        let payload = json!({ "clientKey": self.api_key, "taskId": task_id });

        for attempt in 1..=self.poll_attempts {
            let result: Value = self
                .client
                .post(format!("{}/getTaskResult", self.api_url))
                .json(&payload)
                .send()
                .await
                .ok()?
                .json()
                .await
                .ok()?;

            match result.get("status").and_then(Value::as_str) {
                Some("ready") => {
                    return result
                        .pointer("/solution/text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .filter(|text| !text.is_empty());
                }
                Some("processing") => {
                    tracing::debug!(
                        "Captcha task {} still processing (attempt {}/{})",
                        task_id,
                        attempt,
                        self.poll_attempts
                    );
                    tokio::time::sleep(self.poll_delay).await;
                }
                _ => {
                    tracing::warn!("Captcha task {} failed: {}", task_id, result);
                    return None;
                }
            }
        }

        tracing::warn!(
            "Captcha task {} not ready after {} attempts",
            task_id,
            self.poll_attempts
        );
        None
    }
}

#[async_trait]
impl CaptchaSolver for AntiCaptchaSolver {
    async fn solve(&self, challenge_url: &str) -> Option<String> {
        let attempt = async {
            let task_id = self.create_task(challenge_url).await?;
            self.poll_result(task_id).await
        };

        match tokio::time::timeout(self.budget, attempt).await {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!("Captcha solve exceeded budget of {:?}", self.budget);
                None
            }
        }
    }
}
