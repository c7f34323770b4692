// warden-core/src/providers/webhook.rs
//! Notification channel that POSTs each report as JSON to a webhook.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{NotificationChannel, ProviderResult};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    channel: &'a str,
    subject: &'a str,
    body: &'a str,
    attributes: &'a BTreeMap<String, String>,
}

pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: &str) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::new("WebhookClient", e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

/// Message id from a JSON response body (`messageId` or `id`), if any.
fn message_id_from(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["messageId", "MessageId", "id"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()).map(str::to_string))
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn publish(
        &self,
        channel: &str,
        subject: &str,
        body: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ProviderResult<String> {
        let payload = WebhookPayload {
            channel,
            subject,
            body,
            attributes,
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let code = if e.is_timeout() { "WebhookTimeout" } else { "WebhookTransport" };
                ProviderError::new(code, e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                format!("Http{}", status.as_u16()),
                format!("webhook answered {}", status),
            ));
        }
        let text = resp.text().await.unwrap_or_default();
        let id = message_id_from(&text).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        debug!("webhook accepted report for channel {}", channel);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_taken_from_common_fields() {
        assert_eq!(message_id_from(r#"{"messageId":"m-1"}"#).as_deref(), Some("m-1"));
        assert_eq!(message_id_from(r#"{"id":"42"}"#).as_deref(), Some("42"));
        assert_eq!(message_id_from("ok"), None);
    }

    #[tokio::test]
    async fn unreachable_webhook_is_a_provider_error() {
        let channel = WebhookChannel::new("http://127.0.0.1:9/hook").unwrap();
        let err = channel
            .publish("high", "s", "b", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.code.starts_with("Webhook"), "{}", err.code);
    }
}
