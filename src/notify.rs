//! Outbound webhook notifications.
//!
//! Posts one IFTTT-shaped payload (`value1`/`value2`/`value3`) per appended
//! row when a webhook URL is configured. Notification failures are logged
//! and swallowed; they never affect the cycle or the watermark.

use tracing::{info, warn};
use url::Url;

use crate::models::{EnrichedRecord, OPINION_FALLBACK, SUMMARY_FALLBACK};

/// Fire-and-forget webhook client. With no URL configured every call is a
/// no-op, so the pipeline can invoke it unconditionally.
#[derive(Debug)]
pub struct Notifier {
    http: reqwest::Client,
    webhook_url: Option<Url>,
}

impl Notifier {
    pub fn new(webhook_url: Option<&str>) -> Self {
        let webhook_url = webhook_url.and_then(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(url = raw, error = %e, "Invalid webhook URL; notifications disabled");
                None
            }
        });
        Notifier {
            http: reqwest::Client::new(),
            webhook_url,
        }
    }

    /// Announce one appended row.
    pub async fn row_appended(&self, record: &EnrichedRecord) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let payload = serde_json::json!({
            "value1": format!("New story on the front page (id {})", record.source_id),
            "value2": record.summary.as_deref().unwrap_or(SUMMARY_FALLBACK),
            "value3": record.opinion.as_deref().unwrap_or(OPINION_FALLBACK),
        });

        match self.http.post(url.clone()).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!(id = record.source_id, "Webhook notified");
            }
            Ok(response) => {
                warn!(
                    id = record.source_id,
                    status = response.status().as_u16(),
                    "Webhook rejected notification"
                );
            }
            Err(e) => {
                warn!(id = record.source_id, error = %e, "Webhook notification failed");
            }
        }
    }
}
