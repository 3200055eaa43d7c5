//! Optional webhook notifications for pipeline runs.
//!
//! Posts a Discord-style embed. Delivery problems are logged and never
//! fail the run.

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, warn};

const USERNAME: &str = "isoverlap";
const COLOR_STARTED: u32 = 0x3498DB;
const COLOR_SUCCESS: u32 = 0x00FF00;
const COLOR_FAILURE: u32 = 0xFF0000;

#[derive(Serialize, Debug)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Serialize, Debug)]
struct Payload {
    username: String,
    embeds: Vec<Embed>,
}

pub struct RunNotifier {
    url: String,
    client: reqwest::Client,
}

impl RunNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn started(&self, prefix: &str, points: usize) {
        self.notify(
            &format!("Run {} started", prefix),
            &format!("Enriching {} points", points),
            COLOR_STARTED,
        )
        .await;
    }

    pub async fn finished(&self, prefix: &str, summary: &str) {
        self.notify(&format!("Run {} finished", prefix), summary, COLOR_SUCCESS)
            .await;
    }

    pub async fn failed(&self, prefix: &str, reason: &str) {
        self.notify(&format!("Run {} failed", prefix), reason, COLOR_FAILURE)
            .await;
    }

    async fn notify(&self, title: &str, description: &str, color: u32) {
        if let Err(e) = self.send(title, description, color).await {
            warn!("Notification '{}' not delivered: {:#}", title, e);
        }
    }

    async fn send(&self, title: &str, description: &str, color: u32) -> Result<()> {
        let payload = Payload {
            username: USERNAME.to_string(),
            embeds: vec![Embed {
                title: title.to_string(),
                description: description.to_string(),
                color,
                timestamp: chrono::Utc::now().to_rfc3339(),
            }],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            error!("Webhook rejected notification: {}", error_text);
            anyhow::bail!("webhook notification failed: {}", error_text);
        }

        info!("Sent notification: {}", title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail() {
        // Nothing listens on port 9 locally; the send fails and is swallowed
        let notifier = RunNotifier::new("http://127.0.0.1:9/hook");
        notifier.failed("run1", "upload-polygons: rejected").await;
    }

    #[test]
    fn test_payload_shape() {
        let payload = Payload {
            username: USERNAME.to_string(),
            embeds: vec![Embed {
                title: "t".to_string(),
                description: "d".to_string(),
                color: COLOR_SUCCESS,
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["embeds"][0]["color"], 0x00FF00);
        assert_eq!(json["username"], "isoverlap");
    }
}
