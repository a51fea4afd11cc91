//! Slack notification dispatch
//!
//! Restart alerts are posted to an incoming webhook as a single attachment.
//! A pod can route its alerts to another channel with the
//! `alert-slack-channel` annotation or label.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::models::{Notification, PodKey};

/// Annotation or label naming the channel for a pod's alerts
pub const CHANNEL_KEY: &str = "alert-slack-channel";

pub const DEFAULT_CHANNEL: &str = "restart-info-nonprod";
pub const DEFAULT_USERNAME: &str = "k8s-pod-restart-info-collector";
pub const DEFAULT_CLUSTER_NAME: &str = "cluster-name";

const ICON_EMOJI: &str = ":kubernetes:";
const COLOR: &str = "#4599DF";

/// Delivers a notification to a chat channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `notification`; `None` targets the default channel
    async fn send(&self, notification: &Notification, channel: Option<&str>) -> Result<()>;
}

/// Channel override from the pod's annotations, then its labels
///
/// Empty values are treated as absent.
pub fn channel_for_pod(pod: &Pod) -> Option<String> {
    let lookup = |map: &Option<BTreeMap<String, String>>| {
        map.as_ref()
            .and_then(|m| m.get(CHANNEL_KEY))
            .filter(|c| !c.is_empty())
            .cloned()
    };
    lookup(&pod.metadata.annotations).or_else(|| lookup(&pod.metadata.labels))
}

/// Title, body and footer of a restart alert
pub fn restart_notification(cluster: &str, pod: &PodKey, body: String) -> Notification {
    Notification {
        title: format!(
            "*Pod restarted!*\n*cluster: `{cluster}`, pod: `{}`, namespace: `{}`*",
            pod.name, pod.namespace
        ),
        body,
        footer: format!("{cluster}, {}, {}", pod.name, pod.namespace),
    }
}

/// Webhook settings and message branding
#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub default_channel: String,
    pub username: String,
    pub cluster_name: String,
}

impl SlackConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            default_channel: DEFAULT_CHANNEL.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    username: &'a str,
    channel: &'a str,
    icon_emoji: &'a str,
    attachments: [Attachment<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    color: &'a str,
    pretext: &'a str,
    text: &'a str,
    footer: &'a str,
    mrkdwn_in: [&'a str; 2],
    ts: i64,
}

/// [`Notifier`] posting to a Slack incoming webhook
pub struct SlackNotifier {
    config: SlackConfig,
    client: Client,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn resolve_channel<'a>(&'a self, channel: Option<&'a str>) -> &'a str {
        channel
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.config.default_channel)
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, notification: &Notification, channel: Option<&str>) -> Result<()> {
        let channel = self.resolve_channel(channel);
        let message = WebhookMessage {
            username: &self.config.username,
            channel,
            icon_emoji: ICON_EMOJI,
            attachments: [Attachment {
                color: COLOR,
                pretext: &notification.title,
                text: &notification.body,
                footer: &notification.footer,
                mrkdwn_in: ["text", "pretext"],
                ts: Utc::now().timestamp(),
            }],
        };

        debug!(channel, body_bytes = notification.body.len(), "Posting to Slack webhook");
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&message)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(channel, %status, response = %body, "Sending to Slack channel failed");
            return Err(Error::Notify(format!("webhook returned {status}: {body}")));
        }

        info!(channel, title = %notification.title.replace('\n', " "), "Sent to Slack");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PodBuilder;
    use mockito::Matcher;
    use serde_json::json;

    fn notification() -> Notification {
        restart_notification("prod", &PodKey::new("ns", "foo"), "body text".to_string())
    }

    fn notifier(url: String) -> SlackNotifier {
        let mut config = SlackConfig::new(url);
        config.username = "restart-bot".to_string();
        SlackNotifier::new(config).unwrap()
    }

    #[test]
    fn test_channel_precedence() {
        let pod = PodBuilder::new("ns", "p")
            .annotation(CHANNEL_KEY, "from-annotation")
            .label(CHANNEL_KEY, "from-label")
            .build();
        assert_eq!(channel_for_pod(&pod).as_deref(), Some("from-annotation"));

        let pod = PodBuilder::new("ns", "p").label(CHANNEL_KEY, "from-label").build();
        assert_eq!(channel_for_pod(&pod).as_deref(), Some("from-label"));

        let pod = PodBuilder::new("ns", "p")
            .annotation(CHANNEL_KEY, "")
            .label(CHANNEL_KEY, "from-label")
            .build();
        assert_eq!(channel_for_pod(&pod).as_deref(), Some("from-label"));

        assert_eq!(channel_for_pod(&PodBuilder::new("ns", "p").build()), None);
    }

    #[test]
    fn test_restart_notification_text() {
        let n = notification();
        assert_eq!(
            n.title,
            "*Pod restarted!*\n*cluster: `prod`, pod: `foo`, namespace: `ns`*"
        );
        assert_eq!(n.footer, "prod, foo, ns");
    }

    #[tokio::test]
    async fn test_send_posts_webhook_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "username": "restart-bot",
                "channel": "team-alerts",
                "icon_emoji": ":kubernetes:",
                "attachments": [{
                    "color": "#4599DF",
                    "text": "body text",
                    "footer": "prod, foo, ns",
                    "mrkdwn_in": ["text", "pretext"],
                }],
            })))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let notifier = notifier(format!("{}/hook", server.url()));
        notifier.send(&notification(), Some("team-alerts")).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_defaults_channel() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({ "channel": DEFAULT_CHANNEL })))
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let notifier = notifier(format!("{}/hook", server.url()));
        notifier.send(&notification(), Some("")).await.unwrap();
        notifier.send(&notification(), None).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_fails_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(404)
            .with_body("channel_not_found")
            .create_async()
            .await;

        let notifier = notifier(format!("{}/hook", server.url()));
        let err = notifier.send(&notification(), None).await.unwrap_err();

        assert!(matches!(err, Error::Notify(ref msg) if msg.contains("channel_not_found")));
    }
}
