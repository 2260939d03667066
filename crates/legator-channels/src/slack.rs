//! Slack-webhook-compatible transport.

use crate::{format_findings, format_usage, truncate_body, Channel, ChannelError, ChannelResult, Report};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Slack caps a section block at 3000 characters.
const BODY_CAP: usize = 2900;

pub struct SlackChannel {
    name: String,
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(name: &str, webhook_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            webhook_url: webhook_url.to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct SlackPayload {
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    blocks: Vec<SlackBlock>,
}

#[derive(Serialize)]
struct SlackBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: SlackText,
}

#[derive(Serialize)]
struct SlackText {
    #[serde(rename = "type")]
    text_type: &'static str,
    text: String,
}

fn format_message(report: &Report) -> SlackPayload {
    let header = format!(
        "{} {} {} — {}",
        report.severity.icon(),
        report.emoji,
        report.agent,
        report.summary
    );

    let mut blocks = vec![SlackBlock {
        block_type: "header",
        text: SlackText {
            text_type: "plain_text",
            text: header.clone(),
        },
    }];

    if !report.body.is_empty() {
        blocks.push(SlackBlock {
            block_type: "section",
            text: SlackText {
                text_type: "mrkdwn",
                text: truncate_body(&report.body, BODY_CAP),
            },
        });
    }

    if !report.findings.is_empty() {
        blocks.push(SlackBlock {
            block_type: "section",
            text: SlackText {
                text_type: "mrkdwn",
                text: format_findings(&report.findings),
            },
        });
    }

    if let Some(usage) = &report.usage {
        blocks.push(SlackBlock {
            block_type: "context",
            text: SlackText {
                text_type: "mrkdwn",
                text: format_usage(usage),
            },
        });
    }

    SlackPayload {
        text: header,
        blocks,
    }
}

#[async_trait]
impl Channel for SlackChannel {
    async fn send(&self, report: &Report) -> ChannelResult<()> {
        let payload = format_message(report);
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Send {
                name: self.name.clone(),
                message: format!("send to slack: {e}"),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Send {
                name: self.name.clone(),
                message: format!("slack returned {status}: {}", truncate_body(&body, 256)),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use chrono::Utc;

    fn make_report(body: String) -> Report {
        Report {
            agent: "watchman".into(),
            emoji: "🔭".into(),
            run_name: "watchman-1".into(),
            severity: Severity::Warning,
            summary: "3 pods restarting".into(),
            body,
            findings: vec![],
            usage: None,
            guardrails: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn header_and_body_blocks() {
        let payload = format_message(&make_report("details here".into()));
        assert!(payload.text.contains("watchman"));
        assert_eq!(payload.blocks.len(), 2);
        assert_eq!(payload.blocks[0].block_type, "header");
        assert_eq!(payload.blocks[1].text.text, "details here");
    }

    #[test]
    fn body_respects_slack_cap() {
        let payload = format_message(&make_report("x".repeat(10_000)));
        assert!(payload.blocks[1].text.text.len() <= 3000);
    }
}
