//! Telegram Bot API transport (sendMessage, Markdown).

use crate::{format_findings, format_usage, truncate_body, Channel, ChannelError, ChannelResult, Report};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Telegram caps a message at 4096 characters; leave room for the frame.
const BODY_CAP: usize = 3800;

pub struct TelegramChannel {
    name: String,
    chat_id: String,
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(name: &str, chat_id: &str, bot_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            chat_id: chat_id.to_string(),
            bot_token,
            client,
        }
    }

    /// Set the resolved bot token (after secret resolution).
    pub fn set_bot_token(&mut self, token: String) {
        self.bot_token = token;
    }
}

fn format_message(report: &Report) -> String {
    let mut out = format!(
        "{} *{} {}*\n{}\n",
        report.severity.icon(),
        report.emoji,
        report.agent,
        report.summary
    );
    if !report.body.is_empty() {
        out.push('\n');
        out.push_str(&truncate_body(&report.body, BODY_CAP));
        out.push('\n');
    }
    if !report.findings.is_empty() {
        out.push('\n');
        out.push_str(&format_findings(&report.findings));
    }
    if let Some(usage) = &report.usage {
        out.push_str(&format!("\n_{}_", format_usage(usage)));
    }
    out
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send(&self, report: &Report) -> ChannelResult<()> {
        if self.bot_token.is_empty() {
            return Err(ChannelError::Send {
                name: self.name.clone(),
                message: "telegram bot token not set".to_string(),
            });
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": format_message(report),
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Send {
                name: self.name.clone(),
                message: format!("send to telegram: {e}"),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Send {
                name: self.name.clone(),
                message: format!("telegram returned {status}: {}", truncate_body(&body, 256)),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use chrono::Utc;

    #[test]
    fn message_stays_under_telegram_cap() {
        let report = Report {
            agent: "watchman".into(),
            emoji: "🔭".into(),
            run_name: "watchman-1".into(),
            severity: Severity::Failure,
            summary: "run failed".into(),
            body: "y".repeat(10_000),
            findings: vec![],
            usage: None,
            guardrails: None,
            timestamp: Utc::now(),
        };
        let text = format_message(&report);
        assert!(text.len() <= 4096);
        assert!(text.contains("*🔭 watchman*"));
    }

    #[tokio::test]
    async fn missing_token_surfaces_error() {
        let ch = TelegramChannel::new("ops", "12345", String::new());
        let report = Report {
            agent: "a".into(),
            emoji: String::new(),
            run_name: "r".into(),
            severity: Severity::Info,
            summary: "s".into(),
            body: String::new(),
            findings: vec![],
            usage: None,
            guardrails: None,
            timestamp: Utc::now(),
        };
        assert!(ch.send(&report).await.is_err());
    }
}
