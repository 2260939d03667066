//! Generic JSON POST transport.

use crate::{Channel, ChannelError, ChannelResult, Report};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookChannel {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: &str, url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client,
        }
    }
}

/// The JSON structure sent to generic webhook sinks.
#[derive(Serialize)]
pub struct WebhookPayload {
    pub agent: String,
    pub emoji: String,
    #[serde(rename = "runName")]
    pub run_name: String,
    pub severity: String,
    pub summary: String,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<WebhookFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<WebhookUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<WebhookGuardrails>,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct WebhookFinding {
    pub severity: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct WebhookUsage {
    #[serde(rename = "tokensIn")]
    pub tokens_in: u64,
    #[serde(rename = "tokensOut")]
    pub tokens_out: u64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: u64,
    pub iterations: u32,
    #[serde(rename = "wallClockMs")]
    pub wall_clock_ms: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cost: String,
}

#[derive(Serialize)]
pub struct WebhookGuardrails {
    #[serde(rename = "checksPerformed")]
    pub checks_performed: u32,
    #[serde(rename = "actionsBlocked")]
    pub actions_blocked: u32,
    #[serde(rename = "escalationsTriggered")]
    pub escalations_triggered: u32,
    #[serde(rename = "autonomyCeiling")]
    pub autonomy_ceiling: String,
}

pub(crate) fn build_payload(report: &Report) -> WebhookPayload {
    WebhookPayload {
        agent: report.agent.clone(),
        emoji: report.emoji.clone(),
        run_name: report.run_name.clone(),
        severity: report.severity.as_str().to_string(),
        summary: report.summary.clone(),
        body: report.body.clone(),
        findings: report
            .findings
            .iter()
            .map(|f| WebhookFinding {
                severity: format!("{:?}", f.severity).to_lowercase(),
                resource: f.resource.clone(),
                message: f.message.clone(),
            })
            .collect(),
        usage: report.usage.as_ref().map(|u| WebhookUsage {
            tokens_in: u.tokens_in,
            tokens_out: u.tokens_out,
            total_tokens: u.total_tokens,
            iterations: u.iterations,
            wall_clock_ms: u.wall_clock_ms,
            cost: u.estimated_cost.clone(),
        }),
        guardrails: report.guardrails.as_ref().map(|g| WebhookGuardrails {
            checks_performed: g.checks_performed,
            actions_blocked: g.actions_blocked,
            escalations_triggered: g.escalations_triggered,
            autonomy_ceiling: g.autonomy_ceiling.clone(),
        }),
        timestamp: report.timestamp.to_rfc3339(),
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    async fn send(&self, report: &Report) -> ChannelResult<()> {
        let payload = build_payload(report);
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Send {
                name: self.name.clone(),
                message: format!("send to webhook {}: {e}", self.url),
            })?;

        if resp.status().as_u16() >= 400 {
            let status = resp.status();
            return Err(ChannelError::Send {
                name: self.name.clone(),
                message: format!("webhook {} returned {status}", self.url),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "webhook"
    }
}
