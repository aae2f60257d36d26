//! Notification delivery.
//!
//! A closed alert window becomes one report: subject from the accumulated
//! reasons, body with the recipient, the legend and a table of the last
//! cycles' rule-based actuator states.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::alerts::Notification;
use crate::error::{AdvisorError, Result};
use crate::models::{AdvisoryPacket, NutrientLevel, SwitchStatus};

// ---

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

pub fn subject(notification: &Notification) -> String {
    format!("ALERT: {}", notification.reasons.join(" + "))
}

fn switch_cell(status: SwitchStatus) -> &'static str {
    if status.is_active() {
        "ON"
    } else {
        "OFF"
    }
}

fn nutrient_cell(level: NutrientLevel) -> &'static str {
    if level == NutrientLevel::Low {
        "ON"
    } else {
        "OFF"
    }
}

fn clock(ts: f64) -> String {
    // ---
    DateTime::<Utc>::from_timestamp(ts.floor() as i64, 0)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

/// `TIME | IRR | NRG | N | P | K`, one row per packet, oldest first.
pub fn history_table(history: &[AdvisoryPacket]) -> String {
    // ---
    let mut rows = vec![
        format!(
            "{:<10} | {:<5} | {:<5} | {:<5} | {:<5} | {:<5}",
            "TIME", "IRR", "NRG", "N", "P", "K"
        ),
        "-".repeat(55),
    ];

    for packet in history {
        let rules = &packet.rules;
        rows.push(format!(
            "{:<10} | {:<5} | {:<5} | {:<5} | {:<5} | {:<5}",
            clock(packet.ts),
            switch_cell(rules.irrigation.status),
            switch_cell(rules.energy.status),
            nutrient_cell(rules.fertilization.n),
            nutrient_cell(rules.fertilization.p),
            nutrient_cell(rules.fertilization.k),
        ));
    }
    rows.join("\n")
}

pub fn render_report(notification: &Notification) -> String {
    // ---
    format!(
        "ACTUATOR REPORT\n\
         ---------------\n\
         Recipient: {recipient}\n\
         Alerts in window: {reasons}\n\
         \n\
         Legend:\n\
         ON  = actuator active / valve open / deficiency\n\
         OFF = parameters OK\n\
         \n\
         Last {cycles} cycles (UTC):\n\
         {table}\n",
        recipient = notification.recipient,
        reasons = notification.reasons.join(", "),
        cycles = notification.history.len(),
        table = history_table(&notification.history),
    )
}

/// Writes the report to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        // ---
        info!(
            recipient = %notification.recipient,
            subject = %subject(notification),
            "Notification\n{}",
            render_report(notification)
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    recipient: &'a str,
    subject: String,
    body: String,
    reasons: &'a [String],
    history: &'a [AdvisoryPacket],
}

/// POSTs the report as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        // ---
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("greenfield-advisor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdvisorError::SinkUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        // ---
        let body = WebhookBody {
            recipient: &notification.recipient,
            subject: subject(notification),
            body: render_report(notification),
            reasons: &notification.reasons,
            history: &notification.history,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdvisorError::SinkUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdvisorError::SinkUnavailable(format!(
                "webhook returned {status}: {text}"
            )));
        }
        debug!(%status, "Webhook accepted notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn notification() -> Notification {
        // ---
        let mut hot = AdvisoryPacket {
            ts: 3_600.0 * 14.0 + 61.0,
            ..AdvisoryPacket::default()
        };
        hot.rules.irrigation.status = SwitchStatus::On;
        hot.rules.energy.status = SwitchStatus::Active;
        hot.rules.fertilization.n = NutrientLevel::Low;
        hot.rules.fertilization.k = NutrientLevel::Check;

        Notification {
            recipient: "ops@farm.io".into(),
            reasons: vec!["IRRIGATION".into(), "ENERGY".into()],
            history: vec![AdvisoryPacket::default(), hot],
            opened_at: 0.0,
            closed_at: 3_661.0,
        }
    }

    #[test]
    fn test_subject_joins_reasons() {
        assert_eq!(subject(&notification()), "ALERT: IRRIGATION + ENERGY");
    }

    #[test]
    fn test_history_table_rows() {
        // ---
        let table = history_table(&notification().history);
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("TIME"));
        assert_eq!(
            lines[2],
            "00:00:00   | OFF   | OFF   | OFF   | OFF   | OFF  "
        );
        assert_eq!(
            lines[3],
            "14:01:01   | ON    | ON    | ON    | OFF   | OFF  "
        );
    }

    #[test]
    fn test_report_names_recipient_and_reasons() {
        // ---
        let report = render_report(&notification());
        assert!(report.contains("Recipient: ops@farm.io"));
        assert!(report.contains("Alerts in window: IRRIGATION, ENERGY"));
        assert!(report.contains("Last 2 cycles"));
    }

    #[tokio::test]
    async fn test_log_sink_always_accepts() {
        assert!(LogSink.deliver(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_sink_unavailable() {
        // ---
        let sink = WebhookSink::new("http://127.0.0.1:1/hook").unwrap();
        let err = sink.deliver(&notification()).await.unwrap_err();
        assert!(matches!(err, AdvisorError::SinkUnavailable(_)));
    }
}
