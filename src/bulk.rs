//! Sending one message to many recipients.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BulkConfig;
use crate::dispatch::{MessageContent, MessageDispatcher};
use crate::jid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Sent,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub recipient: String,
    pub status: BulkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkOutcome {
    pub fn is_sent(&self) -> bool {
        self.status == BulkStatus::Sent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOptions {
    /// Sends in flight at once; `0` and `1` both mean one at a time.
    pub concurrency: usize,
    /// Pause between sequential sends.
    pub delay: Duration,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            delay: Duration::ZERO,
        }
    }
}

impl From<&BulkConfig> for BulkOptions {
    fn from(config: &BulkConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// Send `content` to every recipient. Failures are recorded per recipient and
/// never stop the batch. Outcomes come back in input order.
pub async fn send_bulk(
    dispatcher: &MessageDispatcher,
    recipients: &[String],
    content: &MessageContent,
    options: BulkOptions,
) -> Vec<BulkOutcome> {
    let outcomes: Vec<BulkOutcome> = if options.concurrency <= 1 {
        let mut outcomes = Vec::with_capacity(recipients.len());
        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }
            outcomes.push(send_one(dispatcher, recipient, content).await);
        }
        outcomes
    } else {
        // Owned items keep the stream future free of higher-ranked borrows.
        stream::iter(recipients.iter().cloned())
            .map(|recipient| async move { send_one(dispatcher, &recipient, content).await })
            .buffered(options.concurrency)
            .collect()
            .await
    };

    let sent = outcomes.iter().filter(|o| o.is_sent()).count();
    info!(
        total = outcomes.len(),
        sent,
        failed = outcomes.len() - sent,
        kind = content.kind_name(),
        "Bulk send finished"
    );
    outcomes
}

async fn send_one(
    dispatcher: &MessageDispatcher,
    recipient: &str,
    content: &MessageContent,
) -> BulkOutcome {
    match dispatcher.send_message(recipient, content).await {
        Ok(receipt) => BulkOutcome {
            recipient: receipt.recipient.to_string(),
            status: BulkStatus::Sent,
            error: None,
        },
        Err(e) => {
            warn!(recipient, error = %e, "Bulk recipient failed");
            BulkOutcome {
                recipient: jid::normalize_recipient(recipient),
                status: BulkStatus::Error,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock;

    fn numbers(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, backend) = mock::connected_manager(tmp.path()).await;
        backend.reject_sends_to("15550000002");
        let dispatcher = MessageDispatcher::new(manager);

        let recipients = numbers(&[
            "15550000001",
            "abc",
            "15550000002",
            "15550000003",
            "12",
        ]);
        let outcomes = send_bulk(
            &dispatcher,
            &recipients,
            &MessageContent::text("sale today"),
            BulkOptions::default(),
        )
        .await;

        let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            [
                BulkStatus::Sent,
                BulkStatus::Error,
                BulkStatus::Error,
                BulkStatus::Sent,
                BulkStatus::Error,
            ]
        );
        assert_eq!(outcomes[0].recipient, "15550000001@s.whatsapp.net");
        assert_eq!(outcomes[1].recipient, "abc@s.whatsapp.net");
        assert!(outcomes[2].error.as_deref().unwrap().contains("not on WhatsApp"));
        assert_eq!(backend.sent().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_pool_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, backend) = mock::connected_manager(tmp.path()).await;
        let dispatcher = MessageDispatcher::new(manager);

        let recipients: Vec<String> = (0..10).map(|i| format!("1555000{i:04}")).collect();
        let outcomes = send_bulk(
            &dispatcher,
            &recipients,
            &MessageContent::text("hi"),
            BulkOptions {
                concurrency: 4,
                delay: Duration::ZERO,
            },
        )
        .await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(BulkOutcome::is_sent));
        for (outcome, input) in outcomes.iter().zip(&recipients) {
            assert_eq!(outcome.recipient, format!("{input}@s.whatsapp.net"));
        }
        assert_eq!(backend.sent().len(), 10);
    }

    #[tokio::test]
    async fn concurrent_pool_runs_on_a_spawned_task() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, backend) = mock::connected_manager(tmp.path()).await;
        let dispatcher = MessageDispatcher::new(manager);
        let recipients = numbers(&["15550000001", "15550000002", "15550000003"]);
        let content = MessageContent::text("hi");

        let outcomes = tokio::spawn(async move {
            let options = BulkOptions {
                concurrency: 2,
                delay: Duration::ZERO,
            };
            send_bulk(&dispatcher, &recipients, &content, options).await
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(BulkOutcome::is_sent));
        assert_eq!(backend.sent().len(), 3);
    }

    #[tokio::test]
    async fn disconnected_session_fails_every_recipient() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, backend) = mock::connected_manager(tmp.path()).await;
        manager.disconnect().await;
        let dispatcher = MessageDispatcher::new(manager);

        let outcomes = send_bulk(
            &dispatcher,
            &numbers(&["15550000001", "15550000002"]),
            &MessageContent::text("hi"),
            BulkOptions::default(),
        )
        .await;
        assert!(outcomes.iter().all(|o| o.status == BulkStatus::Error));
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn outcome_json_omits_empty_error() {
        let json = serde_json::to_value(BulkOutcome {
            recipient: "15550000001@s.whatsapp.net".into(),
            status: BulkStatus::Sent,
            error: None,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"recipient": "15550000001@s.whatsapp.net", "status": "sent"})
        );
    }
}
