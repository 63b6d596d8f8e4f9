//! Threshold notifications.
//!
//! The notifier decides what to send and to whom; a
//! [`NotificationTransport`] does the actual delivery. Delivery is
//! best-effort: transport failures are logged and counted, never returned
//! to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use commerce_core::{MeteringResult, Metric};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::plans::AdminContact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "webhook")]
    Webhook,
    #[serde(rename = "in-app")]
    InApp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::InApp => "in-app",
        }
    }
}

/// One outbound message handed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

/// Delivery primitives, one per channel.
pub trait NotificationTransport: Send + Sync {
    fn send_email(&self, message: &Notification) -> MeteringResult<()>;
    fn send_webhook(&self, message: &Notification) -> MeteringResult<()>;
    fn send_in_app(&self, message: &Notification) -> MeteringResult<()>;
}

/// Transport that keeps every message in memory.
#[derive(Default)]
pub struct OutboxTransport {
    sent: Mutex<Vec<Notification>>,
}

impl OutboxTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn push(&self, message: &Notification) -> MeteringResult<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

impl NotificationTransport for OutboxTransport {
    fn send_email(&self, message: &Notification) -> MeteringResult<()> {
        self.push(message)
    }

    fn send_webhook(&self, message: &Notification) -> MeteringResult<()> {
        self.push(message)
    }

    fn send_in_app(&self, message: &Notification) -> MeteringResult<()> {
        self.push(message)
    }
}

/// Transport that only emits a structured log line per message.
pub struct LogTransport;

impl LogTransport {
    fn log(message: &Notification) -> MeteringResult<()> {
        info!(
            channel = message.channel.as_str(),
            recipient = %message.recipient,
            subject = %message.subject,
            "Usage alert dispatched"
        );
        Ok(())
    }
}

impl NotificationTransport for LogTransport {
    fn send_email(&self, message: &Notification) -> MeteringResult<()> {
        Self::log(message)
    }

    fn send_webhook(&self, message: &Notification) -> MeteringResult<()> {
        Self::log(message)
    }

    fn send_in_app(&self, message: &Notification) -> MeteringResult<()> {
        Self::log(message)
    }
}

/// Fans threshold alerts out to every channel present in a contact.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn NotificationTransport>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    /// Send the threshold alert over email, webhook and in-app, for each
    /// one the contact has. Returns the messages the transport accepted.
    pub fn notify_threshold(
        &self,
        contact: &AdminContact,
        metric: Metric,
        value: f64,
        limit: f64,
        threshold: f64,
    ) -> Vec<Notification> {
        let pct = threshold * 100.0;
        let subject = format!("{metric} usage at {pct:.0}% of plan");
        let body = format!(
            "Usage for {metric} reached {value} of {limit} ({pct:.0}%). \
             Consider upgrading your plan or reducing consumption."
        );
        let metadata = BTreeMap::from([
            ("metric".to_string(), metric.to_string()),
            ("value".to_string(), value.to_string()),
            ("limit".to_string(), limit.to_string()),
            ("threshold".to_string(), threshold.to_string()),
        ]);

        let targets = [
            (Channel::Email, &contact.email),
            (Channel::Webhook, &contact.webhook_url),
            (Channel::InApp, &contact.in_app_user_id),
        ];

        let mut delivered = Vec::new();
        for (channel, recipient) in targets {
            let Some(recipient) = recipient.as_deref().filter(|r| !r.is_empty()) else {
                continue;
            };
            let message = Notification {
                channel,
                recipient: recipient.to_string(),
                subject: subject.clone(),
                body: body.clone(),
                metadata: metadata.clone(),
            };
            let result = match channel {
                Channel::Email => self.transport.send_email(&message),
                Channel::Webhook => self.transport.send_webhook(&message),
                Channel::InApp => self.transport.send_in_app(&message),
            };
            match result {
                Ok(()) => {
                    metrics::counter!("notifier.sent", "channel" => channel.as_str()).increment(1);
                    delivered.push(message);
                }
                Err(e) => {
                    metrics::counter!("notifier.failed", "channel" => channel.as_str())
                        .increment(1);
                    warn!(
                        channel = channel.as_str(),
                        recipient = %recipient,
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        }
        delivered
    }
}
