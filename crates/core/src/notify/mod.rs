//! Notification payload assembly and the transport seam.
//!
//! The engine only decides who to notify and what to tell them; rendering
//! and actual delivery live behind [`NotificationTransport`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Email,
    Sns,
}

/// A notification target in `protocol:address` form, e.g.
/// `email:ops@example.com` or `sns:arn:aws:sns:...:intake-alerts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub protocol: Protocol,
    pub address: String,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("pattern is valid"))
}

impl Recipient {
    pub fn parse(raw: &str) -> Result<Recipient, NotifyError> {
        let (protocol, address) = raw
            .split_once(':')
            .ok_or_else(|| NotifyError::InvalidRecipient(raw.to_string()))?;
        match protocol {
            "email" => {
                if email_pattern().is_match(address) {
                    Ok(Recipient {
                        protocol: Protocol::Email,
                        address: address.to_string(),
                    })
                } else {
                    Err(NotifyError::InvalidRecipient(raw.to_string()))
                }
            }
            "sns" => Ok(Recipient {
                protocol: Protocol::Sns,
                address: address.to_string(),
            }),
            _ => Err(NotifyError::InvalidRecipient(raw.to_string())),
        }
    }
}

/// Who gets told about which outcomes.
#[derive(Debug, Clone, Default)]
pub struct NotifyParams {
    pub success_recipients: Vec<String>,
    pub error_recipients: Vec<String>,
    pub owner_recipients: Vec<String>,
    pub notify_owner_success: bool,
    pub notify_owner_error: bool,
}

/// Everything a transport needs to render a notification.
#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub input_file: String,
    pub result: String,
    pub start_time: DateTime<Utc>,
    pub checks_summary: Option<String>,
    pub file_table_columns: Vec<&'static str>,
    pub file_table_rows: Vec<Vec<String>>,
    pub error_details: Option<String>,
    pub upload_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub sent: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> Vec<RecipientOutcome>;
}

/// Fallback transport: logs the payload instead of delivering anything.
/// Used when no real transport is wired in.
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> Vec<RecipientOutcome> {
        recipients
            .iter()
            .map(|r| {
                info!(
                    "notification for '{}' ({}): {}",
                    r.address, payload.result, payload.input_file
                );
                RecipientOutcome {
                    recipient: r.address.clone(),
                    sent: true,
                    error: None,
                }
            })
            .collect()
    }
}

/// Which recipient list an outcome goes to.
///
/// Processing outcomes go to the uploader-facing lists; a system error
/// goes straight to the pipeline owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Success,
    Error,
    SystemError,
}

pub struct Notifier {
    transport: std::sync::Arc<dyn NotificationTransport>,
    params: NotifyParams,
}

impl Notifier {
    pub fn new(
        transport: std::sync::Arc<dyn NotificationTransport>,
        params: NotifyParams,
    ) -> Self {
        Self { transport, params }
    }

    fn recipient_strings(&self, audience: Audience) -> Vec<String> {
        let (mut raw, echo_owners) = match audience {
            Audience::Success => (
                self.params.success_recipients.clone(),
                self.params.notify_owner_success,
            ),
            Audience::Error => (
                self.params.error_recipients.clone(),
                self.params.notify_owner_error,
            ),
            Audience::SystemError => (self.params.owner_recipients.clone(), false),
        };
        if echo_owners {
            for owner in &self.params.owner_recipients {
                if !raw.contains(owner) {
                    raw.push(owner.clone());
                }
            }
        }
        raw
    }

    /// Notify everyone configured for this outcome. Unparseable recipients
    /// become failed outcomes; they never abort the rest of the send.
    pub async fn notify(
        &self,
        audience: Audience,
        payload: &NotificationPayload,
    ) -> Vec<RecipientOutcome> {
        let raw = self.recipient_strings(audience);
        if raw.is_empty() {
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        let mut valid = Vec::new();
        for entry in &raw {
            match Recipient::parse(entry) {
                Ok(recipient) => valid.push(recipient),
                Err(e) => {
                    warn!("skipping notification recipient: {}", e);
                    outcomes.push(RecipientOutcome {
                        recipient: entry.clone(),
                        sent: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if !valid.is_empty() {
            info!("notifying {} recipient(s)", valid.len());
            outcomes.extend(self.transport.send(&valid, payload).await);
        }
        outcomes
    }
}
