//! Mock notification transport for testing.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::notify::{NotificationPayload, NotificationTransport, Recipient, RecipientOutcome};

/// One recorded notification send, for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedNotification {
    pub recipients: Vec<String>,
    pub result: String,
    pub error_details: Option<String>,
}

/// [`NotificationTransport`] that records every send and reports success.
#[derive(Default)]
pub struct MockTransport {
    sends: Mutex<Vec<RecordedNotification>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sends(&self) -> Vec<RecordedNotification> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for MockTransport {
    async fn send(
        &self,
        recipients: &[Recipient],
        payload: &NotificationPayload,
    ) -> Vec<RecipientOutcome> {
        self.sends.lock().unwrap().push(RecordedNotification {
            recipients: recipients.iter().map(|r| r.address.clone()).collect(),
            result: payload.result.clone(),
            error_details: payload.error_details.clone(),
        });
        recipients
            .iter()
            .map(|r| RecipientOutcome {
                recipient: r.address.clone(),
                sent: true,
                error: None,
            })
            .collect()
    }
}
