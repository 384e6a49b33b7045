use crate::api::{WebhookAck, WebhookStatus};
use std::sync::Arc;
use terrapin_execution::{BrokerKind, error::BrokerError, webhook::WebhookIntake};

/// Public face of the webhook intake: `POST /webhooks/{broker_kind}` binds
/// here.
///
/// Brokers deliver at-least-once; the intake's dedup plus the lifecycle's
/// declared transitions make application at-most-once, so the only errors a
/// broker ever sees are signature (401-class) and malformed-body failures.
#[derive(Debug)]
pub struct WebhookService {
    intake: Arc<WebhookIntake>,
}

impl WebhookService {
    pub fn new(intake: Arc<WebhookIntake>) -> Self {
        Self { intake }
    }

    /// Handle one raw delivery. Resulting order events are broadcast by the
    /// lifecycle's hub listener as transitions apply.
    pub fn handle(
        &self,
        kind: BrokerKind,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, BrokerError> {
        let receipt = self.intake.process(kind, raw_body, signature)?;

        Ok(WebhookAck {
            status: if receipt.duplicate {
                WebhookStatus::Duplicate
            } else {
                WebhookStatus::Ok
            },
            webhook_id: receipt.webhook_id,
        })
    }

    pub fn duplicate_count(&self) -> u64 {
        self.intake.duplicate_count()
    }

    pub fn failed_transition_count(&self) -> u64 {
        self.intake.failed_transition_count()
    }
}
