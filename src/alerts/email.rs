//! Email alert backend.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{error, info, warn};

use crate::alerts::{AlertBackend, fingerprint_list};
use crate::error::PipelineError;
use crate::models::issue;
use crate::triggers::Trigger;

/// A single outgoing message handed to a [`MailSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub source: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// External transactional mail capability.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), PipelineError>;

    /// Ask the mail service to verify `address` as a sending identity.
    async fn verify_sender(&self, address: &str) -> Result<(), PipelineError>;
}

/// Sends one email per fired trigger.
///
/// Delivery is best-effort: a failed send is logged and counted but never
/// aborts the watcher pass, so the run still completes.
pub struct EmailAlertBackend {
    sender: Arc<dyn MailSender>,
    from_email: String,
}

impl EmailAlertBackend {
    /// When `verify_email` is set the sending address is verified once
    /// before the backend is handed out. A failed verification request is
    /// logged and counted; the backend is built regardless.
    pub async fn new(sender: Arc<dyn MailSender>, from_email: String, verify_email: bool) -> Self {
        if verify_email {
            match sender.verify_sender(&from_email).await {
                Ok(()) => info!(from_email = %from_email, "Requested sender verification"),
                Err(err) => {
                    counter!("alerts_email_verification_failures_total").increment(1);
                    warn!(
                        from_email = %from_email,
                        error = %err,
                        "Sender verification request failed"
                    );
                }
            }
        }
        Self { sender, from_email }
    }

    pub fn compose(&self, trigger: &Trigger, issues: &[issue::Model]) -> OutboundMail {
        OutboundMail {
            source: self.from_email.clone(),
            to: trigger.recipients().to_vec(),
            subject: format!("Alert: {}", trigger.name()),
            body: format!("Issues: {}", fingerprint_list(issues)),
        }
    }
}

#[async_trait]
impl AlertBackend for EmailAlertBackend {
    async fn send_alert(
        &self,
        trigger: &Trigger,
        issues: &[issue::Model],
    ) -> Result<(), PipelineError> {
        let mail = self.compose(trigger, issues);
        if let Err(err) = self.sender.send(&mail).await {
            counter!("alerts_email_failures_total").increment(1);
            error!(
                trigger = trigger.name(),
                recipients = %mail.to.join(","),
                error = %err,
                "Failed to send alert email"
            );
        }
        Ok(())
    }
}
