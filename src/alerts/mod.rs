//! # Alert Dispatch
//!
//! An alert backend delivers one notification per fired trigger. Two
//! backends exist: the console backend prints would-be alerts for dry runs,
//! the email backend sends them through a transactional mail service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::models::issue;
use crate::triggers::Trigger;

pub mod console;
pub mod email;
pub mod ses;

pub use console::ConsoleAlertBackend;
pub use email::{EmailAlertBackend, MailSender, OutboundMail};
pub use ses::SesMailSender;

/// Delivery capability for fired triggers.
#[async_trait]
pub trait AlertBackend: Send + Sync {
    /// Deliver one alert for `trigger` covering `issues`. An error aborts
    /// the watcher pass and keeps its run unfinished.
    async fn send_alert(
        &self,
        trigger: &Trigger,
        issues: &[issue::Model],
    ) -> Result<(), PipelineError>;
}

/// Comma-joined fingerprints, as used in alert bodies.
pub fn fingerprint_list(issues: &[issue::Model]) -> String {
    issues
        .iter()
        .map(|issue| issue.fingerprint.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the backend selected by the watcher configuration: console output
/// for dry runs, SES email otherwise.
pub async fn build_alert_backend(config: &AppConfig) -> Result<Arc<dyn AlertBackend>, PipelineError> {
    if config.watcher.dry_run {
        return Ok(Arc::new(ConsoleAlertBackend::stdout()));
    }

    let sender = SesMailSender::connect(&config.aws, config.watcher.ses_endpoint_url.as_deref())
        .await?;
    let backend = EmailAlertBackend::new(
        Arc::new(sender),
        config.watcher.from_email.clone(),
        config.watcher.verify_email,
    )
    .await;
    Ok(Arc::new(backend))
}
