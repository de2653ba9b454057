//! Console alert backend used for dry runs.

use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::alerts::AlertBackend;
use crate::error::PipelineError;
use crate::models::issue;
use crate::triggers::Trigger;

/// Prints a human-readable summary of each alert. Never fails: write errors
/// on the output are logged and ignored.
pub struct ConsoleAlertBackend {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleAlertBackend {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

/// Render the summary block printed for one alert.
pub fn render_alert(trigger: &Trigger, issues: &[issue::Model]) -> String {
    let mut text = format!(
        "== Alert: {}\n   Sending to: {}\n   Issues:\n",
        trigger.name(),
        trigger.recipients().join(",")
    );
    for issue in issues {
        text.push_str(&format!("     {}\n", issue.fingerprint));
    }
    text.push('\n');
    text
}

#[async_trait]
impl AlertBackend for ConsoleAlertBackend {
    async fn send_alert(
        &self,
        trigger: &Trigger,
        issues: &[issue::Model],
    ) -> Result<(), PipelineError> {
        let text = render_alert(trigger, issues);
        let mut out = self.out.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            warn!(trigger = trigger.name(), error = %err, "Could not print alert");
        }
        Ok(())
    }
}
