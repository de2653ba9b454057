//! # Event Processor
//!
//! Long-running consumer that drains the error-event queue into the issue
//! store. Each message is upserted by its first fingerprint and deleted from
//! the queue only afterwards. A malformed payload is logged, acknowledged and
//! skipped so it cannot block the rest of its batch. Any storage or queue
//! failure abandons the batch: its unacknowledged messages reappear later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::PipelineError;
use crate::queue::{QueueBackend, QueueMessage};
use crate::repositories::IssueRepository;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub received: u64,
    pub processed: u64,
    pub discarded: u64,
}

/// Source of the `last_seen` timestamp.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Processor {
    queue: Arc<dyn QueueBackend>,
    issues: IssueRepository,
    sleep_delay: Duration,
    clock: Clock,
}

impl Processor {
    pub fn new(queue: Arc<dyn QueueBackend>, issues: IssueRepository, sleep_delay: Duration) -> Self {
        Self {
            queue,
            issues,
            sleep_delay,
            clock: Arc::new(Utc::now),
        }
    }

    /// Override the wall clock (primarily for tests).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Poll until the shutdown token fires. Failed polls are logged and
    /// followed by the configured delay.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        info!(sleep_delay_seconds = self.sleep_delay.as_secs(), "Starting event processor");

        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            if let Err(err) = outcome {
                counter!("processor_poll_failures_total").increment(1);
                error!(error = %err, "Error while processing events");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(self.sleep_delay) => {}
                }
            }
        }

        info!("Event processor stopped");
        Ok(())
    }

    /// Receive one batch and handle it message by message.
    pub async fn poll_once(&self) -> Result<BatchStats, PipelineError> {
        let batch = self.queue.receive().await?;
        let mut stats = BatchStats {
            received: batch.len() as u64,
            ..Default::default()
        };

        for message in &batch {
            if self.handle_message(message).await? {
                stats.processed += 1;
            } else {
                stats.discarded += 1;
            }
        }

        if stats.received > 0 {
            debug!(
                received = stats.received,
                processed = stats.processed,
                discarded = stats.discarded,
                "Processed message batch"
            );
        }
        Ok(stats)
    }

    /// Returns `false` when the message was malformed and discarded.
    ///
    /// `last_seen` is read from the clock here rather than before the
    /// long-poll: a watcher pass that starts while the poll is waiting must
    /// not end up with a watermark later than the event it never saw.
    async fn handle_message(&self, message: &QueueMessage) -> Result<bool, PipelineError> {
        let event = match message.decode() {
            Ok(event) => event,
            Err(err) if err.is_malformed_event() => {
                warn!(message_id = %message.message_id, error = %err, "Discarding malformed event");
                self.queue.acknowledge(message).await?;
                counter!("processor_events_discarded_total").increment(1);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        info!(
            message_id = %message.message_id,
            event_id = event.event_id.as_deref().unwrap_or("unknown"),
            "Received event"
        );

        let issue = self.issues.upsert(event.fingerprint(), (self.clock)()).await?;
        self.queue.acknowledge(message).await?;

        counter!("processor_events_processed_total").increment(1);
        debug!(issue_id = issue.id, fingerprint = %issue.fingerprint, "Issue updated");
        Ok(true)
    }
}
