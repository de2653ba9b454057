//! # Queue Consumer
//!
//! Error events reach the pipeline through a message queue. A backend hands
//! out batches of raw messages from one long-poll and deletes a message when
//! it is acknowledged. The processor acknowledges only after it has handled
//! a message, which makes delivery at-least-once: a crash in between means the
//! event comes back, so handling must be idempotent.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PipelineError;

pub mod sqs;

pub use sqs::SqsQueueBackend;

/// Upper bound accepted by SQS for a long-poll wait.
pub const MAX_WAIT_TIME_SECONDS: u64 = 20;

/// Maximum number of messages requested per poll.
pub const MAX_MESSAGES_PER_POLL: i32 = 10;

/// A message as received from the queue, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Queue-assigned identifier, used for logging only
    pub message_id: String,
    /// Handle used to delete the message once handled
    pub receipt_handle: String,
    pub body: String,
}

impl QueueMessage {
    pub fn decode(&self) -> Result<ErrorEvent, PipelineError> {
        ErrorEvent::decode(&self.body)
    }
}

/// Wire shape of a forwarded error event; unknown fields are ignored.
#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "eventID", default)]
    event_id: Option<String>,
    #[serde(default)]
    fingerprints: Vec<String>,
}

/// The part of a forwarded error event the pipeline relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub event_id: Option<String>,
    fingerprint: String,
}

impl ErrorEvent {
    /// Parse a message body. Only the first fingerprint is kept: alerts
    /// assume the default, single-value grouping. An event whose first
    /// fingerprint is missing or blank cannot be grouped and is malformed.
    pub fn decode(body: &str) -> Result<Self, PipelineError> {
        let raw: RawEvent = serde_json::from_str(body)
            .map_err(|err| PipelineError::malformed(format!("invalid event JSON: {err}")))?;
        let Some(fingerprint) = raw.fingerprints.into_iter().next() else {
            return Err(PipelineError::malformed("event has no fingerprints"));
        };
        if fingerprint.trim().is_empty() {
            return Err(PipelineError::malformed("event fingerprint is blank"));
        }
        Ok(Self {
            event_id: raw.event_id,
            fingerprint,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Source of error-event messages.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Long-poll once. An empty batch means the wait elapsed without traffic.
    async fn receive(&self) -> Result<Vec<QueueMessage>, PipelineError>;

    /// Remove a handled message from the queue.
    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), PipelineError>;
}

/// Long-poll wait for a given client read timeout. The wait stays two
/// seconds under the read timeout so an empty response can arrive before
/// the client gives up on the connection.
pub fn long_poll_wait_seconds(read_timeout_seconds: u64) -> u64 {
    MAX_WAIT_TIME_SECONDS.min(read_timeout_seconds.saturating_sub(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_time_is_capped_and_buffered() {
        assert_eq!(long_poll_wait_seconds(30), 20);
        assert_eq!(long_poll_wait_seconds(22), 20);
        assert_eq!(long_poll_wait_seconds(15), 13);
        assert_eq!(long_poll_wait_seconds(1), 0);
    }

    #[test]
    fn decodes_first_fingerprint() {
        let event =
            ErrorEvent::decode(r#"{"eventID": "e1", "fingerprints": ["abc", "def"], "extra": 1}"#)
                .unwrap();
        assert_eq!(event.event_id.as_deref(), Some("e1"));
        assert_eq!(event.fingerprint(), "abc");
    }

    #[test]
    fn composite_fingerprints_share_the_first_element() {
        let a = ErrorEvent::decode(r#"{"fingerprints": ["abc", "x"]}"#).unwrap();
        let b = ErrorEvent::decode(r#"{"fingerprints": ["abc", "y", "z"]}"#).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.event_id, None);
    }

    #[test]
    fn rejects_malformed_bodies() {
        for body in [
            "not json",
            "{}",
            r#"{"fingerprints": []}"#,
            r#"{"fingerprints": "abc"}"#,
            r#"{"fingerprints": [""]}"#,
            r#"{"fingerprints": ["  ", "abc"]}"#,
        ] {
            let err = ErrorEvent::decode(body).unwrap_err();
            assert!(err.is_malformed_event(), "{body} should be malformed");
        }
    }
}
