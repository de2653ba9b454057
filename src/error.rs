//! # Error Handling
//!
//! Unified error type for the ingestion and evaluation loops. Every variant is
//! treated as a loop-level failure by the caller: the iteration is logged,
//! abandoned and retried after the configured delay.

use std::fmt::Display;

use thiserror::Error;

use crate::config::ConfigError;
use crate::triggers::RegistryError;

/// Errors raised by the pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("queue error while {context}: {message}")]
    Queue {
        context: &'static str,
        message: String,
    },
    #[error("mail error while {context}: {message}")]
    Mail {
        context: &'static str,
        message: String,
    },
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },
    #[error("trigger '{trigger}' failed: {message}")]
    Trigger { trigger: String, message: String },
    #[error("alert dispatch for trigger '{trigger}' failed: {message}")]
    Dispatch { trigger: String, message: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl PipelineError {
    /// Wrap a queue service failure with the operation that was in flight.
    pub fn queue(context: &'static str, err: impl Display) -> Self {
        Self::Queue {
            context,
            message: err.to_string(),
        }
    }

    /// Wrap a mail service failure with the operation that was in flight.
    pub fn mail(context: &'static str, err: impl Display) -> Self {
        Self::Mail {
            context,
            message: err.to_string(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    /// Whether the error came from a single bad queue payload rather than
    /// from the infrastructure.
    pub fn is_malformed_event(&self) -> bool {
        matches!(self, Self::MalformedEvent { .. })
    }
}
