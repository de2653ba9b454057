//! # Triggers
//!
//! A trigger is a named predicate over issues bound to the addresses that
//! should hear about matches. Triggers are registered once at startup into a
//! [`TriggerRegistry`] which the watcher then only reads.

use std::fmt;

use crate::error::PipelineError;
use crate::models::issue;

pub mod builtin;
pub mod registry;

pub use registry::{RegistryError, TriggerRegistry};

/// What a predicate knows about who will receive the alert.
#[derive(Debug, Clone, Copy)]
pub struct RecipientContext<'a> {
    pub trigger_name: &'a str,
    pub recipients: &'a [String],
}

/// Predicate signature. Returning an error fails the whole watcher pass.
pub type Predicate =
    dyn Fn(&RecipientContext<'_>, &issue::Model) -> anyhow::Result<bool> + Send + Sync;

/// A registered trigger.
pub struct Trigger {
    name: String,
    recipients: Vec<String>,
    predicate: Box<Predicate>,
}

impl Trigger {
    pub fn new<F>(name: impl Into<String>, recipients: Vec<String>, predicate: F) -> Self
    where
        F: Fn(&RecipientContext<'_>, &issue::Model) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            recipients,
            predicate: Box::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Evaluate the predicate against one issue.
    pub fn matches(&self, issue: &issue::Model) -> Result<bool, PipelineError> {
        let context = RecipientContext {
            trigger_name: &self.name,
            recipients: &self.recipients,
        };
        (self.predicate)(&context, issue).map_err(|err| PipelineError::Trigger {
            trigger: self.name.clone(),
            message: format!("{err:#}"),
        })
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}
