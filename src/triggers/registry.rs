//! Trigger registry
//!
//! Ordered, append-only collection of triggers. It is built explicitly during
//! startup and handed to the watcher behind an `Arc`, so evaluation never
//! needs a lock.

use crate::models::issue;
use crate::triggers::{RecipientContext, Trigger};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("A trigger named \"{name}\" has already been defined")]
    DuplicateTrigger { name: String },
}

/// Registered triggers in registration order
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    triggers: Vec<Trigger>,
}

impl TriggerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger. Names must be unique.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        recipients: impl IntoIterator<Item = impl Into<String>>,
        predicate: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&RecipientContext<'_>, &issue::Model) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(RegistryError::DuplicateTrigger { name });
        }

        let recipients = recipients.into_iter().map(Into::into).collect();
        self.triggers.push(Trigger::new(name, recipients, predicate));
        Ok(())
    }

    /// All triggers, in registration order
    pub fn all(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn get(&self, name: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|trigger| trigger.name() == name)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}
