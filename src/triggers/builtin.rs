//! Triggers shipped with the watcher.

use crate::triggers::{RegistryError, TriggerRegistry};

/// Register every built-in trigger. Called once from startup; a duplicate
/// name here is a programming error and aborts the process.
pub fn register_builtin_triggers(registry: &mut TriggerRegistry) -> Result<(), RegistryError> {
    // Smoke-test trigger: fires for every changed issue
    registry.register("Test notification", ["test@example.com"], |_, _| Ok(true))?;

    Ok(())
}

impl TriggerRegistry {
    /// Registry populated with the built-in triggers.
    pub fn with_builtin_triggers() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_builtin_triggers(&mut registry)?;
        Ok(registry)
    }
}
