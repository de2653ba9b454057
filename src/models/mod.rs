//! # Data Models
//!
//! SeaORM entities persisted by the pipeline.

pub mod issue;
pub mod trigger_run;

pub use issue::Entity as Issue;
pub use trigger_run::Entity as TriggerRun;
