//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! issue store and the trigger run ledger. Operations that must take part in
//! a watcher pass transaction are generic over [`sea_orm::ConnectionTrait`].

use chrono::{DateTime, FixedOffset, Utc};

pub mod issue;
pub mod trigger_run;

pub use issue::IssueRepository;
pub use trigger_run::TriggerRunRepository;

/// Convert to the fixed-offset representation stored in timestamp columns.
pub(crate) fn to_db_time(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.fixed_offset()
}
