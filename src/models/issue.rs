//! Issue entity model
//!
//! This module contains the SeaORM entity model for the issues table.
//! An issue is a distinct class of error identified by its fingerprint.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Issue entity, unique per deduplication fingerprint
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "issues")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Opaque deduplication fingerprint, immutable once created
    #[sea_orm(unique)]
    pub fingerprint: String,

    /// Time the most recent event with this fingerprint was processed
    pub last_seen: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
