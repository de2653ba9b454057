//! TriggerRun entity model
//!
//! This module contains the SeaORM entity model for the trigger_runs table,
//! the ledger of watcher evaluation passes.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// One evaluation pass of the watcher
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_runs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Start time of the pass
    pub ran_at: DateTimeWithTimeZone,

    /// Flipped to true only once every trigger was evaluated and dispatched
    pub finished: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
