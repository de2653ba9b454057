//! Migration to create the trigger_runs table.
//!
//! Each row records one evaluation pass of the watcher. The most recent
//! finished row is the watermark for the next incremental pass.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerRuns::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TriggerRuns::RanAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TriggerRuns::Finished)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_trigger_runs_finished_ran_at")
                    .table(TriggerRuns::Table)
                    .col(TriggerRuns::Finished)
                    .col(TriggerRuns::RanAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_trigger_runs_finished_ran_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TriggerRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerRuns {
    Table,
    Id,
    RanAt,
    Finished,
}
