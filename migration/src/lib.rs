//! Database migrations for the alerting pipeline.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_090000_create_issues;
mod m2025_12_01_090100_create_trigger_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_090000_create_issues::Migration),
            Box::new(m2025_12_01_090100_create_trigger_runs::Migration),
        ]
    }
}
