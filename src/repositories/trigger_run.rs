//! Trigger run repository (the run ledger)
//!
//! Records watcher passes. A run is inserted unfinished before evaluation
//! starts and flipped to finished only after every alert of the pass went
//! out; the newest finished run's `ran_at` is the watermark for the next
//! incremental pass.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;
use crate::models::trigger_run::{self, Entity as TriggerRun};
use crate::repositories::to_db_time;

/// Finished runs older than this are pruned after each successful pass.
pub const RUN_RETENTION_DAYS: i64 = 7;

/// Repository for trigger run database operations
#[derive(Debug, Clone)]
pub struct TriggerRunRepository {
    db: Arc<DatabaseConnection>,
}

impl TriggerRunRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert an unfinished run. This is committed on its own so a pass that
    /// fails later still leaves its `finished = false` row behind.
    pub async fn begin_run(&self, now: DateTime<Utc>) -> Result<trigger_run::Model, PipelineError> {
        let run = trigger_run::ActiveModel {
            ran_at: Set(to_db_time(now)),
            finished: Set(false),
            ..Default::default()
        };
        Ok(run.insert(self.db.as_ref()).await?)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<trigger_run::Model>, PipelineError> {
        Ok(TriggerRun::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// `ran_at` of the most recent finished run, or `None` when no pass has
    /// ever completed.
    pub async fn last_completed_watermark<C>(
        conn: &C,
    ) -> Result<Option<DateTime<Utc>>, PipelineError>
    where
        C: ConnectionTrait,
    {
        let last = TriggerRun::find()
            .filter(trigger_run::Column::Finished.eq(true))
            .order_by_desc(trigger_run::Column::RanAt)
            .one(conn)
            .await?;

        Ok(last.map(|run| run.ran_at.with_timezone(&Utc)))
    }

    /// Mark `run` finished, then drop runs older than the retention window
    /// (measured from this run's start). Returns the number of pruned rows.
    pub async fn complete_run<C>(conn: &C, run: trigger_run::Model) -> Result<u64, PipelineError>
    where
        C: ConnectionTrait,
    {
        let cutoff = run.ran_at.with_timezone(&Utc) - Duration::days(RUN_RETENTION_DAYS);
        let run_id = run.id;

        let mut active: trigger_run::ActiveModel = run.into();
        active.finished = Set(true);
        active.update(conn).await?;

        let pruned = TriggerRun::delete_many()
            .filter(trigger_run::Column::RanAt.lte(to_db_time(cutoff)))
            .exec(conn)
            .await?
            .rows_affected;

        debug!(run_id, pruned, "Trigger run completed");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::{at, setup_db};
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn no_runs_means_no_watermark() {
        let db = setup_db().await;
        let ledger = TriggerRunRepository::new(db.clone());

        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            None
        );

        // An unfinished run does not count either
        ledger.begin_run(at(10, 0)).await.unwrap();
        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn watermark_is_latest_finished_run() {
        let db = setup_db().await;
        let ledger = TriggerRunRepository::new(db.clone());

        let first = ledger.begin_run(at(10, 0)).await.unwrap();
        TriggerRunRepository::complete_run(db.as_ref(), first)
            .await
            .unwrap();
        let second = ledger.begin_run(at(11, 0)).await.unwrap();
        TriggerRunRepository::complete_run(db.as_ref(), second)
            .await
            .unwrap();
        ledger.begin_run(at(12, 0)).await.unwrap();

        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            Some(at(11, 0))
        );
    }

    #[tokio::test]
    async fn completing_prunes_runs_outside_retention() {
        let db = setup_db().await;
        let ledger = TriggerRunRepository::new(db.clone());

        let now = at(12, 0);
        let stale = ledger
            .begin_run(now - Duration::days(8))
            .await
            .unwrap();
        let boundary = ledger
            .begin_run(now - Duration::days(RUN_RETENTION_DAYS))
            .await
            .unwrap();
        let recent = ledger.begin_run(now - Duration::days(2)).await.unwrap();

        let current = ledger.begin_run(now).await.unwrap();
        let current_id = current.id;
        let pruned = TriggerRunRepository::complete_run(db.as_ref(), current)
            .await
            .unwrap();

        assert_eq!(pruned, 2);
        assert!(ledger.find_by_id(stale.id).await.unwrap().is_none());
        assert!(ledger.find_by_id(boundary.id).await.unwrap().is_none());
        assert!(ledger.find_by_id(recent.id).await.unwrap().is_some());

        let current = ledger.find_by_id(current_id).await.unwrap().unwrap();
        assert!(current.finished);
        assert_eq!(TriggerRun::find().count(db.as_ref()).await.unwrap(), 2);
    }
}
