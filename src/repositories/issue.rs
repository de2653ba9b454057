//! Issue repository
//!
//! Owns the issues table. Events are folded into issues by fingerprint with a
//! single `INSERT .. ON CONFLICT (fingerprint) DO UPDATE` statement, so
//! concurrent upserts of one fingerprint neither duplicate rows nor lose the
//! `last_seen` bump, while different fingerprints never contend.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::models::issue::{self, Entity as Issue};
use crate::repositories::to_db_time;

/// Repository for issue database operations
#[derive(Debug, Clone)]
pub struct IssueRepository {
    db: Arc<DatabaseConnection>,
}

impl IssueRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create the issue for `fingerprint` with `last_seen = now`, or bump
    /// `last_seen` on the existing row.
    pub async fn upsert(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<issue::Model, PipelineError> {
        let row = issue::ActiveModel {
            fingerprint: Set(fingerprint.to_string()),
            last_seen: Set(Some(to_db_time(now))),
            ..Default::default()
        };

        Issue::insert(row)
            .on_conflict(
                OnConflict::column(issue::Column::Fingerprint)
                    .update_column(issue::Column::LastSeen)
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        self.find_by_fingerprint(fingerprint)
            .await?
            .ok_or_else(|| {
                PipelineError::Database(sea_orm::DbErr::RecordNotFound(format!(
                    "issue '{fingerprint}' missing after upsert"
                )))
            })
    }

    pub async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<issue::Model>, PipelineError> {
        Ok(Issue::find()
            .filter(issue::Column::Fingerprint.eq(fingerprint))
            .one(self.db.as_ref())
            .await?)
    }

    /// Issues a pass must consider: everything when there is no watermark,
    /// otherwise the issues seen at or after it. Ordered by id so trigger
    /// matches keep a stable order.
    pub async fn candidates<C>(
        conn: &C,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Vec<issue::Model>, PipelineError>
    where
        C: ConnectionTrait,
    {
        let mut query = Issue::find().order_by_asc(issue::Column::Id);
        if let Some(watermark) = watermark {
            query = query.filter(issue::Column::LastSeen.gte(to_db_time(watermark)));
        }
        Ok(query.all(conn).await?)
    }
}
