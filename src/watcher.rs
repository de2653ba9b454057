//! # Trigger Watcher
//!
//! Periodic evaluation loop. A pass records an unfinished run, then inside a
//! single transaction reads the watermark, selects candidate issues, runs
//! every trigger in registration order, dispatches one alert per trigger
//! with matches, marks the run finished and prunes old runs. Any failure
//! rolls the transaction back, so the run stays unfinished and the next pass
//! rescans the same window.
//!
//! Dry runs evaluate against the same watermark but roll back instead of
//! committing, leaving the ledger untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, IsolationLevel,
    TransactionTrait,
};
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::alerts::AlertBackend;
use crate::config::WatcherConfig;
use crate::error::PipelineError;
use crate::repositories::{IssueRepository, TriggerRunRepository};
use crate::triggers::TriggerRegistry;

/// One dispatched alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTrigger {
    pub trigger: String,
    pub fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Ledger row of the pass; `None` for dry runs
    pub run_id: Option<i32>,
    pub watermark: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub fired: Vec<FiredTrigger>,
    pub pruned_runs: u64,
}

/// Runs the registered triggers against candidate issues and dispatches the
/// resulting alerts.
#[derive(Clone)]
pub struct TriggerEvaluator {
    registry: Arc<TriggerRegistry>,
    backend: Arc<dyn AlertBackend>,
}

impl TriggerEvaluator {
    pub fn new(registry: Arc<TriggerRegistry>, backend: Arc<dyn AlertBackend>) -> Self {
        Self { registry, backend }
    }

    /// Evaluate all triggers over the issues seen since `watermark` (all
    /// issues when `None`). The first predicate or dispatch error aborts.
    pub async fn evaluate<C>(
        &self,
        conn: &C,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<PassOutcome, PipelineError>
    where
        C: ConnectionTrait,
    {
        let candidates = IssueRepository::candidates(conn, watermark).await?;
        let mut outcome = PassOutcome {
            watermark,
            candidates: candidates.len(),
            ..Default::default()
        };

        for trigger in self.registry.all() {
            let mut matched = Vec::new();
            for issue in &candidates {
                if trigger.matches(issue)? {
                    matched.push(issue.clone());
                }
            }
            if matched.is_empty() {
                continue;
            }

            self.backend
                .send_alert(trigger, &matched)
                .await
                .map_err(|err| PipelineError::Dispatch {
                    trigger: trigger.name().to_string(),
                    message: err.to_string(),
                })?;
            counter!("watcher_alerts_dispatched_total").increment(1);
            debug!(trigger = trigger.name(), issues = matched.len(), "Alert dispatched");

            outcome.fired.push(FiredTrigger {
                trigger: trigger.name().to_string(),
                fingerprints: matched.into_iter().map(|issue| issue.fingerprint).collect(),
            });
        }

        Ok(outcome)
    }
}

pub struct Watcher {
    db: Arc<DatabaseConnection>,
    runs: TriggerRunRepository,
    evaluator: TriggerEvaluator,
    once: bool,
    dry_run: bool,
    sleep_delay: Duration,
}

impl Watcher {
    pub fn new(db: Arc<DatabaseConnection>, evaluator: TriggerEvaluator, config: &WatcherConfig) -> Self {
        Self {
            runs: TriggerRunRepository::new(db.clone()),
            db,
            evaluator,
            once: config.once,
            dry_run: config.dry_run,
            sleep_delay: Duration::from_secs(config.sleep_delay_seconds),
        }
    }

    /// Run passes until shutdown, sleeping between them. With `once` set a
    /// single pass runs and its error, if any, is returned.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        info!(
            once = self.once,
            dry_run = self.dry_run,
            sleep_delay_seconds = self.sleep_delay.as_secs(),
            "Starting trigger watcher"
        );

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.run_pass() => result,
            };

            if self.once {
                return result.map(|_| ());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.sleep_delay) => {}
            }
        }

        info!("Trigger watcher stopped");
        Ok(())
    }

    /// One pass at the current time, with logging and metrics.
    pub async fn run_pass(&self) -> Result<PassOutcome, PipelineError> {
        let started = Instant::now();
        let result = self.run_pass_at(Utc::now()).await;
        histogram!("watcher_pass_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match &result {
            Ok(outcome) => {
                counter!("watcher_passes_completed_total").increment(1);
                info!(
                    run_id = outcome.run_id,
                    candidates = outcome.candidates,
                    alerts = outcome.fired.len(),
                    pruned_runs = outcome.pruned_runs,
                    "Watcher pass completed"
                );
            }
            Err(err) => {
                counter!("watcher_passes_failed_total").increment(1);
                error!(error = %err, "Watcher pass failed");
            }
        }
        result
    }

    /// One pass as if started at `now`.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassOutcome, PipelineError> {
        if self.dry_run {
            return self.dry_run_pass().await;
        }

        let run = self.runs.begin_run(now).await?;
        let run_id = run.id;

        let txn = self.begin_pass_transaction().await?;
        let watermark = TriggerRunRepository::last_completed_watermark(&txn).await?;
        let mut outcome = self.evaluator.evaluate(&txn, watermark).await?;
        outcome.pruned_runs = TriggerRunRepository::complete_run(&txn, run).await?;
        txn.commit().await?;

        outcome.run_id = Some(run_id);
        Ok(outcome)
    }

    async fn dry_run_pass(&self) -> Result<PassOutcome, PipelineError> {
        let txn = self.begin_pass_transaction().await?;
        let watermark = TriggerRunRepository::last_completed_watermark(&txn).await?;
        let outcome = self.evaluator.evaluate(&txn, watermark).await?;
        txn.rollback().await?;
        Ok(outcome)
    }

    /// Postgres passes run under repeatable read so the watermark and the
    /// candidate query see one snapshot. SQLite transactions are already
    /// serialized.
    async fn begin_pass_transaction(&self) -> Result<DatabaseTransaction, PipelineError> {
        let txn = match self.db.get_database_backend() {
            DbBackend::Postgres => {
                self.db
                    .begin_with_config(Some(IsolationLevel::RepeatableRead), None)
                    .await?
            }
            _ => self.db.begin().await?,
        };
        Ok(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue;
    use crate::repositories::test_support::{at, setup_db};
    use crate::triggers::Trigger;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        alerts: Mutex<Vec<FiredTrigger>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingBackend {
        fn alerts(&self) -> Vec<FiredTrigger> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertBackend for RecordingBackend {
        async fn send_alert(
            &self,
            trigger: &Trigger,
            issues: &[issue::Model],
        ) -> Result<(), PipelineError> {
            if self.fail_on == Some(trigger.name()) {
                return Err(PipelineError::mail("sending email", "rejected"));
            }
            self.alerts.lock().unwrap().push(FiredTrigger {
                trigger: trigger.name().to_string(),
                fingerprints: issues.iter().map(|i| i.fingerprint.clone()).collect(),
            });
            Ok(())
        }
    }

    fn match_all(registry: &mut TriggerRegistry, name: &str) {
        registry
            .register(name, ["ops@example.com"], |_, _| Ok(true))
            .unwrap();
    }

    fn watcher(
        db: &Arc<DatabaseConnection>,
        registry: TriggerRegistry,
        backend: Arc<RecordingBackend>,
        dry_run: bool,
    ) -> Watcher {
        let config = WatcherConfig {
            dry_run,
            ..Default::default()
        };
        Watcher::new(
            db.clone(),
            TriggerEvaluator::new(Arc::new(registry), backend),
            &config,
        )
    }

    async fn seed(db: &Arc<DatabaseConnection>, issues: &[(&str, DateTime<Utc>)]) {
        let repo = IssueRepository::new(db.clone());
        for (fingerprint, seen) in issues {
            repo.upsert(fingerprint, *seen).await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_pass_considers_every_issue() {
        let db = setup_db().await;
        seed(&db, &[("old", at(1, 0)), ("new", at(9, 0))]).await;
        let backend = Arc::new(RecordingBackend::default());
        let mut registry = TriggerRegistry::default();
        match_all(&mut registry, "all");

        let outcome = watcher(&db, registry, backend.clone(), false)
            .run_pass_at(at(10, 0))
            .await
            .unwrap();

        assert_eq!(outcome.watermark, None);
        assert_eq!(outcome.candidates, 2);
        assert_eq!(
            backend.alerts(),
            vec![FiredTrigger {
                trigger: "all".into(),
                fingerprints: vec!["old".into(), "new".into()],
            }]
        );
    }

    #[tokio::test]
    async fn later_passes_only_see_issues_since_last_completed_run() {
        let db = setup_db().await;
        let backend = Arc::new(RecordingBackend::default());
        let mut registry = TriggerRegistry::default();
        match_all(&mut registry, "all");
        let watcher = watcher(&db, registry, backend.clone(), false);

        seed(&db, &[("before", at(9, 0))]).await;
        watcher.run_pass_at(at(10, 0)).await.unwrap();
        seed(&db, &[("between", at(10, 30))]).await;
        watcher.run_pass_at(at(11, 0)).await.unwrap();
        seed(&db, &[("exact", at(11, 0)), ("after", at(11, 30))]).await;

        let outcome = watcher.run_pass_at(at(12, 0)).await.unwrap();

        assert_eq!(outcome.watermark, Some(at(11, 0)));
        assert_eq!(
            outcome.fired,
            vec![FiredTrigger {
                trigger: "all".into(),
                fingerprints: vec!["exact".into(), "after".into()],
            }]
        );
    }

    #[tokio::test]
    async fn triggers_without_matches_stay_silent() {
        let db = setup_db().await;
        seed(&db, &[("abc", at(9, 0)), ("def", at(9, 5))]).await;
        let backend = Arc::new(RecordingBackend::default());
        let mut registry = TriggerRegistry::default();
        registry
            .register("never", ["a@example.com"], |_, _| Ok(false))
            .unwrap();
        registry
            .register("only-def", ["b@example.com"], |_, issue| {
                Ok(issue.fingerprint == "def")
            })
            .unwrap();

        let outcome = watcher(&db, registry, backend.clone(), false)
            .run_pass_at(at(10, 0))
            .await
            .unwrap();

        assert_eq!(
            backend.alerts(),
            vec![FiredTrigger {
                trigger: "only-def".into(),
                fingerprints: vec!["def".into()],
            }]
        );
        assert_eq!(outcome.fired.len(), 1);
    }

    #[tokio::test]
    async fn empty_registry_still_completes_the_run() {
        let db = setup_db().await;
        seed(&db, &[("abc", at(9, 0))]).await;
        let backend = Arc::new(RecordingBackend::default());
        let watcher = watcher(&db, TriggerRegistry::default(), backend.clone(), false);

        let outcome = watcher.run_pass_at(at(10, 0)).await.unwrap();

        assert!(backend.alerts().is_empty());
        let run = watcher.runs.find_by_id(outcome.run_id.unwrap()).await.unwrap().unwrap();
        assert!(run.finished);
        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            Some(at(10, 0))
        );
    }

    #[tokio::test]
    async fn successful_pass_prunes_runs_past_retention() {
        let db = setup_db().await;
        let backend = Arc::new(RecordingBackend::default());
        let watcher = watcher(&db, TriggerRegistry::default(), backend, false);
        let now = at(12, 0);

        let stale = watcher.runs.begin_run(now - ChronoDuration::days(7)).await.unwrap();
        let kept = watcher.runs.begin_run(now - ChronoDuration::days(6)).await.unwrap();

        let outcome = watcher.run_pass_at(now).await.unwrap();

        assert_eq!(outcome.pruned_runs, 1);
        assert!(watcher.runs.find_by_id(stale.id).await.unwrap().is_none());
        assert!(watcher.runs.find_by_id(kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dispatch_failure_leaves_run_unfinished() {
        let db = setup_db().await;
        let mut registry = TriggerRegistry::default();
        match_all(&mut registry, "first");
        match_all(&mut registry, "second");

        let ok_backend = Arc::new(RecordingBackend::default());
        seed(&db, &[("abc", at(9, 0))]).await;
        watcher(&db, TriggerRegistry::default(), ok_backend, false)
            .run_pass_at(at(10, 0))
            .await
            .unwrap();

        seed(&db, &[("def", at(10, 30))]).await;
        let failing = Arc::new(RecordingBackend {
            fail_on: Some("second"),
            ..Default::default()
        });
        let watcher = watcher(&db, registry, failing.clone(), false);

        let err = watcher.run_pass_at(at(11, 0)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Dispatch { ref trigger, .. } if trigger == "second"));
        assert_eq!(failing.alerts().len(), 1);
        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            Some(at(10, 0))
        );
        let unfinished = watcher.runs.find_by_id(2).await.unwrap().unwrap();
        assert_eq!(unfinished.ran_at, at(11, 0).fixed_offset());
        assert!(!unfinished.finished);
    }

    #[tokio::test]
    async fn predicate_error_aborts_pass() {
        let db = setup_db().await;
        seed(&db, &[("abc", at(9, 0))]).await;
        let mut registry = TriggerRegistry::default();
        registry
            .register("broken", ["a@example.com"], |_, _| {
                Err(anyhow::anyhow!("lookup failed"))
            })
            .unwrap();
        let backend = Arc::new(RecordingBackend::default());

        let err = watcher(&db, registry, backend.clone(), false)
            .run_pass_at(at(10, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Trigger { .. }));
        assert!(backend.alerts().is_empty());
        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn dry_run_does_not_touch_the_ledger() {
        let db = setup_db().await;
        seed(&db, &[("abc", at(9, 0))]).await;
        let backend = Arc::new(RecordingBackend::default());
        let mut registry = TriggerRegistry::default();
        match_all(&mut registry, "all");
        let watcher = watcher(&db, registry, backend.clone(), true);

        let first = watcher.run_pass_at(at(10, 0)).await.unwrap();
        let second = watcher.run_pass_at(at(11, 0)).await.unwrap();

        assert_eq!(first.run_id, None);
        assert_eq!(second.watermark, None);
        assert_eq!(backend.alerts().len(), 2);
        assert!(watcher.runs.find_by_id(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn once_mode_runs_a_single_pass() {
        let db = setup_db().await;
        let backend = Arc::new(RecordingBackend::default());
        let config = WatcherConfig {
            once: true,
            ..Default::default()
        };
        let watcher = Watcher::new(
            db.clone(),
            TriggerEvaluator::new(Arc::new(TriggerRegistry::default()), backend),
            &config,
        );

        watcher.run(CancellationToken::new()).await.unwrap();

        assert!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn once_mode_returns_the_failed_pass_error() {
        let db = setup_db().await;
        seed(&db, &[("abc", at(9, 0))]).await;
        let mut registry = TriggerRegistry::default();
        registry
            .register("broken", ["a@example.com"], |_, _| {
                Err(anyhow::anyhow!("lookup failed"))
            })
            .unwrap();
        let config = WatcherConfig {
            once: true,
            ..Default::default()
        };
        let watcher = Watcher::new(
            db.clone(),
            TriggerEvaluator::new(Arc::new(registry), Arc::new(RecordingBackend::default())),
            &config,
        );

        let err = watcher.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Trigger { ref trigger, .. } if trigger == "broken"));
        assert_eq!(
            TriggerRunRepository::last_completed_watermark(db.as_ref())
                .await
                .unwrap(),
            None
        );
    }
}
