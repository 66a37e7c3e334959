use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fundsync_adapters::FundraisingPlatform;
use fundsync_storage::{Gateway, Shutdown, Store};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::CycleError;
use crate::matcher::{MatchStats, Matcher};
use crate::results::{ResultStats, Synchronizer};
use crate::scheduler::{DiscoveryStats, Scheduler};
use crate::stats::{DiffEngine, DiffStats};
use crate::throttle::ThrottledPlatform;

/// How one cycle invocation ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome<T> {
    Completed(T),
    /// Shutdown interrupted the cycle. Not a failure.
    Aborted,
    /// Another cycle of the same kind was still running.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformSyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub selected: usize,
    pub discovery: DiscoveryStats,
    pub results: ResultStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub matching: MatchStats,
    pub stats: DiffStats,
}

/// Owns the gateway and shutdown signal shared by both pipelines, and makes
/// sure at most one cycle of each kind runs at a time.
pub struct CycleRunner {
    config: SyncConfig,
    store: Arc<dyn Store>,
    platform: Arc<dyn FundraisingPlatform>,
    gateway: Arc<Gateway>,
    shutdown: Shutdown,
    sync_lock: Mutex<()>,
    reconcile_lock: Mutex<()>,
}

impl CycleRunner {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn Store>,
        platform: Arc<dyn FundraisingPlatform>,
    ) -> Self {
        let gateway = Arc::new(Gateway::new(config.rate_limit));
        Self {
            config,
            store,
            platform,
            gateway,
            shutdown: Shutdown::new(),
            sync_lock: Mutex::new(()),
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Aborts any pending gateway wait; later cycles end as `Aborted`.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.trigger();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn throttled(&self) -> ThrottledPlatform {
        ThrottledPlatform::new(
            self.platform.clone(),
            self.gateway.clone(),
            self.shutdown.signal(),
        )
    }

    pub async fn run_platform_sync_cycle(
        &self,
    ) -> Result<CycleOutcome<PlatformSyncSummary>, CycleError> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            debug!("platform sync already running");
            return Ok(CycleOutcome::Skipped);
        };
        let run_id = Uuid::new_v4();
        let span = info_span!("platform_sync", %run_id, platform = self.platform.name());
        settle(self.platform_sync(run_id).instrument(span).await)
    }

    pub async fn run_reconciliation_cycle(
        &self,
    ) -> Result<CycleOutcome<ReconciliationSummary>, CycleError> {
        let Ok(_guard) = self.reconcile_lock.try_lock() else {
            debug!("reconciliation already running");
            return Ok(CycleOutcome::Skipped);
        };
        let run_id = Uuid::new_v4();
        let span = info_span!("reconciliation", %run_id);
        settle(self.reconcile(run_id).instrument(span).await)
    }

    async fn platform_sync(&self, run_id: Uuid) -> Result<PlatformSyncSummary, CycleError> {
        if self.is_shut_down() {
            return Err(CycleError::Aborted);
        }
        let started_at = Utc::now();
        let platform = self.throttled();
        let stale_before = self.config.stale_before(started_at)?;

        let (plan, discovery) = Scheduler::new(self.store.as_ref(), &platform)
            .plan(self.config.results_batch, stale_before)
            .await?;
        let results = Synchronizer::new(self.store.as_ref(), &platform)
            .sync(&plan, Utc::now())
            .await?;

        let summary = PlatformSyncSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            selected: plan.batch.len(),
            discovery,
            results,
        };
        info!(
            selected = summary.selected,
            events = discovery.events,
            discovered = discovery.pages_inserted,
            fetched = results.fetched,
            excluded = results.excluded,
            "platform sync complete"
        );
        Ok(summary)
    }

    async fn reconcile(&self, run_id: Uuid) -> Result<ReconciliationSummary, CycleError> {
        if self.is_shut_down() {
            return Err(CycleError::Aborted);
        }
        let started_at = Utc::now();
        let platform = self.throttled();

        let matching = Matcher::new(self.store.as_ref(), &platform, self.config.default_charity_id)
            .run()
            .await?;
        let stats = DiffEngine::new(self.store.as_ref()).run().await?;

        let summary = ReconciliationSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            matching,
            stats,
        };
        info!(
            contacts = matching.contacts,
            matched = matching.matched,
            masters = matching.masters_created,
            details = stats.details_created,
            "reconciliation complete"
        );
        Ok(summary)
    }

    /// Schedules both pipelines on the configured interval. The returned
    /// scheduler is already started; call `shutdown` on it to stop.
    pub async fn start_heartbeat(self: &Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let interval = self.config.heartbeat_interval;

        let runner = Arc::clone(self);
        let sync_job = Job::new_repeated_async(interval, move |_uuid, _l| {
            let runner = runner.clone();
            Box::pin(async move {
                report("platform sync", runner.run_platform_sync_cycle().await);
            })
        })
        .context("creating platform sync job")?;
        sched.add(sync_job).await.context("adding platform sync job")?;

        let runner = Arc::clone(self);
        let reconcile_job = Job::new_repeated_async(interval, move |_uuid, _l| {
            let runner = runner.clone();
            Box::pin(async move {
                report("reconciliation", runner.run_reconciliation_cycle().await);
            })
        })
        .context("creating reconciliation job")?;
        sched
            .add(reconcile_job)
            .await
            .context("adding reconciliation job")?;

        sched.start().await.context("starting scheduler")?;
        info!(interval_secs = interval.as_secs(), "heartbeat started");
        Ok(sched)
    }

    /// Runs the heartbeat until `stop` resolves, then aborts pending gateway
    /// waits and stops the scheduler.
    pub async fn run_until<F>(self: &Arc<Self>, stop: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let mut sched = self.start_heartbeat().await?;
        let stopped = stop.await;
        self.shutdown();
        sched.shutdown().await.context("stopping scheduler")?;
        info!("heartbeat stopped");
        stopped
    }
}

fn settle<T>(result: Result<T, CycleError>) -> Result<CycleOutcome<T>, CycleError> {
    match result {
        Ok(summary) => Ok(CycleOutcome::Completed(summary)),
        Err(CycleError::Aborted) => {
            info!("cycle stopped by shutdown");
            Ok(CycleOutcome::Aborted)
        }
        Err(err) => Err(err),
    }
}

fn report<T>(pipeline: &'static str, outcome: Result<CycleOutcome<T>, CycleError>) {
    match outcome {
        Ok(CycleOutcome::Completed(_)) | Ok(CycleOutcome::Aborted) => {}
        Ok(CycleOutcome::Skipped) => debug!(pipeline, "previous cycle still running"),
        Err(err) => error!(pipeline, error = %err, transient = err.is_transient(), "cycle failed"),
    }
}
