//! Platform sync and CRM reconciliation pipelines.
//!
//! Platform sync: the [`Scheduler`] picks stale pages and mirrors trusted
//! events' page listings, then the [`Synchronizer`] refreshes results for the
//! pages that are both due and listed. Reconciliation: the [`Matcher`] links
//! new CRM contacts to pages, then the [`DiffEngine`] appends incremental
//! donation stats. [`CycleRunner`] owns the shared gateway and drives both.

use std::sync::Arc;

use fundsync_adapters::{FundraisingPlatform, JustGivingClient, PlatformError};
use fundsync_storage::HttpFetcher;

mod config;
mod error;
mod matcher;
mod results;
mod runner;
mod scheduler;
mod stats;
mod throttle;

pub use config::{ConfigError, SyncConfig};
pub use error::CycleError;
pub use matcher::{ContactIds, DeclineReason, MatchOutcome, MatchStats, Matcher, Strategy};
pub use results::{ResultStats, Synchronizer};
pub use runner::{CycleOutcome, CycleRunner, PlatformSyncSummary, ReconciliationSummary};
pub use scheduler::{DiscoveryStats, Scheduler, SyncPlan};
pub use stats::{DiffEngine, DiffStats};
pub use throttle::{CallError, ThrottledPlatform};

pub const CRATE_NAME: &str = "fundsync-sync";

/// The live JustGiving client configured from `config`.
pub fn live_platform(config: &SyncConfig) -> Result<Arc<dyn FundraisingPlatform>, CycleError> {
    let http = HttpFetcher::new(config.http_client()).map_err(|source| PlatformError::Fetch {
        context: "building http client".to_string(),
        source,
    })?;
    let client = JustGivingClient::new(http, config.justgiving()?)?;
    Ok(Arc::new(client))
}
