use fundsync_adapters::PlatformError;
use fundsync_core::{IntegrityError, PageId};
use fundsync_storage::{Aborted, StoreError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::throttle::CallError;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("platform: {0}")]
    Platform(#[from] PlatformError),
    #[error("fetching results for page {page_id}: {source}")]
    PageFetch {
        page_id: PageId,
        #[source]
        source: PlatformError,
    },
    #[error("data integrity: {0}")]
    Integrity(#[from] IntegrityError),
    /// Shutdown cut a gateway wait short. The runner reports this as a benign
    /// outcome, never as a failure.
    #[error("cycle aborted by shutdown")]
    Aborted,
}

impl From<Aborted> for CycleError {
    fn from(_: Aborted) -> Self {
        CycleError::Aborted
    }
}

impl From<CallError> for CycleError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Aborted(_) => CycleError::Aborted,
            CallError::Platform(err) => CycleError::Platform(err),
        }
    }
}

impl CycleError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, CycleError::Aborted)
    }

    /// Whether the next scheduled cycle might succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            CycleError::Platform(err) | CycleError::PageFetch { source: err, .. } => {
                err.is_retryable()
            }
            CycleError::Store(StoreError::Database(_)) => true,
            _ => false,
        }
    }
}
