use std::sync::Arc;

use fundsync_adapters::{EmailAccount, FundraisingPlatform, PlatformError};
use fundsync_core::{CharityId, DiscoveredPage, EventId, PageSnapshot, RemoteEvent};
use fundsync_storage::{Aborted, Gateway, ShutdownSignal};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Aborted(#[from] Aborted),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Platform handle that takes a gateway token before every request.
#[derive(Clone)]
pub struct ThrottledPlatform {
    platform: Arc<dyn FundraisingPlatform>,
    gateway: Arc<Gateway>,
    shutdown: ShutdownSignal,
}

impl ThrottledPlatform {
    pub fn new(
        platform: Arc<dyn FundraisingPlatform>,
        gateway: Arc<Gateway>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            platform,
            gateway,
            shutdown,
        }
    }

    /// Every page of the event's listing, one token per listing page.
    pub async fn pages_for_event(&self, event_id: EventId) -> Result<Vec<DiscoveredPage>, CallError> {
        let mut pages = Vec::new();
        let mut page_number = 1;
        loop {
            self.gateway.acquire(&self.shutdown).await?;
            let listing = self.platform.event_pages(event_id, page_number).await?;
            let more = listing.has_more();
            pages.extend(listing.pages);
            if !more {
                return Ok(pages);
            }
            page_number += 1;
        }
    }

    pub async fn page_results(&self, short_name: &str) -> Result<PageSnapshot, CallError> {
        self.gateway.acquire(&self.shutdown).await?;
        Ok(self.platform.page_results(short_name).await?)
    }

    pub async fn event(&self, event_id: EventId) -> Result<RemoteEvent, CallError> {
        self.gateway.acquire(&self.shutdown).await?;
        Ok(self.platform.event(event_id).await?)
    }

    pub async fn pages_for_account(
        &self,
        charity_id: CharityId,
        account: &EmailAccount,
    ) -> Result<Vec<DiscoveredPage>, CallError> {
        self.gateway.acquire(&self.shutdown).await?;
        Ok(self.platform.pages_for_account(charity_id, account).await?)
    }
}
