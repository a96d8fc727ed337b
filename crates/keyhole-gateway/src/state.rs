use std::sync::Arc;

use keyhole_core::{ShortCode, Shortener};
use tokio_util::task::TaskTracker;

use crate::config::TrustedSubnet;

#[derive(Clone)]
pub struct AppState {
    shortener: Arc<dyn Shortener>,
    base_url: Arc<str>,
    trusted_subnet: Option<TrustedSubnet>,
    background: TaskTracker,
}

impl AppState {
    pub fn new(
        shortener: Arc<dyn Shortener>,
        public_base_url: impl Into<String>,
        trusted_subnet: Option<TrustedSubnet>,
    ) -> Self {
        Self {
            shortener,
            base_url: Arc::from(public_base_url.into()),
            trusted_subnet,
            background: TaskTracker::new(),
        }
    }

    pub fn shortener(&self) -> &Arc<dyn Shortener> {
        &self.shortener
    }

    pub fn trusted_subnet(&self) -> Option<&TrustedSubnet> {
        self.trusted_subnet.as_ref()
    }

    /// Absolute URL under which `code` is served.
    pub fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.base_url)
    }

    /// Tracks work that outlives the request that started it.
    pub fn background(&self) -> &TaskTracker {
        &self.background
    }

    /// Closes the tracker and waits for every background task still running.
    /// Must complete before the store is closed.
    pub async fn drain(&self) {
        self.background.close();
        self.background.wait().await;
    }
}
