// pkd-core/src/executor.rs
use std::sync::Arc;

use pkd_common::config::Config;
use pkd_common::error::Result;
use pkd_common::lifecycle::{InstallState, LifecycleEvent};
use reqwest::Client;
use tokio::sync::broadcast;

use crate::lock::LockRegistry;
use crate::platform::{MacPlatform, Platform};
use crate::state::StateTracker;

/// Drives descriptors through fetch, install and uninstall.
///
/// One executor is shared by every task of a run; it owns the per-identifier
/// locks, so concurrent calls for the same identifier are serialized.
pub struct Executor {
    pub(crate) config: Config,
    pub(crate) client: Client,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) locks: LockRegistry,
    pub(crate) state: Arc<StateTracker>,
}

impl Executor {
    pub fn new(config: Config, platform: Arc<dyn Platform>) -> Result<Self> {
        let client = pkd_net::build_http_client(&config)?;
        Ok(Self {
            config,
            client,
            platform,
            locks: LockRegistry::new(),
            state: Arc::new(StateTracker::new()),
        })
    }

    /// An executor using the macOS system tools.
    pub fn for_host(config: Config) -> Result<Self> {
        let platform = Arc::new(MacPlatform::from_config(&config));
        Self::new(config, platform)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.state.subscribe()
    }

    pub fn state_of(&self, token: &str) -> InstallState {
        self.state.current(token)
    }
}
