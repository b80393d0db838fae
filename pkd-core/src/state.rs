// pkd-core/src/state.rs
use std::collections::HashMap;
use std::sync::Mutex;

use pkd_common::error::{PkdError, Result};
use pkd_common::lifecycle::{InstallState, LifecycleEvent};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Current [`InstallState`] per identifier, plus the event channel every
/// transition is published on.
#[derive(Debug)]
pub struct StateTracker {
    states: Mutex<HashMap<String, InstallState>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<LifecycleEvent> {
        self.events.clone()
    }

    pub fn current(&self, token: &str) -> InstallState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .copied()
            .unwrap_or(InstallState::Uninstalled)
    }

    /// Records a state learned from disk (a receipt) without a transition.
    pub fn observe(&self, token: &str, state: InstallState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.to_string(), state);
    }

    pub fn transition(&self, token: &str, to: InstallState) -> Result<()> {
        let from = {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let from = states
                .get(token)
                .copied()
                .unwrap_or(InstallState::Uninstalled);
            if !from.can_transition_to(to) {
                return Err(PkdError::Generic(format!(
                    "Invalid state transition for '{token}': {from} -> {to}"
                )));
            }
            states.insert(token.to_string(), to);
            from
        };
        info!("{}: {} -> {}", token, from, to);
        self.emit(LifecycleEvent::Transition {
            token: token.to_string(),
            from,
            to,
        });
        Ok(())
    }

    pub fn emit(&self, event: LifecycleEvent) {
        if self.events.send(event).is_err() {
            debug!("No lifecycle event subscribers");
        }
    }
}
