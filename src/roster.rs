//! Device roster synchronizer: read-through cache of the backend's device list.
//!
//! The roster is replaced wholesale on every successful fetch and kept behind
//! an `Arc`, so a failed refresh or delete leaves the exact same roster in
//! place. Refresh triggers from the realtime channel are debounced: each new
//! trigger replaces the pending deadline, and only the last one fires.

use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    device::{DeviceRecord, DeviceRoster},
    error::TetherError,
    traits::DeviceApi,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Single-shot, cancel-then-reschedule deadline.
#[derive(Debug)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Push the deadline out to `now + delay`, superseding any pending one.
    pub fn schedule(&mut self) {
        if self.deadline.is_some() {
            debug!("roster: pending refresh superseded");
        }
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear the deadline if it has passed. Returns whether it fired.
    pub fn take_due(&mut self) -> bool {
        match self.deadline {
            Some(at) if at <= Instant::now() => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct RosterSync {
    api: Arc<dyn DeviceApi>,
    roster: Arc<DeviceRoster>,
    stale: bool,
    debounce: Debounce,
}

impl RosterSync {
    pub fn new(api: Arc<dyn DeviceApi>, debounce: Duration) -> Self {
        Self {
            api,
            roster: Arc::new(DeviceRoster::default()),
            stale: true,
            debounce: Debounce::new(debounce),
        }
    }

    pub fn roster(&self) -> &Arc<DeviceRoster> {
        &self.roster
    }

    /// True until the first successful fetch, and after any failed one.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Fetch and replace the roster. On failure the previous roster stays.
    pub async fn refresh(&mut self) -> Result<Arc<DeviceRoster>, TetherError> {
        match self.api.list_devices().await {
            Ok(records) => {
                self.roster = Arc::new(DeviceRoster::from_records(records));
                self.stale = false;
                info!(
                    "roster: {} device(s), {} linked",
                    self.roster.len(),
                    self.roster.linked_count()
                );
                Ok(self.roster.clone())
            }
            Err(e) => {
                self.stale = true;
                warn!("roster: refresh failed, keeping previous list: {e}");
                Err(e)
            }
        }
    }

    /// Coalesce a burst of triggers into one refresh after the quiet period.
    pub fn schedule_refresh(&mut self) {
        self.debounce.schedule();
    }

    pub fn cancel_pending(&mut self) {
        self.debounce.cancel();
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Consume the pending refresh if its deadline has passed.
    pub fn take_due(&mut self) -> bool {
        self.debounce.take_due()
    }

    /// Delete on the backend, then drop the entry locally.
    ///
    /// Returns the removed record when it was in the local roster. On failure
    /// the roster is left untouched.
    pub async fn remove_device(&mut self, id: &str) -> Result<Option<DeviceRecord>, TetherError> {
        self.api.delete_device(id).await?;
        let (next, removed) = self.roster.without(id);
        if removed.is_some() {
            self.roster = Arc::new(next);
        }
        info!("roster: removed device {id}");
        Ok(removed)
    }
}
