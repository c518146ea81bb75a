//! Session: the event loop behind the device-scan screen.
//!
//! Owns the realtime channel handle, the pairing machine and the roster, all
//! driven from one task. Machine transitions run synchronously inside the
//! loop; their effects are executed here, and any follow-up events those
//! effects produce are queued and fed back in order.

#[cfg(test)]
mod tests;

use crate::roster::RosterSync;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    config::{AccountConfig, RosterConfig},
    device::DeviceRoster,
    message::{ChannelEvent, Notice, ServerMessage},
    pairing::{Effect, PairingEvent, PairingMachine, PairingState},
    plan,
    traits::{DeviceApi, RealtimeChannel},
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// User actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Pair,
    Unlink,
    Remove(String),
    Refresh,
    /// Re-publish the current state and roster.
    Show,
    /// Re-open the realtime channel after a failure.
    Reconnect,
    /// Switch to another signed-in user.
    SwitchUser(String),
    Quit,
}

/// What the presentation layer needs to re-render.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    State(PairingState),
    Roster {
        roster: Arc<DeviceRoster>,
        stale: bool,
        at_limit: bool,
    },
    ChannelOpen,
    /// The server answered the status request sent on open. Carries the state
    /// after applying that answer, changed or not.
    Synced(PairingState),
    Notice(Notice),
}

enum Step {
    Channel(Option<ChannelEvent>),
    Command(Option<SessionCommand>),
    RefreshDue,
}

pub struct Session {
    channel: Arc<dyn RealtimeChannel>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    /// Set on open until the first server status arrives.
    awaiting_sync: bool,
    machine: PairingMachine,
    roster: RosterSync,
    owner_id: Option<String>,
    plan: String,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl Session {
    pub fn new(
        channel: Arc<dyn RealtimeChannel>,
        api: Arc<dyn DeviceApi>,
        account: &AccountConfig,
        roster_config: &RosterConfig,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        let debounce = Duration::from_millis(roster_config.refresh_debounce_ms);
        Self {
            channel,
            events: None,
            awaiting_sync: false,
            machine: PairingMachine::new(),
            roster: RosterSync::new(api, debounce),
            owner_id: account.owner_id().map(str::to_string),
            plan: account.plan.clone(),
            updates,
        }
    }

    pub fn state(&self) -> &PairingState {
        self.machine.state()
    }

    pub fn roster(&self) -> &Arc<DeviceRoster> {
        self.roster.roster()
    }

    /// Plan gate, recomputed from the current roster on every call.
    pub fn at_limit(&self) -> bool {
        plan::is_at_limit(self.roster(), &self.plan)
    }

    fn publish(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!("session: update receiver dropped");
        }
    }

    fn publish_roster(&self) {
        self.publish(SessionUpdate::Roster {
            roster: self.roster.roster().clone(),
            stale: self.roster.is_stale(),
            at_limit: self.at_limit(),
        });
    }

    /// Resolve the owner (opening the channel) and load the roster.
    pub async fn start(&mut self) {
        self.publish(SessionUpdate::State(self.machine.state().clone()));
        match self.owner_id.clone() {
            Some(owner) => self.dispatch(PairingEvent::OwnerResolved(owner)).await,
            None => self.publish(SessionUpdate::Notice(Notice::error(
                "No user id configured; pairing stays disabled until the user is known.",
            ))),
        }
        self.refresh_now().await;
    }

    /// Run until `Quit` or until the command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> anyhow::Result<()> {
        self.start().await;
        info!(
            "session running | owner: {} | plan: {}",
            self.owner_id.as_deref().unwrap_or("-"),
            self.plan
        );

        loop {
            let deadline = self.roster.pending_deadline();
            let step = tokio::select! {
                event = next_event(&mut self.events) => Step::Channel(event),
                command = commands.recv() => Step::Command(command),
                _ = wait_until(deadline) => Step::RefreshDue,
            };

            match step {
                Step::Channel(event) => self.on_channel_event(event).await,
                Step::Command(None) | Step::Command(Some(SessionCommand::Quit)) => break,
                Step::Command(Some(command)) => self.on_command(command).await,
                Step::RefreshDue => {
                    if self.roster.take_due() {
                        self.refresh_now().await;
                    }
                }
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Close the channel and drop any pending refresh.
    pub async fn teardown(&mut self) {
        self.roster.cancel_pending();
        self.events = None;
        if let Err(e) = self.channel.close().await {
            warn!("session: closing {} failed: {e}", self.channel.name());
        }
        info!("session stopped in state {}", self.state());
    }

    pub(crate) async fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Opened) => {
                self.awaiting_sync = true;
                self.publish(SessionUpdate::ChannelOpen);
                self.dispatch(PairingEvent::ChannelOpened).await;
            }
            Some(ChannelEvent::Message(message)) => {
                let is_status = matches!(message, ServerMessage::Status(_));
                self.dispatch(PairingEvent::Server(message)).await;
                if is_status && self.awaiting_sync {
                    self.awaiting_sync = false;
                    self.publish(SessionUpdate::Synced(self.machine.state().clone()));
                }
            }
            Some(ChannelEvent::Error(reason)) => {
                self.awaiting_sync = false;
                self.dispatch(PairingEvent::ChannelError(reason)).await;
            }
            Some(ChannelEvent::Closed) | None => {
                self.awaiting_sync = false;
                self.events = None;
                self.dispatch(PairingEvent::ChannelClosed).await;
            }
        }
    }

    pub(crate) async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Pair => {
                let at_limit = self.at_limit();
                self.dispatch(PairingEvent::PairRequested { at_limit }).await;
            }
            SessionCommand::Unlink => self.dispatch(PairingEvent::UnlinkRequested).await,
            SessionCommand::Remove(id) => self.remove_device(&id).await,
            SessionCommand::Refresh => self.refresh_now().await,
            SessionCommand::Show => {
                self.publish(SessionUpdate::State(self.machine.state().clone()));
                self.publish_roster();
            }
            SessionCommand::Reconnect => match self.machine.owner_id().map(str::to_string) {
                Some(owner_id) => {
                    if let Some(follow_up) = self.apply(Effect::OpenChannel { owner_id }).await {
                        self.dispatch(follow_up).await;
                    }
                }
                None => self.publish(SessionUpdate::Notice(Notice::error(
                    "Cannot reconnect before the user is known.",
                ))),
            },
            SessionCommand::SwitchUser(id) => {
                let id = id.trim().to_string();
                if id.is_empty() || self.machine.owner_id() == Some(id.as_str()) {
                    return;
                }
                self.owner_id = Some(id.clone());
                self.roster.cancel_pending();
                self.awaiting_sync = false;
                self.dispatch(PairingEvent::OwnerResolved(id)).await;
                self.refresh_now().await;
            }
            SessionCommand::Quit => {}
        }
    }

    async fn remove_device(&mut self, id: &str) {
        match self.roster.remove_device(id).await {
            Ok(removed) => {
                self.publish(SessionUpdate::Notice(Notice::info(format!(
                    "Device {id} removed."
                ))));
                self.publish_roster();
                if removed.is_some() {
                    self.dispatch(PairingEvent::DeviceRemoved { id: id.to_string() })
                        .await;
                }
                self.dispatch_roster_changed().await;
            }
            Err(e) => {
                warn!("session: removing device {id} failed: {e}");
                self.publish(SessionUpdate::Notice(Notice::error(format!(
                    "Could not remove device {id}: {e}"
                ))));
            }
        }
    }

    async fn refresh_now(&mut self) {
        match self.roster.refresh().await {
            Ok(_) => {
                self.publish_roster();
                self.dispatch_roster_changed().await;
            }
            Err(e) => {
                self.publish(SessionUpdate::Notice(Notice::warning(format!(
                    "Could not refresh devices, showing the last known list: {e}"
                ))));
                self.publish_roster();
            }
        }
    }

    async fn dispatch_roster_changed(&mut self) {
        let event = PairingEvent::RosterChanged {
            at_limit: self.at_limit(),
            linked: self.roster().linked_ids(),
        };
        self.dispatch(event).await;
    }

    async fn dispatch(&mut self, event: PairingEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let before = self.machine.state().clone();
            let effects = self.machine.handle(event);
            if *self.machine.state() != before {
                self.publish(SessionUpdate::State(self.machine.state().clone()));
            }
            for effect in effects {
                if let Some(follow_up) = self.apply(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    /// Run one effect. Channel failures come back as a follow-up event.
    async fn apply(&mut self, effect: Effect) -> Option<PairingEvent> {
        match effect {
            Effect::OpenChannel { owner_id } => match self.channel.open(&owner_id).await {
                Ok(events) => {
                    self.events = Some(events);
                    None
                }
                Err(e) => {
                    self.events = None;
                    Some(PairingEvent::ChannelError(e.to_string()))
                }
            },
            Effect::CloseChannel => {
                self.events = None;
                if let Err(e) = self.channel.close().await {
                    warn!("session: closing {} failed: {e}", self.channel.name());
                }
                None
            }
            Effect::Emit(message) => match self.channel.emit(message).await {
                Ok(()) => None,
                Err(e) => Some(PairingEvent::ChannelError(e.to_string())),
            },
            Effect::ScheduleRefresh => {
                self.roster.schedule_refresh();
                None
            }
            Effect::Notify(notice) => {
                self.publish(SessionUpdate::Notice(notice));
                None
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
