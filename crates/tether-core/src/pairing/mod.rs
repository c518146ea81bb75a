//! Pairing state machine for the WhatsApp link lifecycle.
//!
//! The machine is pure: [`PairingMachine::handle`] mutates the state and
//! returns the side effects the caller must run (open the channel, emit a
//! request, schedule a roster refresh, show a notice). Nothing here does I/O.
//!
//! A status event equal to the current state's mapped status is a no-op, so a
//! server repeating itself never produces duplicate effects.


use crate::message::{ClientMessage, Notice, ServerMessage, ServerStatus};
use std::fmt;
use tracing::{debug, info, warn};

/// Where the link currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// Owner id not known yet; no channel exists.
    UserUnresolved,
    Idle,
    /// Pairing requested, waiting for the server to issue a code.
    Connecting,
    /// A pairing code is available for display.
    WaitingForCode { code: String },
    Linked,
    Unlinked,
    /// The plan's device limit blocked a pairing request.
    LimitReached,
    /// The server reported a status we do not recognize.
    Unknown(String),
}

impl PairingState {
    /// The server status this state corresponds to, if any.
    fn server_status(&self) -> Option<ServerStatus> {
        match self {
            Self::Idle | Self::Unlinked => Some(ServerStatus::Disconnected),
            Self::Connecting => Some(ServerStatus::Connecting),
            Self::WaitingForCode { .. } => Some(ServerStatus::WaitingQr),
            Self::Linked => Some(ServerStatus::Connected),
            Self::Unknown(raw) => Some(ServerStatus::Unknown(raw.clone())),
            Self::UserUnresolved | Self::LimitReached => None,
        }
    }

    fn is_pairing(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::WaitingForCode { .. } | Self::Linked
        )
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserUnresolved => f.write_str("user unresolved"),
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::WaitingForCode { .. } => f.write_str("waiting for scan"),
            Self::Linked => f.write_str("linked"),
            Self::Unlinked => f.write_str("unlinked"),
            Self::LimitReached => f.write_str("device limit reached"),
            Self::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// The signed-in user's id became known (or changed).
    OwnerResolved(String),
    /// The user asked to pair a new device. `at_limit` comes from the plan gate.
    PairRequested { at_limit: bool },
    /// The user asked to drop the current link or cancel pairing.
    UnlinkRequested,
    ChannelOpened,
    ChannelError(String),
    ChannelClosed,
    Server(ServerMessage),
    /// A roster entry was deleted on the backend.
    DeviceRemoved { id: String },
    /// The roster was replaced; `at_limit` is the recomputed gate and
    /// `linked` the ids of the devices currently linked.
    RosterChanged { at_limit: bool, linked: Vec<String> },
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenChannel { owner_id: String },
    CloseChannel,
    Emit(ClientMessage),
    ScheduleRefresh,
    Notify(Notice),
}

/// The client-side pairing session: owner plus link state.
///
/// While `Linked`, the machine also tracks which roster entry is the link it
/// established. It is resolved from the first roster update after linking: the
/// one linked id that was not linked when pairing began (or the only linked id
/// when no pairing was started here). Until then no device is tracked.
#[derive(Debug, Clone)]
pub struct PairingMachine {
    owner_id: Option<String>,
    state: PairingState,
    /// Linked ids from the last roster update.
    known_linked: Vec<String>,
    /// `known_linked` at the moment the current pairing began.
    baseline: Option<Vec<String>>,
    tracked_device: Option<String>,
}

impl Default for PairingMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingMachine {
    pub fn new() -> Self {
        Self {
            owner_id: None,
            state: PairingState::UserUnresolved,
            known_linked: Vec::new(),
            baseline: None,
            tracked_device: None,
        }
    }

    pub fn state(&self) -> &PairingState {
        &self.state
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Roster id of the device this session's link belongs to, once known.
    pub fn tracked_device(&self) -> Option<&str> {
        self.tracked_device.as_deref()
    }

    /// The code to display, present only while waiting for a scan.
    pub fn pairing_code(&self) -> Option<&str> {
        match &self.state {
            PairingState::WaitingForCode { code } => Some(code),
            _ => None,
        }
    }

    /// Apply one event and return the effects to run, in order.
    pub fn handle(&mut self, event: PairingEvent) -> Vec<Effect> {
        let before = self.state.clone();
        let effects = match event {
            PairingEvent::OwnerResolved(id) => self.on_owner(id),
            PairingEvent::PairRequested { at_limit } => self.on_pair_request(at_limit),
            PairingEvent::UnlinkRequested => self.on_unlink_request(),
            PairingEvent::ChannelOpened => {
                debug!("pairing: channel open in state {}", self.state);
                Vec::new()
            }
            PairingEvent::ChannelError(reason) => self.on_channel_down(Some(reason)),
            PairingEvent::ChannelClosed => self.on_channel_down(None),
            PairingEvent::Server(ServerMessage::Status(status)) => self.on_status(status),
            PairingEvent::Server(ServerMessage::Qr(code)) => self.on_code(code),
            PairingEvent::Server(ServerMessage::Error(text)) => {
                warn!("pairing: server error: {text}");
                vec![Effect::Notify(Notice::error(text))]
            }
            PairingEvent::DeviceRemoved { id } => {
                if self.state == PairingState::Linked && self.tracked_device() == Some(id.as_str()) {
                    self.state = PairingState::Unlinked;
                }
                self.known_linked.retain(|known| *known != id);
                Vec::new()
            }
            PairingEvent::RosterChanged { at_limit, linked } => {
                self.known_linked = linked;
                if self.state == PairingState::Linked && self.tracked_device.is_none() {
                    self.track_new_device();
                }
                if !at_limit && self.state == PairingState::LimitReached {
                    self.state = PairingState::Idle;
                    vec![Effect::Notify(Notice::info(
                        "A device slot is free again; you can pair a new device.",
                    ))]
                } else {
                    Vec::new()
                }
            }
        };

        if before != self.state {
            info!("pairing: {before} -> {}", self.state);
        }
        self.update_tracking();
        effects
    }

    fn update_tracking(&mut self) {
        match self.state {
            PairingState::Linked => {}
            PairingState::Connecting | PairingState::WaitingForCode { .. } => {
                self.tracked_device = None;
                if self.baseline.is_none() {
                    self.baseline = Some(self.known_linked.clone());
                }
            }
            _ => {
                self.tracked_device = None;
                self.baseline = None;
            }
        }
    }

    fn track_new_device(&mut self) {
        let baseline = self.baseline.as_deref().unwrap_or(&[]);
        let fresh: Vec<String> = self
            .known_linked
            .iter()
            .filter(|id| !baseline.contains(*id))
            .cloned()
            .collect();
        match fresh.as_slice() {
            [id] => {
                info!("pairing: tracking linked device {id}");
                self.tracked_device = Some(id.clone());
                self.baseline = None;
            }
            [] => debug!("pairing: linked device not in roster yet"),
            _ => debug!("pairing: {} candidate devices, none tracked", fresh.len()),
        }
    }

    fn on_owner(&mut self, id: String) -> Vec<Effect> {
        let id = id.trim().to_string();
        if id.is_empty() {
            return Vec::new();
        }

        match self.owner_id.as_deref() {
            Some(current) if current == id => Vec::new(),
            Some(_) => {
                self.owner_id = Some(id.clone());
                self.known_linked.clear();
                self.state = PairingState::Idle;
                vec![Effect::CloseChannel, Effect::OpenChannel { owner_id: id }]
            }
            None => {
                self.owner_id = Some(id.clone());
                self.state = PairingState::Idle;
                vec![Effect::OpenChannel { owner_id: id }]
            }
        }
    }

    fn on_pair_request(&mut self, at_limit: bool) -> Vec<Effect> {
        let Some(owner) = self.owner_id.clone() else {
            return vec![Effect::Notify(Notice::error(
                "Cannot pair a device before the user is known.",
            ))];
        };

        match self.state {
            PairingState::Idle | PairingState::Unlinked | PairingState::Unknown(_) => {
                if at_limit {
                    self.state = PairingState::LimitReached;
                    vec![Effect::Notify(limit_notice())]
                } else {
                    self.state = PairingState::Connecting;
                    vec![Effect::Emit(ClientMessage::ConnectRequest { user_id: owner })]
                }
            }
            PairingState::LimitReached => vec![Effect::Notify(limit_notice())],
            PairingState::Connecting | PairingState::WaitingForCode { .. } => {
                vec![Effect::Notify(Notice::info("Pairing is already in progress."))]
            }
            PairingState::Linked => vec![Effect::Notify(Notice::info(
                "A device is already linked. Unlink it before pairing again.",
            ))],
            PairingState::UserUnresolved => Vec::new(),
        }
    }

    fn on_unlink_request(&mut self) -> Vec<Effect> {
        if self.state.is_pairing() {
            vec![Effect::Emit(ClientMessage::DisconnectRequest)]
        } else {
            vec![Effect::Notify(Notice::info("There is no active link to drop."))]
        }
    }

    fn on_channel_down(&mut self, reason: Option<String>) -> Vec<Effect> {
        if self.state == PairingState::UserUnresolved {
            return Vec::new();
        }
        self.state = PairingState::Unlinked;
        match reason {
            Some(reason) => vec![Effect::Notify(Notice::error(format!(
                "Realtime connection lost: {reason}"
            )))],
            None => Vec::new(),
        }
    }

    fn on_status(&mut self, status: ServerStatus) -> Vec<Effect> {
        if self.state == PairingState::UserUnresolved {
            return Vec::new();
        }
        if self.state.server_status().as_ref() == Some(&status) {
            debug!("pairing: duplicate status {status:?} ignored");
            return Vec::new();
        }

        use PairingState as S;
        match (self.state.clone(), status) {
            (_, ServerStatus::Connected) => {
                self.state = S::Linked;
                vec![Effect::ScheduleRefresh]
            }
            (S::Connecting | S::WaitingForCode { .. } | S::Linked, ServerStatus::Disconnected) => {
                self.state = S::Unlinked;
                vec![Effect::ScheduleRefresh]
            }
            (S::Unknown(_), ServerStatus::Disconnected) => {
                self.state = S::Unlinked;
                Vec::new()
            }
            // A waiting status is only actionable together with a code.
            (S::Connecting, ServerStatus::WaitingQr) => Vec::new(),
            (S::Linked, ServerStatus::WaitingQr | ServerStatus::Connecting) => {
                self.state = S::Connecting;
                vec![Effect::ScheduleRefresh]
            }
            (
                S::Idle | S::Unlinked | S::Unknown(_) | S::LimitReached | S::WaitingForCode { .. },
                ServerStatus::WaitingQr | ServerStatus::Connecting,
            ) => {
                self.state = S::Connecting;
                Vec::new()
            }
            (_, ServerStatus::Unknown(raw)) => {
                warn!("pairing: unrecognized server status '{raw}'");
                let notice = Notice::warning(format!("Unexpected link status from server: {raw}"));
                self.state = S::Unknown(raw);
                vec![Effect::Notify(notice)]
            }
            _ => Vec::new(),
        }
    }

    fn on_code(&mut self, code: String) -> Vec<Effect> {
        if code.trim().is_empty() {
            debug!("pairing: empty pairing code ignored");
            return Vec::new();
        }

        match self.state {
            PairingState::Connecting
            | PairingState::WaitingForCode { .. }
            | PairingState::Idle
            | PairingState::Unlinked
            | PairingState::Unknown(_)
            | PairingState::LimitReached => {
                self.state = PairingState::WaitingForCode { code };
            }
            PairingState::Linked | PairingState::UserUnresolved => {
                debug!("pairing: code ignored in state {}", self.state);
            }
        }
        Vec::new()
    }
}

fn limit_notice() -> Notice {
    Notice::warning("Device limit reached for your plan. Remove a device or upgrade to pair another.")
}
