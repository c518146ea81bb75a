//! Terminal rendering of link state, device roster and notices.

use tether_channels::qr;
use tether_core::{
    device::DeviceRoster,
    message::{Notice, NoticeLevel},
    pairing::PairingState,
    plan::PlanLimit,
};

/// One-line headline plus, while waiting for a scan, the QR code.
pub fn render_state(state: &PairingState, invert: bool) -> String {
    match state {
        PairingState::WaitingForCode { code } => {
            let mut out = String::from(
                "Scan this code with WhatsApp: Settings > Linked devices > Link a device\n\n",
            );
            match qr::render_terminal(code, invert) {
                Ok(art) => out.push_str(&art),
                // Payload too large for a QR symbol.
                Err(_) => {
                    out.push_str(code);
                    out.push('\n');
                }
            }
            out
        }
        PairingState::UserUnresolved => "Status: waiting for user (pairing disabled)".to_string(),
        PairingState::LimitReached => {
            "Status: device limit reached. Remove a device or upgrade your plan.".to_string()
        }
        other => format!("Status: {other}"),
    }
}

/// Device table with the plan gate underneath.
pub fn render_roster(roster: &DeviceRoster, plan: &str, stale: bool, at_limit: bool) -> String {
    let limit = PlanLimit::for_tier(plan);
    let mut out = String::new();
    if roster.is_empty() {
        out.push_str("No devices.\n");
    } else {
        for device in roster.devices() {
            let name = if device.display_name.is_empty() {
                "(unnamed)"
            } else {
                device.display_name.as_str()
            };
            let number = if device.phone_number.is_empty() {
                "-"
            } else {
                device.phone_number.as_str()
            };
            let mark = if device.is_linked { "linked" } else { "offline" };
            out.push_str(&format!("  [{}] {name}  {number}  {mark}\n", device.id));
        }
    }

    out.push_str(&format!(
        "Plan {plan}: {}/{} linked",
        roster.linked_count(),
        limit.max_devices
    ));
    if at_limit {
        out.push_str(" (limit reached)");
    }
    if stale {
        out.push_str("\n(list may be out of date)");
    }
    out
}

pub fn render_notice(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "error",
    };
    format!("[{}] {tag}: {}", notice.at.format("%H:%M:%S"), notice.text)
}
