//! Plan-limit gate: how many devices a subscription tier may link.

use crate::device::DeviceRoster;

/// Max linked devices per plan tier. Keys are lowercase.
const PLAN_LIMITS: &[(&str, u32)] = &[
    ("free", 1),
    ("basic", 3),
    ("pro", 5),
    ("business", 10),
    ("enterprise", 25),
];

/// Fallback for tiers missing from the table.
pub const DEFAULT_MAX_DEVICES: u32 = 1;

/// Derived device limit for a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimit {
    pub max_devices: u32,
}

impl PlanLimit {
    /// Look up a tier, case-insensitively. Unknown tiers get the default.
    pub fn for_tier(tier: &str) -> Self {
        let tier = tier.trim().to_ascii_lowercase();
        let max_devices = PLAN_LIMITS
            .iter()
            .find(|(name, _)| *name == tier)
            .map(|(_, max)| *max)
            .unwrap_or(DEFAULT_MAX_DEVICES);
        Self { max_devices }
    }
}

/// True when the linked-device count has reached the tier's maximum.
pub fn is_at_limit(roster: &DeviceRoster, plan_tier: &str) -> bool {
    roster.linked_count() >= PlanLimit::for_tier(plan_tier).max_devices as usize
}
