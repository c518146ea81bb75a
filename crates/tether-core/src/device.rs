//! Paired devices as reported by the backend.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// One paired device. The backend is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "name", default)]
    pub display_name: String,
    #[serde(rename = "number", default)]
    pub phone_number: String,
    #[serde(rename = "connected", default)]
    pub is_linked: bool,
}

/// Accept `"17"` and `17` alike; ids are opaque strings on our side.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Ordered list of devices, unique by `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRoster {
    devices: Vec<DeviceRecord>,
}

impl DeviceRoster {
    /// Build a roster from a fetched list. The first record for each id wins.
    pub fn from_records(records: Vec<DeviceRecord>) -> Self {
        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.id.clone()) {
                devices.push(record);
            } else {
                warn!("roster: dropping duplicate device id {}", record.id);
            }
        }
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Number of devices currently linked.
    pub fn linked_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_linked).count()
    }

    /// Ids of the linked devices, in roster order.
    pub fn linked_ids(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|d| d.is_linked)
            .map(|d| d.id.clone())
            .collect()
    }

    /// A copy of this roster without `id`, plus the removed record.
    pub fn without(&self, id: &str) -> (Self, Option<DeviceRecord>) {
        let mut devices = self.devices.clone();
        let removed = devices
            .iter()
            .position(|d| d.id == id)
            .map(|idx| devices.remove(idx));
        (Self { devices }, removed)
    }
}
