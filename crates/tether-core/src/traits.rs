use crate::{
    device::DeviceRecord,
    error::TetherError,
    message::{ChannelEvent, ClientMessage},
};
use async_trait::async_trait;

/// Realtime channel trait: one live, owner-tagged connection at a time.
///
/// Implementations report everything that happens on the connection through
/// the receiver returned by `open`. Failures after `open` returns arrive as
/// `ChannelEvent::Error`, never as a panic or a dropped error.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Open a channel for `owner_id`, closing any channel already open.
    async fn open(
        &self,
        owner_id: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<ChannelEvent>, TetherError>;

    /// Queue a message for the server.
    async fn emit(&self, message: ClientMessage) -> Result<(), TetherError>;

    /// Detach the listener and close. Safe to call repeatedly.
    async fn close(&self) -> Result<(), TetherError>;
}

/// Device endpoints of the REST API.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Fetch every device paired to the account.
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, TetherError>;

    /// Delete a paired device.
    async fn delete_device(&self, id: &str) -> Result<(), TetherError>;
}
