//! In-memory fakes for the channel and REST seams.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tether_core::{
    device::DeviceRecord,
    error::TetherError,
    message::{ChannelEvent, ClientMessage},
    traits::{DeviceApi, RealtimeChannel},
};
use tokio::sync::mpsc;

fn records(devices: &[(&str, bool)]) -> Vec<DeviceRecord> {
    devices
        .iter()
        .map(|(id, linked)| DeviceRecord {
            id: id.to_string(),
            display_name: format!("Phone {id}"),
            phone_number: "5511999887766".to_string(),
            is_linked: *linked,
        })
        .collect()
}

#[derive(Default)]
pub struct FakeApi {
    devices: Mutex<Vec<DeviceRecord>>,
    deleted: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    fail_list: AtomicBool,
    fail_delete: AtomicBool,
}

impl FakeApi {
    pub fn with_devices(devices: &[(&str, bool)]) -> Self {
        let api = Self::default();
        api.set_devices(devices);
        api
    }

    pub fn set_devices(&self, devices: &[(&str, bool)]) {
        *self.devices.lock().unwrap() = records(devices);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceApi for FakeApi {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, TetherError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(TetherError::Transport("connection refused".into()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn delete_device(&self, id: &str) -> Result<(), TetherError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TetherError::Api {
                status: 500,
                message: "delete failed".into(),
            });
        }
        self.devices.lock().unwrap().retain(|d| d.id != id);
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeChannel {
    listener: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    opened: Mutex<Vec<String>>,
    emitted: Mutex<Vec<ClientMessage>>,
    closes: AtomicUsize,
    fail_open: AtomicBool,
}

impl FakeChannel {
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Push an event as if it came from the server side.
    pub async fn push(&self, event: ChannelEvent) {
        let tx = self.listener.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn emitted(&self) -> Vec<ClientMessage> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }
}

#[async_trait]
impl RealtimeChannel for FakeChannel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn open(&self, owner_id: &str) -> Result<mpsc::Receiver<ChannelEvent>, TetherError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TetherError::Config("bad realtime url".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.listener.lock().unwrap() = Some(tx);
        self.opened.lock().unwrap().push(owner_id.to_string());
        Ok(rx)
    }

    async fn emit(&self, message: ClientMessage) -> Result<(), TetherError> {
        if self.listener.lock().unwrap().is_none() {
            return Err(TetherError::Channel("realtime channel is not open".into()));
        }
        self.emitted.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) -> Result<(), TetherError> {
        self.listener.lock().unwrap().take();
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
