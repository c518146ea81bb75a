//! REST client for the device endpoints.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tether_core::{
    config::{AccountConfig, ApiConfig},
    device::DeviceRecord,
    error::TetherError,
    traits::DeviceApi,
};
use tracing::debug;

/// Error bodies longer than this are cut before they reach a notice.
const MAX_ERROR_BODY: usize = 1000;

/// The backend answers with a bare array; some deployments wrap it.
#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceList {
    Bare(Vec<DeviceRecord>),
    Wrapped { devices: Vec<DeviceRecord> },
}

/// HTTP implementation of [`DeviceApi`].
#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDeviceApi {
    pub fn new(api: &ApiConfig, account: &AccountConfig) -> Result<Self, TetherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TetherError::Transport(format!("failed to build http client: {e}")))?;

        let token = account.api_token.trim();
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then(|| token.to_string()),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn devices_url(&self) -> String {
        format!("{}/whatsapp/devices", self.base_url)
    }

    async fn check(response: Response) -> Result<Response, TetherError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TetherError::Api {
            status: status.as_u16(),
            message: truncate(body),
        })
    }
}

fn transport(e: reqwest::Error) -> TetherError {
    TetherError::Transport(e.to_string())
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("... (truncated)");
    }
    body
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, TetherError> {
        let response = self
            .authorized(self.client.get(self.devices_url()))
            .send()
            .await
            .map_err(transport)?;
        let response = Self::check(response).await?;

        let list: DeviceList = response
            .json()
            .await
            .map_err(|e| TetherError::Transport(format!("invalid device list: {e}")))?;
        let devices = match list {
            DeviceList::Bare(devices) | DeviceList::Wrapped { devices } => devices,
        };
        debug!("api: fetched {} device(s)", devices.len());
        Ok(devices)
    }

    async fn delete_device(&self, id: &str) -> Result<(), TetherError> {
        let mut url = reqwest::Url::parse(&self.devices_url())
            .map_err(|e| TetherError::Config(format!("invalid api url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| TetherError::Config("api url cannot have a path".into()))?
            .push(id);

        let response = self
            .authorized(self.client.delete(url))
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;
        debug!("api: deleted device {id}");
        Ok(())
    }
}
