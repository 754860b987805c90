use instadrop_common::{DeviceId, UsageError, UsageStatus, UsageStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BackendClient, BackendError};

/// Usage counts kept by the backend's metering endpoints.
#[derive(Clone, Debug)]
pub struct RemoteUsageStore {
    client: BackendClient,
    quota: u32,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    count: u32,
    remaining: Option<u32>,
}

#[derive(Deserialize)]
struct RecordBody {
    count: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordRequest<'a> {
    device_id: &'a str,
}

impl RemoteUsageStore {
    /// `quota` fills in `remaining` when the service omits it.
    pub fn new(client: BackendClient, quota: u32) -> Self {
        Self { client, quota }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    async fn fetch_status(
        &self,
        device: &DeviceId,
    ) -> Result<UsageStatus, BackendError> {
        let url = self.client.endpoint("api/usage/status")?;
        let response = self
            .client
            .client
            .get(url)
            .query(&[("deviceId", device.as_str())])
            .send()
            .await
            .map_err(|e| self.client.http_error(e))?;
        let body: StatusBody = self.client.read_json(response).await?;

        Ok(UsageStatus {
            count: body.count,
            remaining: body
                .remaining
                .unwrap_or_else(|| self.quota.saturating_sub(body.count)),
        })
    }

    async fn post_record(&self, device: &DeviceId) -> Result<u32, BackendError> {
        let url = self.client.endpoint("api/usage/record")?;
        let response = self
            .client
            .client
            .post(url)
            .json(&RecordRequest {
                device_id: device.as_str(),
            })
            .send()
            .await
            .map_err(|e| self.client.http_error(e))?;
        let body: RecordBody = self.client.read_json(response).await?;

        body.count.ok_or_else(|| BackendError::Status {
            status: 200,
            detail: "usage record response has no count".to_owned(),
        })
    }
}

impl UsageStore for RemoteUsageStore {
    async fn status(
        &self,
        device: &DeviceId,
    ) -> Result<UsageStatus, UsageError> {
        let status = self.fetch_status(device).await.map_err(remote)?;
        debug!("device {device}: {} uses, {} left", status.count, status.remaining);
        Ok(status)
    }

    async fn record(&self, device: &DeviceId) -> Result<u32, UsageError> {
        self.post_record(device).await.map_err(remote)
    }
}

fn remote(e: BackendError) -> UsageError {
    UsageError::Remote(e.to_string())
}
