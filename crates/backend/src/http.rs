//! HTTP backend gateway
//!
//! Talks JSON to the backend REST API with the device token from the shared
//! [`AuthState`]. Requests carry a bounded timeout so no call site blocks
//! indefinitely.

use std::time::Duration;

use agent_core::config::BackendConfig;
use agent_core::{DeviceMap, DeviceRecord, Error, PingResponse, Result, TokenResponse};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{AuthStateHandle, BackendGateway};

/// reqwest-based implementation of the backend API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    accept: String,
    timeout: Duration,
    auth: AuthStateHandle,
}

impl HttpBackend {
    /// Create a new HTTP backend from configuration
    ///
    /// # Arguments
    /// * `config` - Host, scheme, API version and request timeout
    /// * `auth` - Shared token holder read on every request
    pub fn new(config: &BackendConfig, auth: AuthStateHandle) -> Result<Self> {
        let base_url = Url::parse(&config.base_url()).map_err(|e| Error::InvalidConfig {
            message: format!("invalid backend url {}: {}", config.base_url(), e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            accept: format!("application/json; version={}", config.api_version),
            timeout: config.request_timeout,
            auth,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| Error::Internal {
            message: format!("invalid API path {}: {}", path, e),
        })
    }

    async fn send(&self, operation: &str, req: RequestBuilder) -> Result<Response> {
        let token = self.auth.token();
        let response = req
            .bearer_auth(token)
            .header(ACCEPT, &self.accept)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: operation.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    Error::backend(operation, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".into());
            return Err(Error::HttpStatus {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(operation, status = status.as_u16(), "Backend request succeeded");
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        req: RequestBuilder,
    ) -> Result<T> {
        let response = self.send(operation, req).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::backend(operation, format!("decode response: {}", e)))
    }

    /// Fetch a dataset record
    #[instrument(skip(self))]
    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Value> {
        let url = self.url(&format!("datasets/{}", dataset_id))?;
        self.send_json("get_dataset", self.client.get(url)).await
    }

    /// Merge state fields into a dataset record
    #[instrument(skip(self, fields))]
    pub async fn dataset_update_state(&self, dataset_id: &str, fields: &Value) -> Result<Value> {
        let url = self.url(&format!("datasets/{}/update_state", dataset_id))?;
        self.send_json("dataset_update_state", self.client.put(url).json(fields)).await
    }

    /// Attach an encoded data blob to a dataset
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn dataset_attach_data(
        &self,
        dataset_id: &str,
        data: &str,
        extension: &str,
    ) -> Result<Value> {
        let url = self.url(&format!("datasets/{}/attach_data", dataset_id))?;
        let body = json!({ "data": data, "extension": extension });
        self.send_json("dataset_attach_data", self.client.put(url).json(&body)).await
    }

    /// Abort an in-progress dataset upload
    #[instrument(skip(self))]
    pub async fn dataset_abort_upload(&self, dataset_id: &str) -> Result<Value> {
        let url = self.url(&format!("datasets/{}/abort_upload", dataset_id))?;
        self.send_json("dataset_abort_upload", self.client.put(url)).await
    }

    /// Fetch one queued analysis job
    #[instrument(skip(self))]
    pub async fn get_queued_analysis(&self, analysis_id: &str) -> Result<Value> {
        let url = self.url(&format!("queuedanalysis/{}", analysis_id))?;
        self.send_json("get_queued_analysis", self.client.get(url)).await
    }

    /// List queued analysis jobs
    #[instrument(skip(self))]
    pub async fn get_queued_analysis_index(&self) -> Result<Value> {
        let url = self.url("queuedanalysis")?;
        self.send_json("get_queued_analysis_index", self.client.get(url)).await
    }

    /// Mark a queued analysis job as started
    #[instrument(skip(self))]
    pub async fn queued_analysis_mark_started(&self, analysis_id: &str) -> Result<Value> {
        let url = self.url(&format!("queuedanalysis/{}/mark_started", analysis_id))?;
        self.send_json("queued_analysis_mark_started", self.client.put(url)).await
    }

    /// Mark a queued analysis job as ended
    #[instrument(skip(self))]
    pub async fn queued_analysis_mark_ended(&self, analysis_id: &str) -> Result<Value> {
        let url = self.url(&format!("queuedanalysis/{}/mark_ended", analysis_id))?;
        self.send_json("queued_analysis_mark_ended", self.client.put(url)).await
    }

    /// Issue upload credentials scoped to one of the device's datasets
    #[instrument(skip(self))]
    pub async fn device_generate_dataset_credentials(
        &self,
        device_id: &str,
        dataset_id: &str,
    ) -> Result<Value> {
        let url = self.url(&format!("devices/{}/generate_dataset_credentials", device_id))?;
        let body = json!({ "dataset_id": dataset_id });
        self.send_json(
            "device_generate_dataset_credentials",
            self.client.post(url).json(&body),
        )
        .await
    }
}

#[async_trait]
impl BackendGateway for HttpBackend {
    #[instrument(skip(self))]
    async fn get_device_realtime_datasets(&self, device_id: &str) -> Result<DeviceRecord> {
        let mut url = self.url(&format!("devices/{}", device_id))?;
        url.query_pairs_mut().append_pair("with_realtime_datasets", "true");
        self.send_json("get_device_realtime_datasets", self.client.get(url)).await
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, current_token: &str) -> Result<TokenResponse> {
        let url = self.url("device-token-refresh/")?;
        let body = json!({ "token": current_token });
        self.send_json("refresh_token", self.client.post(url).json(&body)).await
    }

    #[instrument(skip(self))]
    async fn ping(&self, device_id: &str) -> Result<PingResponse> {
        let url = self.url(&format!("devices/{}/ping", device_id))?;
        self.send_json("ping", self.client.put(url).json(&json!({}))).await
    }

    #[instrument(skip(self, mapping), fields(entries = mapping.devices.len()))]
    async fn write_device_map(&self, device_id: &str, mapping: &DeviceMap) -> Result<()> {
        let url = self.url(&format!("devices/{}/map", device_id))?;
        self.send("write_device_map", self.client.put(url).json(mapping)).await?;
        Ok(())
    }
}
