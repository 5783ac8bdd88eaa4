use super::types::AlertPayload;
use crate::error::AlertError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Destination for alert payloads
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. Only an acknowledged delivery is `Ok`.
    async fn post(&self, payload: &AlertPayload) -> Result<(), AlertError>;
}

/// Posts alerts as JSON to the backend; success is `201 Created`
#[derive(Clone)]
pub struct HttpAlertSink {
    http: Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn post(&self, payload: &AlertPayload) -> Result<(), AlertError> {
        let response = self.http.post(&self.url).json(payload).send().await?;
        let status = response.status();

        if status != StatusCode::CREATED {
            return Err(AlertError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        debug!(
            camera_id = %payload.camera_id,
            "Alert accepted by {} ({} box(es))",
            self.url,
            payload.bounding_boxes.len()
        );
        Ok(())
    }
}
