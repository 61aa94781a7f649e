use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Classify, ErrorClass};

/// Read-only view of the worker fleet's scaling group.
#[async_trait]
pub trait FleetControlPlane: Send + Sync {
    /// Desired capacity of `fleet_id`, or `None` if no such fleet exists.
    async fn desired_capacity(&self, fleet_id: &str) -> Result<Option<u64>, FleetError>;
}

#[derive(Debug, Deserialize)]
struct FleetDescription {
    desired_capacity: u64,
}

/// Control-plane client for `GET <base>/fleets/<id>`.
pub struct HttpFleetControlPlane {
    http: Client,
    base_url: String,
}

impl HttpFleetControlPlane {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FleetError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FleetError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fleet_url(&self, fleet_id: &str) -> Result<reqwest::Url, FleetError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| FleetError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| FleetError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push("fleets")
            .push(fleet_id);
        Ok(url)
    }
}

#[async_trait]
impl FleetControlPlane for HttpFleetControlPlane {
    async fn desired_capacity(&self, fleet_id: &str) -> Result<Option<u64>, FleetError> {
        let response = self
            .http
            .get(self.fleet_url(fleet_id)?)
            .send()
            .await
            .map_err(FleetError::Http)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let fleet: FleetDescription = response.json().await.map_err(FleetError::Http)?;
                Ok(Some(fleet.desired_capacity))
            }
            status => Err(FleetError::Status(status)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Fleet control-plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fleet control-plane returned {0}")]
    Status(StatusCode),

    #[error("Invalid fleet control-plane URL {0}")]
    InvalidUrl(String),
}

impl Classify for FleetError {
    fn class(&self) -> ErrorClass {
        match self {
            FleetError::InvalidUrl(_) => ErrorClass::Configuration,
            FleetError::Status(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                ErrorClass::Configuration
            }
            _ => ErrorClass::Transient,
        }
    }
}
