use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::{Classify, ErrorClass};

/// Tells the downstream service that a prediction is ready.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, prediction_id: &str) -> Result<(), NotifyError>;
}

/// Calls `GET <base>/results?predictionId=<id>` and requires a 2xx answer.
pub struct HttpNotifier {
    http: Client,
    results_url: String,
}

impl HttpNotifier {
    pub fn new(
        downstream_url: &str,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(NotifyError::Http)?;

        Ok(Self {
            http,
            results_url: results_url(downstream_url),
        })
    }
}

fn results_url(downstream_url: &str) -> String {
    let base = downstream_url.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/results")
    } else {
        format!("http://{base}/results")
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, prediction_id: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .get(&self.results_url)
            .query(&[("predictionId", prediction_id)])
            .send()
            .await
            .map_err(NotifyError::Http)?;

        let status = response.status();
        tracing::debug!(prediction_id, status = status.as_u16(), "Downstream responded");
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Downstream returned {0}")]
    Status(StatusCode),
}

impl Classify for NotifyError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Notification
    }
}
