use garde::Validate;
use serde::{Deserialize, Serialize};

/// Request to enqueue an image for detection.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(length(min = 1, max = 1024))]
    pub photo_path: String,

    #[garde(length(max = 128))]
    #[serde(default)]
    pub chat_id: String,
}

/// Response after a job was queued.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: String,
}
