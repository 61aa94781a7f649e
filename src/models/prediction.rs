use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// One detected object. Coordinates are normalised to the image size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DetectionLabel {
    #[garde(length(min = 1))]
    #[serde(rename = "class")]
    pub class_name: String,

    #[garde(range(min = 0.0, max = 1.0))]
    pub cx: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub cy: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub width: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub height: f64,
}

/// Structured outcome of a processed job, persisted once per prediction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub original_img_path: String,
    /// Blob key of the annotated image, empty when the detector produced none.
    pub predicted_img_path: String,
    pub chat_id: String,
    pub labels: Vec<DetectionLabel>,
    pub time: DateTime<Utc>,
}
