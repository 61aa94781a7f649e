use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Control server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the prediction store
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Queue name, used as the Redis key prefix
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Bucket holding original and predicted images
    pub bucket_name: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Custom S3-compatible endpoint (MinIO, LocalStack). Uses AWS when unset.
    pub s3_endpoint: Option<String>,

    pub aws_access_key_id: Option<String>,

    pub aws_secret_access_key: Option<String>,

    /// Downstream service notified with `/results?predictionId=<id>`
    pub downstream_url: String,

    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,

    #[serde(default)]
    pub notify_accept_invalid_certs: bool,

    /// Long-poll window for a single receive
    #[serde(default = "default_receive_wait_secs")]
    pub receive_wait_secs: u64,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Independent consume loops in this process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Root of per-job working directories
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_detector_program")]
    pub detector_program: String,

    #[serde(default = "default_detector_script")]
    pub detector_script: PathBuf,

    #[serde(default = "default_model_weights")]
    pub model_weights: PathBuf,

    /// Dataset YAML carrying the class-name table
    #[serde(default = "default_data_config")]
    pub data_config: PathBuf,

    /// Fleet whose desired capacity feeds the backlog metric
    pub fleet_id: String,

    /// Fleet control-plane base URL
    pub fleet_api_url: String,

    #[serde(default = "default_fleet_timeout_secs")]
    pub fleet_timeout_secs: u64,

    #[serde(default = "default_metric_namespace")]
    pub metric_namespace: String,

    #[serde(default = "default_metric_name")]
    pub metric_name: String,

    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    /// Prometheus listener for the worker process (e.g., "0.0.0.0:9100")
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_queue_name() -> String {
    "predictions".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_receive_wait_secs() -> u64 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("static/data")
}

fn default_detector_program() -> String {
    "python".to_string()
}

fn default_detector_script() -> PathBuf {
    PathBuf::from("detect.py")
}

fn default_model_weights() -> PathBuf {
    PathBuf::from("yolov5s.pt")
}

fn default_data_config() -> PathBuf {
    PathBuf::from("data/coco128.yaml")
}

fn default_fleet_timeout_secs() -> u64 {
    5
}

fn default_metric_namespace() -> String {
    "detect_worker".to_string()
}

fn default_metric_name() -> String {
    "backlog_per_instance".to_string()
}

fn default_report_interval_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn fleet_timeout(&self) -> Duration {
        Duration::from_secs(self.fleet_timeout_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}
