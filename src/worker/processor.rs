use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::Display;
use tokio::io::AsyncReadExt;

use crate::error::{Classify, ErrorClass};
use crate::models::job::Job;
use crate::models::prediction::PredictionRecord;
use crate::services::{
    inference::{InferenceEngine, InferenceError, InferenceRequest},
    labels::{parse_label_file, ClassNames, LabelError},
    notifier::Notifier,
    results::{ResultStore, ResultStoreError},
    storage::{BlobStore, StorageError},
};
use crate::worker::workdir::WorkDir;

/// Blob prefix for annotated images. Never shared with source images.
pub const PREDICTIONS_PREFIX: &str = "predictions/";

/// Pipeline step at which a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Prepare,
    Download,
    Inference,
    Upload,
    Parse,
    Persist,
}

#[derive(Debug, thiserror::Error)]
pub enum JobFailure {
    #[error("{0}")]
    InvalidPayload(String),

    #[error("Downloaded object is not a supported image")]
    NotAnImage,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Labels(#[from] LabelError),

    #[error(transparent)]
    ResultStore(#[from] ResultStoreError),

    #[error("Working directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for JobFailure {
    fn class(&self) -> ErrorClass {
        match self {
            JobFailure::InvalidPayload(_) | JobFailure::NotAnImage => ErrorClass::Data,
            JobFailure::Storage(e) => e.class(),
            JobFailure::Inference(e) => e.class(),
            JobFailure::Labels(e) => e.class(),
            JobFailure::ResultStore(e) => e.class(),
            JobFailure::Io(e) if e.kind() == std::io::ErrorKind::InvalidInput => ErrorClass::Data,
            JobFailure::Io(_) => ErrorClass::Transient,
        }
    }
}

/// A job that could not be carried through the pipeline.
#[derive(Debug, thiserror::Error)]
#[error("job {job_id} failed during {stage}: {failure}")]
pub struct ProcessingError {
    pub job_id: String,
    pub stage: Stage,
    #[source]
    pub failure: JobFailure,
}

impl Classify for ProcessingError {
    fn class(&self) -> ErrorClass {
        self.failure.class()
    }
}

fn at<E: Into<JobFailure>>(
    job_id: &str,
    stage: Stage,
) -> impl FnOnce(E) -> ProcessingError + '_ {
    move |e| ProcessingError {
        job_id: job_id.to_string(),
        stage,
        failure: e.into(),
    }
}

/// Terminal state of a successfully processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A record was persisted. `notified` is false if the downstream call failed.
    Recorded { labels: usize, notified: bool },
    /// The detector found nothing; no record, no notification.
    NoDetections,
}

/// Runs a single job end to end: download, detect, upload, parse, persist, notify.
///
/// Acknowledging the job is left to the caller.
pub struct JobProcessor {
    blobs: Arc<dyn BlobStore>,
    results: Arc<dyn ResultStore>,
    notifier: Arc<dyn Notifier>,
    engine: Arc<dyn InferenceEngine>,
    classes: Arc<ClassNames>,
    work_root: PathBuf,
}

impl JobProcessor {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        results: Arc<dyn ResultStore>,
        notifier: Arc<dyn Notifier>,
        engine: Arc<dyn InferenceEngine>,
        classes: Arc<ClassNames>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            blobs,
            results,
            notifier,
            engine,
            classes,
            work_root: work_root.into(),
        }
    }

    pub async fn process(&self, job: &Job) -> Result<JobOutcome, ProcessingError> {
        let file_name = local_file_name(&job.payload.image_path)
            .ok_or_else(|| {
                JobFailure::InvalidPayload(format!(
                    "photo_path {:?} does not name a file",
                    job.payload.image_path
                ))
            })
            .map_err(at(&job.id, Stage::Prepare))?;

        let workdir = WorkDir::create(&self.work_root, &job.id)
            .await
            .map_err(at(&job.id, Stage::Prepare))?;

        let result = self.run_pipeline(job, file_name, &workdir).await;

        if let Err(e) = workdir.remove().await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to remove working directory");
        }
        result
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        file_name: &str,
        workdir: &WorkDir,
    ) -> Result<JobOutcome, ProcessingError> {
        let original_key = job.payload.image_path.as_str();
        let source = workdir.input_path(file_name);

        self.blobs
            .get(original_key, &source)
            .await
            .map_err(at(&job.id, Stage::Download))?;
        let format = sniff_image(&source)
            .await
            .map_err(at(&job.id, Stage::Download))?;
        tracing::info!(
            job_id = %job.id,
            image_path = original_key,
            format = ?format,
            "Download completed"
        );

        let output = self
            .engine
            .detect(&InferenceRequest {
                source,
                project: workdir.runs_dir(),
                name: job.id.clone(),
            })
            .await
            .map_err(at(&job.id, Stage::Inference))?;
        tracing::info!(job_id = %job.id, "Inference completed");

        let annotated = output.annotated_image(file_name);
        let has_annotated = tokio::fs::try_exists(&annotated)
            .await
            .map_err(at(&job.id, Stage::Upload))?;
        let predicted_img_path = if has_annotated {
            let key = prediction_key(original_key, file_name, &job.id);
            self.blobs
                .put(&key, &annotated)
                .await
                .map_err(at(&job.id, Stage::Upload))?;
            tracing::info!(job_id = %job.id, key = %key, "Annotated image uploaded");
            key
        } else {
            tracing::warn!(job_id = %job.id, "Detector produced no annotated image");
            String::new()
        };

        let label_path = output.label_file(file_name);
        let contents = match tokio::fs::read_to_string(&label_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(job_id = %job.id, "No label file, nothing detected");
                return Ok(JobOutcome::NoDetections);
            }
            Err(e) => return Err(at(&job.id, Stage::Parse)(e)),
        };

        let labels = parse_label_file(&contents, &self.classes).map_err(at(&job.id, Stage::Parse))?;
        if labels.is_empty() {
            tracing::info!(job_id = %job.id, "Empty label file, nothing detected");
            return Ok(JobOutcome::NoDetections);
        }
        tracing::info!(
            job_id = %job.id,
            labels = labels.len(),
            summary = ?labels.iter().map(|l| l.class_name.as_str()).collect::<Vec<_>>(),
            "Prediction summary"
        );

        let label_count = labels.len();
        let record = PredictionRecord {
            prediction_id: job.id.clone(),
            original_img_path: original_key.to_string(),
            predicted_img_path,
            chat_id: job.payload.chat_id.clone(),
            labels,
            time: Utc::now(),
        };
        self.results
            .put(&record)
            .await
            .map_err(at(&job.id, Stage::Persist))?;
        tracing::info!(job_id = %job.id, "Prediction stored");

        let notified = match self.notifier.notify(&job.id).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, "Downstream notified");
                true
            }
            Err(e) => {
                metrics::counter!("worker_notify_failures_total").increment(1);
                tracing::warn!(
                    job_id = %job.id,
                    class = %e.class(),
                    error = %e,
                    "Notification failed, record already stored"
                );
                false
            }
        };

        Ok(JobOutcome::Recorded {
            labels: label_count,
            notified,
        })
    }
}

/// Last path segment of a blob key, if it is a usable file name.
pub fn local_file_name(image_path: &str) -> Option<&str> {
    image_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

/// Blob key for the annotated image. Falls back to a job-scoped name when the
/// plain key would overwrite the source object.
pub fn prediction_key(original_key: &str, file_name: &str, job_id: &str) -> String {
    let key = format!("{PREDICTIONS_PREFIX}{file_name}");
    if key == original_key {
        format!("{PREDICTIONS_PREFIX}{job_id}-{file_name}")
    } else {
        key
    }
}

async fn sniff_image(path: &Path) -> Result<image::ImageFormat, JobFailure> {
    let mut head = Vec::with_capacity(64);
    tokio::fs::File::open(path)
        .await?
        .take(64)
        .read_to_end(&mut head)
        .await?;
    image::guess_format(&head).map_err(|_| JobFailure::NotAnImage)
}
