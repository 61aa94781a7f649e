//! In-memory stand-ins for every collaborator of the worker and the reporter.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use detect_worker::models::job::{ReceiptHandle, ReceivedMessage};
use detect_worker::models::prediction::PredictionRecord;
use detect_worker::services::{
    fleet::{FleetControlPlane, FleetError},
    inference::{InferenceEngine, InferenceError, InferenceOutput, InferenceRequest},
    labels::ClassNames,
    metric_sink::{MetricDatum, MetricSink, SinkError},
    notifier::{NotifyError, Notifier},
    queue::{JobSource, QueueError},
    results::{ResultStore, ResultStoreError},
    storage::{BlobStore, StorageError},
};
use detect_worker::worker::processor::JobProcessor;

/// Smallest byte prefix recognised as a PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

/// Ordered record of side effects across all fakes.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events().iter().position(|e| e.starts_with(prefix))
    }
}

pub fn message(id: &str, body: &str) -> ReceivedMessage {
    ReceivedMessage {
        message_id: id.to_string(),
        body: body.to_string(),
        receipt: ReceiptHandle(format!("{id}:r1")),
        receive_count: 1,
    }
}

pub fn job_body(photo_path: &str, chat_id: &str) -> String {
    serde_json::json!({ "photo_path": photo_path, "chat_id": chat_id }).to_string()
}

pub fn classes() -> ClassNames {
    ClassNames::new(
        ["person", "bicycle", "car", "motorcycle", "airplane"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
}

// --- queue ---------------------------------------------------------------

pub struct FakeQueue {
    messages: Mutex<VecDeque<ReceivedMessage>>,
    receive_errors: Mutex<VecDeque<QueueError>>,
    deleted: Mutex<Vec<ReceiptHandle>>,
    depth: Mutex<Result<u64, ()>>,
    delete_fails: Mutex<bool>,
    stop_when_drained: Option<CancellationToken>,
    log: EventLog,
}

impl FakeQueue {
    pub fn new(messages: Vec<ReceivedMessage>, log: EventLog) -> Self {
        Self {
            messages: Mutex::new(messages.into()),
            receive_errors: Mutex::new(VecDeque::new()),
            deleted: Mutex::new(Vec::new()),
            depth: Mutex::new(Ok(0)),
            delete_fails: Mutex::new(false),
            stop_when_drained: None,
            log,
        }
    }

    /// Cancel `token` once a receive finds the queue empty.
    pub fn stop_when_drained(mut self, token: CancellationToken) -> Self {
        self.stop_when_drained = Some(token);
        self
    }

    pub fn with_depth(self, depth: u64) -> Self {
        *self.depth.lock().unwrap() = Ok(depth);
        self
    }

    pub fn failing_depth(self) -> Self {
        *self.depth.lock().unwrap() = Err(());
        self
    }

    pub fn failing_deletes(self) -> Self {
        *self.delete_fails.lock().unwrap() = true;
        self
    }

    pub fn push_receive_error(&self, error: QueueError) {
        self.receive_errors.lock().unwrap().push_back(error);
    }

    pub fn deleted(&self) -> Vec<ReceiptHandle> {
        self.deleted.lock().unwrap().clone()
    }
}

pub fn transient_queue_error() -> QueueError {
    QueueError::StaleReceipt("x:y".to_string())
}

pub fn fatal_queue_error() -> QueueError {
    QueueError::Redis(redis::RedisError::from((
        redis::ErrorKind::AuthenticationFailed,
        "WRONGPASS",
    )))
}

#[async_trait]
impl JobSource for FakeQueue {
    async fn receive(&self, _wait: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        if let Some(error) = self.receive_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let next = self.messages.lock().unwrap().pop_front();
        match next {
            Some(message) => {
                self.log.push(format!("receive:{}", message.message_id));
                Ok(Some(message))
            }
            None => {
                if let Some(token) = &self.stop_when_drained {
                    token.cancel();
                }
                tokio::task::yield_now().await;
                Ok(None)
            }
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        if *self.delete_fails.lock().unwrap() {
            return Err(QueueError::StaleReceipt(receipt.0.clone()));
        }
        self.log.push(format!("delete:{}", receipt.0));
        self.deleted.lock().unwrap().push(receipt.clone());
        Ok(())
    }

    async fn approximate_depth(&self) -> Result<u64, QueueError> {
        match *self.depth.lock().unwrap() {
            Ok(depth) => Ok(depth),
            Err(()) => Err(transient_queue_error()),
        }
    }
}

// --- blob store ----------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    log: EventLog,
}

impl MemoryBlobStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            log,
        }
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let data = self.object(key).ok_or_else(|| StorageError::Status {
            key: key.to_string(),
            status: 404,
        })?;
        tokio::fs::write(dest, data).await?;
        self.log.push(format!("get:{key}"));
        Ok(())
    }

    async fn put(&self, key: &str, src: &Path) -> Result<(), StorageError> {
        let data = tokio::fs::read(src).await?;
        self.insert(key, &data);
        self.log.push(format!("put:{key}"));
        Ok(())
    }
}

// --- result store --------------------------------------------------------

#[derive(Default)]
pub struct MemoryResultStore {
    records: Mutex<HashMap<String, PredictionRecord>>,
    writes: Mutex<usize>,
    fail: Mutex<bool>,
    log: EventLog,
}

impl MemoryResultStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn failing(self) -> Self {
        *self.fail.lock().unwrap() = true;
        self
    }

    pub fn records(&self) -> HashMap<String, PredictionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, record: &PredictionRecord) -> Result<(), ResultStoreError> {
        if *self.fail.lock().unwrap() {
            return Err(ResultStoreError::Database(sqlx::Error::PoolTimedOut));
        }
        *self.writes.lock().unwrap() += 1;
        self.records
            .lock()
            .unwrap()
            .insert(record.prediction_id.clone(), record.clone());
        self.log.push(format!("store:{}", record.prediction_id));
        Ok(())
    }

    async fn get(&self, prediction_id: &str) -> Result<Option<PredictionRecord>, ResultStoreError> {
        Ok(self.records.lock().unwrap().get(prediction_id).cloned())
    }
}

// --- notifier ------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<String>>,
    fail: Mutex<bool>,
    log: EventLog,
}

impl RecordingNotifier {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn failing(self) -> Self {
        *self.fail.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, prediction_id: &str) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(prediction_id.to_string());
        if *self.fail.lock().unwrap() {
            return Err(NotifyError::Status(reqwest::StatusCode::BAD_GATEWAY));
        }
        self.log.push(format!("notify:{prediction_id}"));
        Ok(())
    }
}

// --- inference -----------------------------------------------------------

/// What the fake detector writes for a run.
#[derive(Clone)]
pub enum Detection {
    /// Annotated image plus a label file with these contents
    Labels(&'static str),
    /// Annotated image, no label file
    Nothing,
    /// Exit with this failure
    Fail(fn() -> InferenceError),
    /// Report success but leave a plain file where the run directory belongs
    UnreadableOutput,
}

pub struct ScriptedEngine {
    detection: Detection,
    requests: Mutex<Vec<InferenceRequest>>,
    /// Per-call run time, consumed in call order
    delays: Mutex<VecDeque<Duration>>,
    cancel_on_detect: Option<CancellationToken>,
    log: EventLog,
}

impl ScriptedEngine {
    pub fn new(detection: Detection, log: EventLog) -> Self {
        Self {
            detection,
            requests: Mutex::new(Vec::new()),
            delays: Mutex::new(VecDeque::new()),
            cancel_on_detect: None,
            log,
        }
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn detect(&self, request: &InferenceRequest) -> Result<InferenceOutput, InferenceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.log.push(format!("detect:{}", request.name));
        if let Some(token) = &self.cancel_on_detect {
            token.cancel();
        }
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let output = InferenceOutput {
            run_dir: request.project.join(&request.name),
        };
        let file_name = request
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match &self.detection {
            Detection::Fail(make) => return Err(make()),
            Detection::UnreadableOutput => {
                tokio::fs::create_dir_all(&request.project).await.unwrap();
                tokio::fs::write(&output.run_dir, b"not a directory").await.unwrap();
                return Ok(output);
            }
            Detection::Nothing => {}
            Detection::Labels(contents) => {
                let label_file = output.label_file(&file_name);
                tokio::fs::create_dir_all(label_file.parent().unwrap()).await.unwrap();
                tokio::fs::write(&label_file, contents).await.unwrap();
            }
        }

        tokio::fs::create_dir_all(&output.run_dir).await.unwrap();
        let source = tokio::fs::read(&request.source).await.unwrap();
        let mut annotated = source.clone();
        annotated.extend_from_slice(b"boxes");
        tokio::fs::write(output.annotated_image(&file_name), annotated)
            .await
            .unwrap();
        Ok(output)
    }
}

// --- fleet and metrics ---------------------------------------------------

pub struct FakeFleet {
    capacities: HashMap<String, u64>,
    fail: bool,
}

impl FakeFleet {
    pub fn with(fleet_id: &str, desired_capacity: u64) -> Self {
        Self {
            capacities: HashMap::from([(fleet_id.to_string(), desired_capacity)]),
            fail: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            capacities: HashMap::new(),
            fail: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            capacities: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl FleetControlPlane for FakeFleet {
    async fn desired_capacity(&self, fleet_id: &str) -> Result<Option<u64>, FleetError> {
        if self.fail {
            return Err(FleetError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(self.capacities.get(fleet_id).copied())
    }
}

#[derive(Default)]
pub struct CapturingSink {
    data: Mutex<Vec<MetricDatum>>,
}

impl CapturingSink {
    pub fn data(&self) -> Vec<MetricDatum> {
        self.data.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricSink for CapturingSink {
    async fn emit(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        self.data.lock().unwrap().push(datum.clone());
        Ok(())
    }
}

// --- wiring --------------------------------------------------------------

/// A processor wired to fakes, with handles to inspect them.
pub struct Harness {
    pub log: EventLog,
    pub blobs: Arc<MemoryBlobStore>,
    pub results: Arc<MemoryResultStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<ScriptedEngine>,
    pub work_root: tempfile::TempDir,
    pub processor: Arc<JobProcessor>,
}

pub struct HarnessBuilder {
    detection: Detection,
    failing_store: bool,
    failing_notifier: bool,
    detect_delays: Vec<Duration>,
    cancel_on_detect: Option<CancellationToken>,
}

impl HarnessBuilder {
    pub fn new(detection: Detection) -> Self {
        Self {
            detection,
            failing_store: false,
            failing_notifier: false,
            detect_delays: Vec::new(),
            cancel_on_detect: None,
        }
    }

    /// Successive detector calls take these durations.
    pub fn detect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.detect_delays = delays;
        self
    }

    /// Cancel `token` as soon as the detector starts.
    pub fn cancel_on_detect(mut self, token: CancellationToken) -> Self {
        self.cancel_on_detect = Some(token);
        self
    }

    pub fn failing_store(mut self) -> Self {
        self.failing_store = true;
        self
    }

    pub fn failing_notifier(mut self) -> Self {
        self.failing_notifier = true;
        self
    }

    pub fn build(self) -> Harness {
        let log = EventLog::default();
        let blobs = Arc::new(MemoryBlobStore::new(log.clone()));
        let mut results = MemoryResultStore::new(log.clone());
        if self.failing_store {
            results = results.failing();
        }
        let results = Arc::new(results);
        let mut notifier = RecordingNotifier::new(log.clone());
        if self.failing_notifier {
            notifier = notifier.failing();
        }
        let notifier = Arc::new(notifier);
        let mut engine = ScriptedEngine::new(self.detection, log.clone());
        engine.delays = Mutex::new(self.detect_delays.into());
        engine.cancel_on_detect = self.cancel_on_detect;
        let engine = Arc::new(engine);
        let work_root = tempfile::tempdir().unwrap();

        let processor = Arc::new(JobProcessor::new(
            blobs.clone(),
            results.clone(),
            notifier.clone(),
            engine.clone(),
            Arc::new(classes()),
            work_root.path(),
        ));

        Harness {
            log,
            blobs,
            results,
            notifier,
            engine,
            work_root,
            processor,
        }
    }
}

impl Harness {
    /// Entries left under the work root; empty once every job cleaned up.
    pub fn leftover_workdirs(&self) -> Vec<String> {
        std::fs::read_dir(self.work_root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}
