//! In-memory fakes and builders for processor tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use photo_verify::models::file::CollectionFileInstance;
use photo_verify::models::item::{DescriptionRule, ItemInstance, LabelRule, RuleEffect};
use photo_verify::models::job::{AssessmentStatus, VerificationJob};
use photo_verify::models::verdict::{ItemVerdict, ModelUsage, VerdictOutcome};
use photo_verify::services::augment::Augmenter;
use photo_verify::services::detector::{DetectedLabel, DetectorError, LabelDetector};
use photo_verify::services::joblog::{JobLog, LogLevel};
use photo_verify::services::prefilter::PreFilter;
use photo_verify::services::processor::JobProcessor;
use photo_verify::services::settings::{RunSettings, Settings};
use photo_verify::services::storage::{BlobStore, StorageError};
use photo_verify::services::store::{JobStore, StoreError};
use photo_verify::services::vision::{VisionModel, VisionRequest};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Job store over a HashMap. Records the status of every save so tests can
/// assert the Assessing-then-terminal write sequence.
#[derive(Default)]
pub struct MemStore {
    jobs: Mutex<HashMap<Uuid, VerificationJob>>,
    pub saved_statuses: Mutex<Vec<AssessmentStatus>>,
}

impl MemStore {
    pub fn with_job(job: VerificationJob) -> Arc<Self> {
        let store = Self::default();
        store.jobs.lock().unwrap().insert(job.id, job);
        Arc::new(store)
    }

    pub fn job(&self, job_id: Uuid) -> VerificationJob {
        self.jobs.lock().unwrap().get(&job_id).unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<AssessmentStatus> {
        self.saved_statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for MemStore {
    async fn load(&self, job_id: Uuid) -> Result<VerificationJob, StoreError> {
        self.jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn save(&self, job: &VerificationJob) -> Result<(), StoreError> {
        self.saved_statuses.lock().unwrap().push(job.status);
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }
}

/// Blob store over a HashMap; a missing key reads as None, like a 404.
#[derive(Default)]
pub struct MemBlobs {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemBlobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl BlobStore for MemBlobs {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

/// Detector that answers from a bytes-to-labels map and counts calls.
/// Unmapped images detect nothing.
#[derive(Default)]
pub struct StubDetector {
    labels: Mutex<HashMap<Vec<u8>, Vec<DetectedLabel>>>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn map(&self, bytes: &[u8], labels: Vec<DetectedLabel>) {
        self.labels.lock().unwrap().insert(bytes.to_vec(), labels);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabelDetector for StubDetector {
    async fn detect(
        &self,
        image: &[u8],
        _resize: bool,
    ) -> Result<Vec<DetectedLabel>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .labels
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_default())
    }
}

/// Vision model that replays scripted outcomes and records every request.
pub struct ScriptedModel {
    queued: Mutex<VecDeque<VerdictOutcome>>,
    fallback: Option<VerdictOutcome>,
    pub requests: Mutex<Vec<VisionRequest>>,
}

impl ScriptedModel {
    /// Same outcome for every call.
    pub fn always(outcome: VerdictOutcome) -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Some(outcome),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Outcomes consumed in order; an exhausted script yields empty outcomes.
    pub fn sequence(outcomes: Vec<VerdictOutcome>) -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(outcomes.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, idx: usize) -> VisionRequest {
        self.requests.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn verify(&self, request: VisionRequest) -> VerdictOutcome {
        self.requests.lock().unwrap().push(request);
        if let Some(next) = self.queued.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback.clone().unwrap_or_default()
    }
}

/// Log sink that keeps every line in memory.
#[derive(Default)]
pub struct MemLog {
    pub entries: Mutex<Vec<(Uuid, LogLevel, String)>>,
}

impl MemLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|(_, _, message)| message.contains(needle))
    }

    pub fn contains_level(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|(_, l, message)| *l == level && message.contains(needle))
    }
}

#[async_trait]
impl JobLog for MemLog {
    async fn log(&self, job_id: Uuid, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((job_id, level, message.to_string()));
    }
}

/// Settings source with a fixed answer.
pub struct FixedSettings(pub RunSettings);

#[async_trait]
impl Settings for FixedSettings {
    async fn load(&self) -> Result<RunSettings, sqlx::Error> {
        Ok(self.0.clone())
    }
}

/// Augmenter that hands the text back untouched.
pub struct EchoAugmenter;

#[async_trait]
impl Augmenter for EchoAugmenter {
    async fn augment(&self, text: &str, _agent_ids: &[Uuid], _allow_internet: bool) -> String {
        text.to_string()
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────

/// A small solid-color PNG; different shades give different bytes.
pub fn png_bytes(shade: u8) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        64,
        64,
        image::Rgb([shade, shade, shade]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn make_file(key: &str, content_type: &str) -> CollectionFileInstance {
    CollectionFileInstance {
        id: Uuid::new_v4(),
        storage_key: key.to_string(),
        filename: key.rsplit('/').next().unwrap_or(key).to_string(),
        content_type: content_type.to_string(),
        size: None,
        description: None,
        file_checks: vec![],
        created_at: Utc::now(),
    }
}

pub fn make_item(mandatory: bool, cluster: Option<i64>) -> ItemInstance {
    ItemInstance {
        id: Uuid::new_v4(),
        item_id: Uuid::new_v4(),
        name: "storefront sign".to_string(),
        description: "the shop sign above the entrance".to_string(),
        label_rules: vec![],
        description_rules: vec![DescriptionRule {
            id: Uuid::new_v4(),
            description: "sign is clearly legible".to_string(),
            min_confidence: None,
            mandatory,
        }],
        status: AssessmentStatus::Pending,
        confidence: None,
        assessment_reasoning: None,
        approved_files: vec![],
        cluster_number: cluster,
        agent_ids: vec![],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn forbid_rule(labels: &[&str]) -> LabelRule {
    LabelRule {
        id: Uuid::new_v4(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
        effect: RuleEffect::Forbid,
        min_confidence: None,
        min_area_percent: None,
    }
}

pub fn make_job(items: Vec<ItemInstance>, files: Vec<CollectionFileInstance>) -> VerificationJob {
    VerificationJob {
        id: Uuid::new_v4(),
        collection_id: Uuid::new_v4(),
        status: AssessmentStatus::Pending,
        items,
        files,
        confidence: None,
        cost: None,
        error_message: None,
        search_internet: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn verdict_for(
    item: &ItemInstance,
    positions: &[&str],
    confidence: Option<f64>,
) -> ItemVerdict {
    ItemVerdict {
        item_id: item.id.to_string(),
        file_ids: positions.iter().map(|p| p.to_string()).collect(),
        image_found: true,
        reasoning: "matches the item description".to_string(),
        confidence,
        location: None,
    }
}

pub fn outcome(verdicts: Vec<ItemVerdict>, input_tokens: u64, output_tokens: u64) -> VerdictOutcome {
    VerdictOutcome {
        verdicts,
        usage: ModelUsage {
            input_tokens,
            output_tokens,
        },
    }
}

/// Wire the fakes into a processor.
pub fn build_processor(
    store: Arc<MemStore>,
    blobs: Arc<MemBlobs>,
    detector: Arc<StubDetector>,
    model: Arc<ScriptedModel>,
    settings: RunSettings,
    log: Arc<MemLog>,
) -> JobProcessor {
    let prefilter = PreFilter::new(blobs.clone(), detector, log.clone());
    JobProcessor::new(
        store,
        prefilter,
        blobs,
        model,
        Arc::new(EchoAugmenter),
        Arc::new(FixedSettings(settings)),
        log,
    )
}
