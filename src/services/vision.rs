//! Vision model gateway client.
//!
//! One pass sends every composite in a single request. Transient failures
//! (throttling, timeouts, unparseable model output) are retried on a fixed
//! delay; anything else, or running out of retries, yields an empty outcome
//! so the caller treats every item as unmatched instead of failing the job.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::file::CollectionFileInstance;
use crate::models::item::ItemInstance;
use crate::models::verdict::{ModelUsage, VerdictOutcome, VerdictSet};
use crate::services::decision::SecondPass;
use crate::services::settings::SECOND_PASS_PROMPT;
use crate::services::storage::BlobStore;
use crate::services::tiling;

/// Most composites one request may carry.
pub const MAX_IMAGES_PER_MESSAGE: usize = 20;
/// How many transient failures are absorbed before giving up on a pass.
const MAX_RETRIES: u32 = 240;
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Leased credentials are refreshed once they reach this age.
const CREDENTIAL_STALENESS: Duration = Duration::from_secs(3000);

const MODEL_TEMPERATURE: f64 = 0.1;
const MODEL_MAX_TOKENS: u32 = 8000;

/// One pass against the vision model.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model_id: String,
    pub system: String,
    pub user_text: String,
    pub composites: Vec<Vec<u8>>,
}

/// Vision model backend. `verify` never fails: transient trouble is retried
/// internally and terminal trouble comes back as an empty outcome with zero
/// usage.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn verify(&self, request: VisionRequest) -> VerdictOutcome;
}

// ── Failure classification ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Fatal,
}

/// Classify a failed gateway response. Throttling shows up either as a 429
/// or as provider-specific wording in the body.
fn classify_failure(status: Option<StatusCode>, detail: &str) -> RetryClass {
    if status == Some(StatusCode::TOO_MANY_REQUESTS) {
        return RetryClass::Retryable;
    }
    let lowered = detail.to_lowercase();
    const TRANSIENT_MARKERS: [&str; 4] = [
        "throttl",
        "rate exceeded",
        "too many requests",
        "toomanyrequests",
    ];
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return RetryClass::Retryable;
    }
    RetryClass::Fatal
}

fn classify_transport(e: &reqwest::Error) -> RetryClass {
    if e.is_timeout() || e.is_connect() {
        return RetryClass::Retryable;
    }
    classify_failure(e.status(), &e.to_string())
}

struct CallFailure {
    class: RetryClass,
    detail: String,
    /// Tokens the failed attempt still consumed (e.g. a response whose
    /// verdict JSON would not parse).
    usage: ModelUsage,
}

// ── Credential leasing ───────────────────────────────────────────────────────

struct Lease {
    token: String,
    acquired_at: Instant,
}

fn lease_is_stale(age: Duration) -> bool {
    age >= CREDENTIAL_STALENESS
}

/// Bearer token source for the gateway. With no token exchange endpoint
/// configured the static token is used as-is; otherwise short-lived tokens
/// are leased and refreshed once stale.
pub struct CredentialCache {
    static_token: String,
    token_url: Option<String>,
    http: Client,
    lease: tokio::sync::Mutex<Option<Lease>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

impl CredentialCache {
    pub fn new(static_token: String, token_url: Option<String>) -> Self {
        Self {
            static_token,
            token_url,
            http: Client::new(),
            lease: tokio::sync::Mutex::new(None),
        }
    }

    async fn bearer(&self) -> Result<String, reqwest::Error> {
        let Some(token_url) = &self.token_url else {
            return Ok(self.static_token.clone());
        };

        let mut lease = self.lease.lock().await;
        if let Some(current) = lease.as_ref() {
            if !lease_is_stale(current.acquired_at.elapsed()) {
                return Ok(current.token.clone());
            }
        }

        let response = self
            .http
            .post(token_url)
            .bearer_auth(&self.static_token)
            .send()
            .await?
            .error_for_status()?;
        let fresh: TokenResponse = response.json().await?;
        let token = fresh.token.clone();
        *lease = Some(Lease {
            token: fresh.token,
            acquired_at: Instant::now(),
        });
        Ok(token)
    }
}

// ── Gateway client ───────────────────────────────────────────────────────────

/// Client for the HTTP vision model gateway.
pub struct VisionClient {
    http: Client,
    base_url: String,
    credentials: CredentialCache,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    output: String,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl VisionClient {
    pub fn new(base_url: String, credentials: CredentialCache) -> Self {
        Self {
            http: Client::new(),
            base_url,
            credentials,
        }
    }

    async fn attempt(&self, request: &VisionRequest) -> Result<(VerdictSet, ModelUsage), CallFailure> {
        let bearer = self.credentials.bearer().await.map_err(|e| CallFailure {
            class: classify_transport(&e),
            detail: format!("credential refresh failed: {e}"),
            usage: ModelUsage::default(),
        })?;

        let mut content = vec![serde_json::json!({
            "type": "text",
            "text": request.user_text,
        })];
        for composite in &request.composites {
            content.push(serde_json::json!({
                "type": "image",
                "media_type": "image/jpeg",
                "data": base64::engine::general_purpose::STANDARD.encode(composite),
            }));
        }

        let body = serde_json::json!({
            "model": request.model_id,
            "system": request.system,
            "temperature": MODEL_TEMPERATURE,
            "max_tokens": MODEL_MAX_TOKENS,
            "response_format": "json",
            "messages": [{ "role": "user", "content": content }],
        });

        let url = format!("{}/v1/analyze", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallFailure {
                class: classify_transport(&e),
                detail: e.to_string(),
                usage: ModelUsage::default(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CallFailure {
                class: classify_failure(Some(status), &detail),
                detail: format!("gateway returned {status}: {detail}"),
                usage: ModelUsage::default(),
            });
        }

        let envelope: AnalyzeResponse = response.json().await.map_err(|e| CallFailure {
            class: RetryClass::Retryable,
            detail: format!("could not parse gateway envelope: {e}"),
            usage: ModelUsage::default(),
        })?;
        let usage = envelope
            .usage
            .map(|u| ModelUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        match serde_json::from_str::<VerdictSet>(strip_fences(&envelope.output)) {
            Ok(mut set) => {
                clamp_confidences(&mut set);
                Ok((set, usage))
            }
            Err(e) => Err(CallFailure {
                class: RetryClass::Retryable,
                detail: format!("could not parse model verdicts: {e}"),
                usage,
            }),
        }
    }
}

#[async_trait]
impl VisionModel for VisionClient {
    async fn verify(&self, request: VisionRequest) -> VerdictOutcome {
        let mut usage = ModelUsage::default();
        let mut retries = 0u32;

        loop {
            match self.attempt(&request).await {
                Ok((set, attempt_usage)) => {
                    usage += attempt_usage;
                    return VerdictOutcome {
                        verdicts: set.items,
                        usage,
                    };
                }
                Err(failure) => {
                    usage += failure.usage;
                    match failure.class {
                        RetryClass::Fatal => {
                            tracing::error!(detail = %failure.detail, "vision model call failed");
                            return VerdictOutcome::default();
                        }
                        RetryClass::Retryable => {
                            retries += 1;
                            if retries > MAX_RETRIES {
                                tracing::error!(
                                    detail = %failure.detail,
                                    "vision model retries exhausted"
                                );
                                return VerdictOutcome::default();
                            }
                            tracing::debug!(
                                retries,
                                detail = %failure.detail,
                                "retrying vision model call"
                            );
                            tokio::time::sleep(RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
    }
}

/// Strip a leading/trailing markdown code fence, which some models wrap
/// their JSON in despite the response format instruction.
fn strip_fences(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Confidence outside [0, 1] is a model artifact; pin it to the range.
fn clamp_confidences(set: &mut VerdictSet) {
    for verdict in &mut set.items {
        verdict.confidence = verdict.confidence.map(|c| c.clamp(0.0, 1.0));
    }
}

// ── Pricing ──────────────────────────────────────────────────────────────────

/// Per-1000-token (input, output) rates for a model id, matched by
/// substring. Unknown models fall back to the default rate.
pub fn model_rates(model_id: &str) -> (f64, f64) {
    const RATES: [(&str, (f64, f64)); 6] = [
        ("claude-3-5-sonnet", (0.003, 0.015)),
        ("claude-3-7-sonnet", (0.003, 0.015)),
        ("claude-3-5-haiku", (0.0008, 0.004)),
        ("amazon.nova-micro", (0.000037, 0.00000925)),
        ("amazon.nova-lite", (0.000063, 0.00001575)),
        ("amazon.nova-pro", (0.00084, 0.00021)),
    ];
    for (needle, rates) in RATES {
        if model_id.contains(needle) {
            return rates;
        }
    }
    (0.003, 0.015)
}

/// Dollar cost of the given usage under a model's rates.
pub fn usage_cost(model_id: &str, usage: &ModelUsage) -> f64 {
    let (input_rate, output_rate) = model_rates(model_id);
    (usage.input_tokens as f64 / 1000.0) * input_rate
        + (usage.output_tokens as f64 / 1000.0) * output_rate
}

// ── Second pass ──────────────────────────────────────────────────────────────

/// Confirms a provisionally approved item by re-running only its approved
/// photos through the model under the confirmation prompt.
pub struct SecondPassVerifier {
    blobs: Arc<dyn BlobStore>,
    model: Arc<dyn VisionModel>,
    model_id: String,
}

impl SecondPassVerifier {
    pub fn new(blobs: Arc<dyn BlobStore>, model: Arc<dyn VisionModel>, model_id: String) -> Self {
        Self {
            blobs,
            model,
            model_id,
        }
    }
}

#[async_trait]
impl SecondPass for SecondPassVerifier {
    async fn confirm(
        &self,
        item: &ItemInstance,
        approved: &[CollectionFileInstance],
    ) -> VerdictOutcome {
        let mut sources = Vec::new();
        for file in approved {
            match self.blobs.fetch(&file.storage_key).await {
                Ok(Some(bytes)) => sources.push((file.id, bytes)),
                Ok(None) => {
                    tracing::warn!(key = %file.storage_key, "approved file missing from storage")
                }
                Err(e) => {
                    tracing::warn!(key = %file.storage_key, error = %e, "could not fetch approved file")
                }
            }
        }

        let batch = match tiling::compose_grids(&sources, MAX_IMAGES_PER_MESSAGE) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "could not build confirmation composites");
                return VerdictOutcome::default();
            }
        };
        if batch.composites.is_empty() {
            return VerdictOutcome::default();
        }

        let rule_text = item
            .description_rules
            .iter()
            .map(|r| r.description.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let item_info = format!("Item ID: {}, Item Description: {}", item.id, rule_text);

        let request = VisionRequest {
            model_id: self.model_id.clone(),
            system: SECOND_PASS_PROMPT.to_string(),
            user_text: format!("Here is the item information: {item_info}"),
            composites: batch.composites,
        };
        self.model.verify(request).await
    }
}
