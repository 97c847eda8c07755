use std::collections::BTreeMap;
use std::time::Duration;

use recall_core::{DeliveryJob, JobKind, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Base of both submit endpoints; paths are joined onto it.
    pub base_url: String,
    pub single_path: String,
    pub paired_path: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Status the store uses to signal rate limiting.
    pub rate_limit_status: u16,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765/api/memory/".to_string(),
            single_path: "submit-single".to_string(),
            paired_path: "submit-paired".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            rate_limit_status: 429,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("job carries no text")]
    EmptyJob,
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("rejected by store: {0}")]
    Rejected(String),
}

/// Classified result of one HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Stored { ids: Vec<String> },
    Duplicate,
    RateLimited,
    Failed(DeliveryError),
}

#[async_trait::async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome;
}

#[derive(Debug, Serialize)]
struct SingleRequest<'a> {
    text: &'a str,
    subject_id: &'a str,
    role: &'a str,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PairedRequest<'a> {
    user_text: &'a str,
    assistant_text: &'a str,
    subject_id: &'a str,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    success: bool,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    assistant_id: Option<Value>,
    #[serde(default)]
    duplicate: bool,
    #[serde(default)]
    message: Option<String>,
}

impl SubmitResponse {
    fn ids(&self) -> Vec<String> {
        [&self.id, &self.user_id, &self.assistant_id]
            .into_iter()
            .flatten()
            .filter_map(id_string)
            .collect()
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestDeliveryClient {
    settings: DeliverySettings,
    client: reqwest::Client,
    single_url: Url,
    paired_url: Url,
}

impl ReqwestDeliveryClient {
    pub fn new(settings: DeliverySettings) -> Result<Self, DeliveryError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|err| DeliveryError::InvalidUrl(err.to_string()))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|err| DeliveryError::InvalidUrl(err.to_string()))
        };
        let single_url = join(&settings.single_path)?;
        let paired_url = join(&settings.paired_path)?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| DeliveryError::Network(err.to_string()))?;

        Ok(Self {
            settings,
            client,
            single_url,
            paired_url,
        })
    }

    fn request_body(&self, job: &DeliveryJob) -> Result<(Url, Vec<u8>), DeliveryError> {
        let mut metadata = job.metadata.clone();
        let (url, encoded) = match job.kind {
            JobKind::Single => {
                let text = job.single_text().ok_or(DeliveryError::EmptyJob)?;
                metadata.insert("content_hash".to_string(), content_hash(&[text]));
                let role = job
                    .role
                    .unwrap_or(if job.user_text.is_some() {
                        Role::User
                    } else {
                        Role::Assistant
                    })
                    .as_str();
                let request = SingleRequest {
                    text,
                    subject_id: &job.subject_id,
                    role,
                    metadata,
                };
                (self.single_url.clone(), serde_json::to_vec(&request))
            }
            JobKind::Paired => {
                let (Some(user_text), Some(assistant_text)) =
                    (job.user_text.as_deref(), job.assistant_text.as_deref())
                else {
                    return Err(DeliveryError::EmptyJob);
                };
                metadata.insert(
                    "content_hash".to_string(),
                    content_hash(&[user_text, assistant_text]),
                );
                let request = PairedRequest {
                    user_text,
                    assistant_text,
                    subject_id: &job.subject_id,
                    metadata,
                };
                (self.paired_url.clone(), serde_json::to_vec(&request))
            }
        };
        let bytes = encoded.map_err(|err| DeliveryError::Encode(err.to_string()))?;
        Ok((url, bytes))
    }
}

#[async_trait::async_trait]
impl DeliveryClient for ReqwestDeliveryClient {
    async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome {
        let (url, body) = match self.request_body(job) {
            Ok(parts) => parts,
            Err(err) => return DeliveryOutcome::Failed(err),
        };

        let response = match self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return DeliveryOutcome::Failed(map_reqwest_error(err)),
        };

        let status = response.status();
        if status.as_u16() == self.settings.rate_limit_status {
            return DeliveryOutcome::RateLimited;
        }
        if !status.is_success() {
            return DeliveryOutcome::Failed(DeliveryError::HttpStatus(status.as_u16()));
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return DeliveryOutcome::Failed(map_reqwest_error(err)),
        };
        let parsed: SubmitResponse = match serde_json::from_slice(&bytes) {
            Ok(parsed) => parsed,
            Err(err) => {
                return DeliveryOutcome::Failed(DeliveryError::MalformedResponse(err.to_string()))
            }
        };

        if parsed.duplicate {
            return DeliveryOutcome::Duplicate;
        }
        if !parsed.success {
            let message = parsed
                .message
                .unwrap_or_else(|| "store reported failure".to_string());
            return DeliveryOutcome::Failed(DeliveryError::Rejected(message));
        }
        DeliveryOutcome::Stored { ids: parsed.ids() }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        return DeliveryError::Timeout;
    }
    DeliveryError::Network(err.to_string())
}

/// Short hex digest of the submitted texts, sent as a duplicate hint.
fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
