//! Completion polling for asynchronous render jobs.
//!
//! After submission the backend hands out a stream URL. Each GET of that URL
//! returns newline-delimited JSON snapshots; the last parseable line is the
//! current state of the job. [`PollLoop`] fetches it until the job succeeds,
//! fails, or one of the attempt and wall-clock ceilings is hit.

use crate::handler::{GeneratedImage, OutputEntry};
use async_trait::async_trait;
use edmcp_common::error::Error;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Delay between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum number of poll attempts.
pub const POLL_MAX_ATTEMPTS: u32 = 300;

/// Wall-clock ceiling for one job.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Budgets for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: POLL_MAX_ATTEMPTS,
            timeout: POLL_TIMEOUT,
        }
    }
}

/// Job status as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendStatus {
    Pending,
    Succeeded,
    Failed,
    /// Anything else, including a missing, null or non-string status.
    /// Keeps the loop polling.
    #[default]
    Unknown,
}

impl BackendStatus {
    /// Classify the `status` field of a snapshot line.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("succeeded") => BackendStatus::Succeeded,
            Some("failed") => BackendStatus::Failed,
            Some("pending") => BackendStatus::Pending,
            _ => BackendStatus::Unknown,
        }
    }
}

/// One progress line from the stream.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub status: BackendStatus,
    pub detail: Option<Value>,
    pub output: Option<Value>,
    pub images: Option<Value>,
    pub step: Option<Value>,
    pub total_steps: Option<Value>,
}

fn take_field(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    map.remove(key).filter(|value| !value.is_null())
}

impl ProgressSnapshot {
    /// Parse the latest snapshot from a response body.
    ///
    /// Lines are tried from last to first; the first JSON object wins,
    /// whatever its fields hold. Returns `None` when no line is an object.
    pub fn parse_latest(body: &str) -> Option<Self> {
        body.lines()
            .rev()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .find_map(Self::from_line)
    }

    fn from_line(line: &str) -> Option<Self> {
        let Value::Object(mut map) = serde_json::from_str::<Value>(line).ok()? else {
            return None;
        };
        Some(Self {
            status: BackendStatus::from_value(map.get("status")),
            detail: take_field(&mut map, "detail"),
            output: take_field(&mut map, "output"),
            images: take_field(&mut map, "images"),
            step: take_field(&mut map, "step"),
            total_steps: take_field(&mut map, "total_steps"),
        })
    }

    /// Images of a succeeded snapshot: `output` first, then `images`.
    pub fn into_images(self) -> Vec<GeneratedImage> {
        let from_output = images_from_value(self.output);
        if !from_output.is_empty() {
            return from_output;
        }
        images_from_value(self.images)
    }

    /// Failure message of a failed snapshot.
    pub fn failure_detail(&self) -> String {
        match &self.detail {
            Some(Value::String(detail)) if !detail.is_empty() => detail.clone(),
            Some(Value::Null) | Some(Value::String(_)) | None => "Unknown error".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

fn images_from_value(value: Option<Value>) -> Vec<GeneratedImage> {
    let entries: Vec<OutputEntry> = match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Some(Value::String(data)) => vec![OutputEntry::Inline(data)],
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(OutputEntry::into_data)
        .map(GeneratedImage::png)
        .collect()
}

/// Where progress bodies come from.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// Fetch the current body of the progress stream.
    ///
    /// Failures should be [`Error::Transient`]; the loop retries them.
    async fn fetch(&self) -> Result<String, Error>;
}

/// HTTP progress stream of a submitted job.
pub struct StreamSource {
    http: reqwest::Client,
    url: String,
}

impl StreamSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProgressSource for StreamSource {
    async fn fetch(&self) -> Result<String, Error> {
        // Only the body is inspected, never the status code.
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::transient(format!("GET {} failed: {}", self.url, e)))?;

        debug!(status = response.status().as_u16(), "Stream responded");

        response
            .text()
            .await
            .map_err(|e| Error::transient(format!("Failed to read stream body: {}", e)))
    }
}

/// Mutable state of one poll loop. Dropped when the loop resolves.
#[derive(Debug)]
pub struct PollState {
    pub attempts: u32,
    pub started: Instant,
    pub status: BackendStatus,
    pub images: Vec<GeneratedImage>,
}

impl PollState {
    fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
            status: BackendStatus::Pending,
            images: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// The completion state machine.
pub struct PollLoop<S> {
    source: S,
    config: PollConfig,
}

impl<S: ProgressSource> PollLoop<S> {
    pub fn new(source: S, config: PollConfig) -> Self {
        Self { source, config }
    }

    /// Poll until the job resolves.
    ///
    /// # Returns
    /// - `Ok(images)` when the backend reports success (possibly no images)
    /// - `Err(Error::GenerationFailed)` when the backend reports failure
    /// - `Err(Error::TimedOut)` / `Err(Error::AttemptsExhausted)` when a
    ///   budget runs out
    pub async fn run(&self) -> Result<Vec<GeneratedImage>, Error> {
        let mut state = PollState::new();

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            timeout_secs = self.config.timeout.as_secs(),
            "Polling progress stream"
        );

        loop {
            state.attempts += 1;

            let elapsed = state.elapsed();
            if elapsed > self.config.timeout {
                warn!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    last_status = ?state.status,
                    "Generation timed out"
                );
                return Err(Error::TimedOut {
                    elapsed_secs: elapsed.as_secs_f64(),
                });
            }
            if state.attempts > self.config.max_attempts {
                warn!(
                    max_attempts = self.config.max_attempts,
                    last_status = ?state.status,
                    "Polling attempts exhausted"
                );
                return Err(Error::AttemptsExhausted(self.config.max_attempts));
            }

            debug!(
                attempt = state.attempts,
                elapsed_secs = elapsed.as_secs_f64(),
                "Poll attempt"
            );

            match self.poll_once(&mut state).await {
                Ok(true) => {
                    info!(
                        attempts = state.attempts,
                        count = state.images.len(),
                        "Generation succeeded"
                    );
                    return Ok(std::mem::take(&mut state.images));
                }
                Ok(false) => {}
                Err(e) if e.is_terminal() => {
                    warn!(
                        attempts = state.attempts,
                        last_status = ?state.status,
                        error = %e,
                        "Generation failed"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt = state.attempts, error = %e, "Transient poll failure");
                }
            }

            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// One fetch and classification. `Ok(true)` means succeeded.
    ///
    /// The fetch is bounded by what is left of the wall-clock ceiling.
    async fn poll_once(&self, state: &mut PollState) -> Result<bool, Error> {
        let remaining = self.config.timeout.saturating_sub(state.elapsed());
        let body = match tokio::time::timeout(remaining, self.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::TimedOut {
                    elapsed_secs: state.elapsed().as_secs_f64(),
                });
            }
        };

        if body.trim().is_empty() {
            debug!("Empty stream body, job not started yet");
            return Ok(false);
        }

        let snapshot = ProgressSnapshot::parse_latest(&body).ok_or_else(|| {
            Error::transient(format!(
                "No parseable line in {} byte stream body",
                body.len()
            ))
        })?;

        let status = snapshot.status;
        state.status = status;
        match status {
            BackendStatus::Succeeded => {
                state.images = snapshot.into_images();
                Ok(true)
            }
            BackendStatus::Failed => Err(Error::generation_failed(snapshot.failure_detail())),
            BackendStatus::Pending | BackendStatus::Unknown => {
                if let (Some(step), Some(total)) = (&snapshot.step, &snapshot.total_steps) {
                    debug!(step = %step, total_steps = %total, "Generation progress");
                }
                Ok(false)
            }
        }
    }
}
