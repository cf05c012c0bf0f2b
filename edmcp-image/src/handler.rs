//! Easy Diffusion generation client.
//!
//! This module provides the `GenerationClient`, which submits render jobs to
//! the backend and resolves each of its response shapes into images, polling
//! the progress stream when the job runs asynchronously.

use crate::payload::{GenerationInput, GenerationRequestBuilder, RenderRequest};
use crate::poll::{PollConfig, PollLoop, StreamSource};
use async_trait::async_trait;
use edmcp_common::config::Config;
use edmcp_common::error::{ConfigError, Error};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// MIME type of every image the backend returns.
pub const IMAGE_MIME_TYPE: &str = "image/png";

/// Longest response excerpt quoted in protocol mismatch errors.
const RESPONSE_EXCERPT_LEN: usize = 200;

/// Generated image data.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Base64 image data, possibly carrying a `data:` URL prefix
    pub data: String,
    /// MIME type of the image
    pub mime_type: String,
}

impl GeneratedImage {
    /// A PNG image from backend data.
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: IMAGE_MIME_TYPE.to_string(),
        }
    }

    /// The raw base64 payload, with any `data:<mime>;base64,` prefix removed.
    pub fn payload(&self) -> &str {
        if self.data.starts_with("data:") {
            match self.data.split_once(',') {
                Some((_, payload)) => payload,
                None => &self.data,
            }
        } else {
            &self.data
        }
    }
}

/// One entry of an `output` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutputEntry {
    /// A bare base64 string.
    Inline(String),
    /// An object carrying the base64 string under `data`.
    Object { data: String },
    /// Anything else. Skipped.
    Unrecognized(Value),
}

impl OutputEntry {
    pub fn into_data(self) -> Option<String> {
        match self {
            OutputEntry::Inline(data) | OutputEntry::Object { data } => Some(data),
            OutputEntry::Unrecognized(_) => None,
        }
    }
}

/// Response of `POST /render`. Variants are tried in declaration order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RenderResponse {
    /// The job completed synchronously.
    Images { images: Vec<String> },
    /// The job runs asynchronously; progress is at `stream`.
    Stream { stream: String },
    /// The job completed synchronously with structured entries.
    Output { output: Vec<OutputEntry> },
}

impl RenderResponse {
    /// Short name of the shape, for logging.
    pub fn shape(&self) -> &'static str {
        match self {
            RenderResponse::Images { .. } => "images",
            RenderResponse::Stream { .. } => "stream",
            RenderResponse::Output { .. } => "output",
        }
    }
}

/// Anything that can turn a generation input into images.
///
/// The dispatcher depends on this trait so it can run against a fake.
#[async_trait]
pub trait ImageGenerator: Send + Sync + 'static {
    async fn generate(&self, input: GenerationInput) -> Result<Vec<GeneratedImage>, Error>;
}

/// HTTP client for the Easy Diffusion backend.
pub struct GenerationClient {
    config: Arc<Config>,
    http: reqwest::Client,
    poll: PollConfig,
}

impl GenerationClient {
    /// Create a client whose requests time out after
    /// `config.request_timeout_secs`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the HTTP client cannot be built.
    pub fn new(config: Arc<Config>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::invalid_value("BACKEND_TIMEOUT_SECS", e.to_string()))?;

        Ok(Self {
            config,
            http,
            poll: PollConfig::default(),
        })
    }

    /// Override the poll budgets.
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Submit a render job and classify the response shape.
    ///
    /// # Errors
    /// - `Error::Backend` on transport failure (status 0) or non-success HTTP
    /// - `Error::ProtocolMismatch` when the body matches no known shape
    pub async fn submit(&self, request: &RenderRequest) -> Result<RenderResponse, Error> {
        let endpoint = self.config.render_endpoint();
        debug!(endpoint = %endpoint, session_id = %request.session_id, "Submitting render job");

        let response = self
            .http
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::backend(&endpoint, 0, format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::backend(&endpoint, status.as_u16(), format!("Failed to read response: {}", e))
        })?;

        if !status.is_success() {
            return Err(Error::backend(&endpoint, status.as_u16(), body));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            Error::backend(&endpoint, status.as_u16(), format!("Failed to parse response: {}", e))
        })?;

        serde_json::from_value::<RenderResponse>(value).map_err(|_| {
            Error::protocol_mismatch(format!(
                "expected one of images, stream or output in {}",
                excerpt(&body)
            ))
        })
    }

    /// Turn a submission response into images, polling if needed.
    pub async fn resolve(&self, response: RenderResponse) -> Result<Vec<GeneratedImage>, Error> {
        debug!(shape = response.shape(), "Backend accepted render job");

        match response {
            RenderResponse::Images { images } => {
                Ok(images.into_iter().map(GeneratedImage::png).collect())
            }
            RenderResponse::Output { output } => Ok(output
                .into_iter()
                .filter_map(OutputEntry::into_data)
                .map(GeneratedImage::png)
                .collect()),
            RenderResponse::Stream { stream } => {
                let url = self.config.resolve_stream_url(&stream);
                info!(stream_url = %url, "Job is asynchronous, polling stream");
                PollLoop::new(StreamSource::new(self.http.clone(), url), self.poll)
                    .run()
                    .await
            }
        }
    }
}

#[async_trait]
impl ImageGenerator for GenerationClient {
    #[instrument(
        level = "info",
        name = "generate_image",
        skip(self, input),
        fields(model = %input.model, width = input.width, height = input.height)
    )]
    async fn generate(&self, input: GenerationInput) -> Result<Vec<GeneratedImage>, Error> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let request = GenerationRequestBuilder::build(&input, session_id);

        info!(
            backend_model = %request.use_stable_diffusion_model,
            steps = request.num_inference_steps,
            guidance_scale = request.guidance_scale,
            "Generating image with Easy Diffusion"
        );

        let response = self.submit(&request).await?;
        let images = self.resolve(response).await?;

        info!(count = images.len(), "Received images from backend");
        Ok(images)
    }
}

fn excerpt(body: &str) -> String {
    if body.chars().count() > RESPONSE_EXCERPT_LEN {
        let head: String = body.chars().take(RESPONSE_EXCERPT_LEN).collect();
        format!("{}...", head)
    } else {
        body.to_string()
    }
}
