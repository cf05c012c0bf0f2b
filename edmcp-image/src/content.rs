//! Rendering of generation outcomes as tool results.

use crate::handler::GeneratedImage;
use edmcp_common::error::Error;
use rmcp::model::{CallToolResult, Content};

/// How a generation ended, as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// At least one image.
    Images(Vec<GeneratedImage>),
    /// The backend succeeded without producing images.
    Empty,
    /// Generation failed with this message.
    Failed(String),
}

impl From<Result<Vec<GeneratedImage>, Error>> for GenerationOutcome {
    fn from(result: Result<Vec<GeneratedImage>, Error>) -> Self {
        match result {
            Ok(images) if images.is_empty() => GenerationOutcome::Empty,
            Ok(images) => GenerationOutcome::Images(images),
            Err(Error::GenerationFailed(detail)) => GenerationOutcome::Failed(detail),
            Err(e) => GenerationOutcome::Failed(e.to_string()),
        }
    }
}

impl GenerationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, GenerationOutcome::Failed(_))
    }

    /// Render as a tool result with exactly one content block.
    ///
    /// Only the first image is returned. Failures become an error-flagged
    /// result, never a protocol error.
    pub fn into_tool_result(self) -> CallToolResult {
        match self {
            GenerationOutcome::Images(images) => match images.first() {
                Some(image) => CallToolResult::success(vec![Content::image(
                    image.payload().to_string(),
                    image.mime_type.clone(),
                )]),
                None => CallToolResult::success(vec![Content::text("No images generated")]),
            },
            GenerationOutcome::Empty => {
                CallToolResult::success(vec![Content::text("No images generated")])
            }
            GenerationOutcome::Failed(message) => CallToolResult::error(vec![Content::text(
                format!("Image generation failed: {}", message),
            )]),
        }
    }
}
