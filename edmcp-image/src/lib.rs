//! EDMCP Image Server Library
//!
//! Bridges the MCP `generate_image` tool to an Easy Diffusion backend:
//! payload building, job submission, progress polling and result rendering.

pub mod content;
pub mod handler;
pub mod payload;
pub mod poll;
pub mod server;

pub use content::GenerationOutcome;
pub use handler::{GeneratedImage, GenerationClient, ImageGenerator, RenderResponse};
pub use payload::{GenerateImageArgs, GenerationInput, GenerationRequestBuilder, RenderRequest};
pub use poll::{PollConfig, PollLoop};
pub use server::ImageServer;
