//! EDMCP Image Server
//!
//! MCP server for image generation using an Easy Diffusion backend.

use anyhow::Result;
use clap::Parser;
use edmcp_common::{Config, McpServerBuilder, TransportArgs};
use edmcp_image::ImageServer;
use std::sync::Arc;

/// Command-line arguments for the image server.
#[derive(Parser, Debug)]
#[command(name = "edmcp-image")]
#[command(about = "MCP server for image generation using Easy Diffusion")]
struct Args {
    /// Transport configuration
    #[command(flatten)]
    transport: TransportArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    edmcp_common::tracing::init_tracing();

    tracing::info!("edmcp-image server starting...");

    let args = Args::parse();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        backend_url = %config.backend_url,
        default_model = %config.default_model,
        request_timeout_secs = config.request_timeout_secs,
        port = config.port,
        "Configuration loaded"
    );

    let server = ImageServer::from_config(Arc::clone(&config))?;

    let transport = args.transport.into_transport();
    McpServerBuilder::new(server)
        .with_transport(transport)
        .run()
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
