//! How the server talks to its client.
//!
//! Stdio is the default and suits an MCP host that spawns the server as a
//! subprocess. HTTP serves JSON-RPC on `POST /mcp` and keeps a WebSocket
//! endpoint at `/mcp/ws` for clients that want a long-lived connection.
//!
//! Binaries flatten [`TransportArgs`] into their own clap parser:
//!
//! ```ignore
//! #[derive(clap::Parser)]
//! struct Args {
//!     #[command(flatten)]
//!     transport: TransportArgs,
//! }
//!
//! let transport = Args::parse().transport.into_transport();
//! ```

use clap::Args;
use std::fmt;
use std::str::FromStr;

/// Listening side of the server, resolved from [`TransportArgs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// One JSON-RPC message per line on stdin, replies on stdout.
    #[default]
    Stdio,
    /// axum router bound to `0.0.0.0:{port}`.
    Http { port: u16 },
}

impl Transport {
    /// Bound port, `None` for stdio.
    pub fn port(&self) -> Option<u16> {
        match self {
            Transport::Stdio => None,
            Transport::Http { port } => Some(*port),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio => write!(f, "stdio"),
            Transport::Http { port } => write!(f, "http (port {})", port),
        }
    }
}

/// Value of `--transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Stdio,
    Http,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("stdio") {
            Ok(TransportMode::Stdio)
        } else if s.eq_ignore_ascii_case("http") {
            Ok(TransportMode::Http)
        } else {
            Err(format!("unknown transport '{}', expected stdio or http", s))
        }
    }
}

/// `--transport` and `--port` flags shared by every server binary.
#[derive(Args, Debug, Clone)]
pub struct TransportArgs {
    /// stdio or http
    #[arg(long, default_value = "stdio", value_parser = TransportMode::from_str)]
    pub transport: TransportMode,

    /// Listening port when `--transport http`
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,
}

impl TransportArgs {
    /// The port only matters for HTTP; stdio ignores it.
    pub fn into_transport(self) -> Transport {
        match self.transport {
            TransportMode::Stdio => Transport::Stdio,
            TransportMode::Http => Transport::Http { port: self.port },
        }
    }
}

impl Default for TransportArgs {
    fn default() -> Self {
        Self {
            transport: TransportMode::Stdio,
            port: 8080,
        }
    }
}
