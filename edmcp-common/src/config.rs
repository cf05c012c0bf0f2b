//! Configuration module for loading environment variables and settings.

use crate::error::ConfigError;

/// Default Easy Diffusion address when `EASY_DIFFUSION_ADDRESS` is unset.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:9000";

/// Default model when `DEFAULT_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "animagineXL40_v4Opt";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default timeout for each backend HTTP request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Application configuration loaded from environment variables.
///
/// Built once at startup and shared read-only with the components that need it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base address of the Easy Diffusion backend, without trailing slash
    pub backend_url: String,
    /// Model used when a tool call does not name one
    pub default_model: String,
    /// HTTP server port
    pub port: u16,
    /// Timeout applied to every backend HTTP request
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            port: DEFAULT_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if EASY_DIFFUSION_ADDRESS is not a valid URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = match lookup("EASY_DIFFUSION_ADDRESS") {
            Some(raw) if !raw.trim().is_empty() => normalize_backend_url(&raw)?,
            _ => DEFAULT_BACKEND_URL.to_string(),
        };

        let default_model = lookup("DEFAULT_MODEL")
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let port = lookup("PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let request_timeout_secs = lookup("BACKEND_TIMEOUT_SECS")
            .and_then(|t| t.trim().parse().ok())
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Self {
            backend_url,
            default_model,
            port,
            request_timeout_secs,
        })
    }

    /// The job submission endpoint.
    pub fn render_endpoint(&self) -> String {
        format!("{}/render", self.backend_url)
    }

    /// Resolve a stream URL returned by the backend against the base address.
    pub fn resolve_stream_url(&self, stream: &str) -> String {
        if stream.starts_with("http://") || stream.starts_with("https://") {
            stream.to_string()
        } else if stream.starts_with('/') {
            format!("{}{}", self.backend_url, stream)
        } else {
            format!("{}/{}", self.backend_url, stream)
        }
    }
}

/// Normalize a backend address: add a scheme when missing, drop trailing
/// slashes and make sure the result parses as a URL.
///
/// # Example
///
/// ```
/// use edmcp_common::config::normalize_backend_url;
///
/// assert_eq!(normalize_backend_url("gpu-box:9000/").unwrap(), "http://gpu-box:9000");
/// ```
pub fn normalize_backend_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let normalized = with_scheme.trim_end_matches('/').to_string();

    reqwest::Url::parse(&normalized)
        .map_err(|e| ConfigError::invalid_value("EASY_DIFFUSION_ADDRESS", e.to_string()))?;

    Ok(normalized)
}
