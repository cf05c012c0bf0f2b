//! Property-based tests for the configuration module.
//!
//! These tests drive `Config::from_lookup` with in-memory maps, so no test
//! touches the process environment.

use proptest::prelude::*;
use std::collections::HashMap;

use crate::config::{Config, DEFAULT_BACKEND_URL, DEFAULT_MODEL, DEFAULT_PORT};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

/// Strategy for host names
fn host_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,20}"
}

/// Strategy for generating valid port numbers
fn port_strategy() -> impl Strategy<Value = u16> {
    1024u16..65535u16
}

#[cfg(test)]
mod config_logic_tests {
    use super::*;

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.request_timeout_secs, 300);
    }

    #[test]
    fn scheme_is_added_to_bare_address() {
        let config =
            Config::from_lookup(lookup_from(&[("EASY_DIFFUSION_ADDRESS", "192.168.1.20:9000")]))
                .unwrap();
        assert_eq!(config.backend_url, "http://192.168.1.20:9000");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = Config::from_lookup(lookup_from(&[(
            "EASY_DIFFUSION_ADDRESS",
            "https://diffusion.example.com/",
        )]))
        .unwrap();
        assert_eq!(config.backend_url, "https://diffusion.example.com");
        assert_eq!(config.render_endpoint(), "https://diffusion.example.com/render");
    }

    #[test]
    fn invalid_address_is_rejected() {
        let result =
            Config::from_lookup(lookup_from(&[("EASY_DIFFUSION_ADDRESS", "http://[::1")]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("EASY_DIFFUSION_ADDRESS"));
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[("DEFAULT_MODEL", "  ")])).unwrap();
        assert_eq!(config.default_model, DEFAULT_MODEL);
    }

    #[test]
    fn unparseable_port_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[("BACKEND_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.request_timeout_secs, 300);
    }

    #[test]
    fn stream_url_resolution() {
        let config = Config::default();
        assert_eq!(
            config.resolve_stream_url("/image/stream/123"),
            "http://localhost:9000/image/stream/123"
        );
        assert_eq!(
            config.resolve_stream_url("image/stream/123"),
            "http://localhost:9000/image/stream/123"
        );
        assert_eq!(
            config.resolve_stream_url("http://other:9000/image/stream/123"),
            "http://other:9000/image/stream/123"
        );
    }

    #[test]
    fn config_is_cloneable() {
        let config = Config {
            backend_url: "http://gpu:9000".to_string(),
            default_model: "flux1-dev".to_string(),
            port: 9001,
            request_timeout_secs: 60,
        };

        let cloned = config.clone();
        assert_eq!(config.backend_url, cloned.backend_url);
        assert_eq!(config.default_model, cloned.default_model);
        assert_eq!(config.port, cloned.port);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        /// Any host:port pair becomes an http URL with no trailing slash.
        #[test]
        fn bare_addresses_normalize(host in host_strategy(), port in port_strategy()) {
            let raw = format!("{}:{}/", host, port);
            let config = Config::from_lookup(lookup_from(&[("EASY_DIFFUSION_ADDRESS", &raw)])).unwrap();
            prop_assert_eq!(config.backend_url, format!("http://{}:{}", host, port));
        }

        /// The port variable is preserved exactly when valid.
        #[test]
        fn config_preserves_port(port in port_strategy()) {
            let port_str = port.to_string();
            let config = Config::from_lookup(lookup_from(&[("PORT", &port_str)])).unwrap();
            prop_assert_eq!(config.port, port);
        }

        /// Root-relative stream paths are always prefixed with the backend address.
        #[test]
        fn relative_stream_urls_resolve(host in host_strategy(), id in "[0-9]{1,12}") {
            let raw = format!("http://{}:9000", host);
            let config = Config::from_lookup(lookup_from(&[("EASY_DIFFUSION_ADDRESS", &raw)])).unwrap();
            let resolved = config.resolve_stream_url(&format!("/image/stream/{}", id));
            prop_assert_eq!(resolved, format!("http://{}:9000/image/stream/{}", host, id));
        }
    }
}
