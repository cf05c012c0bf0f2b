//! Property-based tests for error module.
//!
//! These tests validate that error messages carry the context a tool caller
//! needs to understand a failed generation.

use proptest::prelude::*;

use crate::error::Error;

/// Generate valid HTTP status codes (100-599)
fn http_status_strategy() -> impl Strategy<Value = u16> {
    100u16..600u16
}

/// Generate backend endpoint URLs
fn endpoint_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("http://[a-z]{3,12}:[0-9]{4}/render")
        .unwrap()
        .prop_filter("endpoint must be non-empty", |s| !s.is_empty())
}

/// Generate error messages
fn message_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ]{1,100}"
}

proptest! {
    /// For any backend error, the message includes the endpoint, the HTTP
    /// status code and the response body.
    #[test]
    fn backend_error_includes_endpoint_and_status(
        endpoint in endpoint_strategy(),
        status_code in http_status_strategy(),
        message in message_strategy()
    ) {
        let err = Error::backend(&endpoint, status_code, &message);
        let err_string = err.to_string();

        prop_assert!(
            err_string.contains(&endpoint),
            "Backend error should include endpoint '{}' in message: {}",
            endpoint,
            err_string
        );
        prop_assert!(
            err_string.contains(&status_code.to_string()),
            "Backend error should include status code '{}' in message: {}",
            status_code,
            err_string
        );
        prop_assert!(err_string.contains(&message));
    }

    /// Backend-reported failure details are carried through verbatim.
    #[test]
    fn generation_failure_preserves_detail(detail in message_strategy()) {
        let err = Error::generation_failed(&detail);
        prop_assert!(err.to_string().contains(&detail));
        prop_assert!(err.is_terminal());
    }

    /// Transient errors are never terminal, whatever their message.
    #[test]
    fn transient_errors_are_retryable(message in message_strategy()) {
        prop_assert!(!Error::transient(message).is_terminal());
    }

    /// Attempt exhaustion always names the ceiling that was hit.
    #[test]
    fn attempts_exhausted_names_ceiling(max in 1u32..10_000u32) {
        let err = Error::AttemptsExhausted(max);
        prop_assert!(err.to_string().contains(&max.to_string()));
    }
}
