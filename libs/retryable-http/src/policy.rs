//! Retry classification.
//!
//! Network-level failures are retried unless they come from constructing the
//! request (bad URL, scheme or header), a redirect loop, or an untrusted
//! certificate; retrying those cannot change the outcome. Responses are
//! retried on 429 and on any 5xx except 501.

use std::error::Error as StdError;

use reqwest::StatusCode;

/// Whether a response with `status` should be retried.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

/// Whether a transport-level error should be retried.
pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    if err.is_builder() || err.is_redirect() {
        return false;
    }
    !is_certificate_error(err)
}

fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        let message = cause.to_string().to_ascii_lowercase();
        if message.contains("certificate") {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for code in [429u16, 500, 502, 503, 504, 505, 599] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(is_retryable_status(status), "{code} should be retried");
        }
    }

    #[test]
    fn test_terminal_statuses() {
        for code in [200u16, 201, 204, 301, 302, 304, 399, 400, 401, 403, 404, 405, 501] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!is_retryable_status(status), "{code} should not be retried");
        }
    }

    #[test]
    fn test_builder_errors_are_terminal() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(err.is_builder());
        assert!(!is_retryable_error(&err));
    }
}
