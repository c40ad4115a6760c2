//! Error taxonomy & retry policy. A tagged-variant enum plus a single pure
//! HTTP-translation function, collapsed down to exactly eight kinds.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ErrorKind {
    #[error("malformed client input")]
    Validation,
    #[error("no healthy account available")]
    NoAccount,
    #[error("authentication failed")]
    Auth,
    #[error("rate limited")]
    RateLimit,
    #[error("upstream server error")]
    Upstream5xx,
    #[error("transport error")]
    Transport,
    #[error("client closed the connection")]
    ClientAbort,
    #[error("internal invariant violation")]
    Fatal,
}

impl ErrorKind {
    /// The status code this kind is reported to the client as.
    pub fn http_status(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NoAccount => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Auth => StatusCode::BAD_GATEWAY,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Upstream5xx => StatusCode::BAD_GATEWAY,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::ClientAbort => StatusCode::OK,
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retry is across accounts, not within an account: this answers
    /// whether the dispatcher should try the next candidate at all, not
    /// whether the *same* account is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Auth | ErrorKind::RateLimit | ErrorKind::Upstream5xx | ErrorKind::Transport
        )
    }

    /// The `{ error, details? }` body the proxy synthesises for its own
    /// errors.
    pub fn body(&self, details: Option<serde_json::Value>) -> serde_json::Value {
        let message = match self {
            ErrorKind::NoAccount => "no_healthy_account",
            ErrorKind::Auth => "reauth_required",
            ErrorKind::RateLimit => "rate_limited",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Upstream5xx => "upstream_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::ClientAbort => "client_abort",
            ErrorKind::Fatal => "fatal",
        };
        match details {
            Some(details) => serde_json::json!({ "error": message, "details": details }),
            None => serde_json::json!({ "error": message }),
        }
    }
}

/// Classifies a finished upstream HTTP response into a kind. Only called
/// for statuses the dispatcher treats as possibly-retryable (5xx, 408,
/// 429); 2xx/4xx (other than 401/403/429) are forwarded without
/// classification.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Auth),
        429 => Some(ErrorKind::RateLimit),
        408 => Some(ErrorKind::Upstream5xx),
        500..=599 => Some(ErrorKind::Upstream5xx),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_rate_limit_and_5xx_and_transport_are_retryable() {
        assert!(ErrorKind::Auth.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Upstream5xx.is_retryable());
        assert!(ErrorKind::Transport.is_retryable());
    }

    #[test]
    fn validation_no_account_abort_and_fatal_are_not_retried_across_accounts() {
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::NoAccount.is_retryable());
        assert!(!ErrorKind::ClientAbort.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
    }

    #[test]
    fn classify_status_matches_spec_table() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(401), Some(ErrorKind::Auth));
        assert_eq!(classify_status(429), Some(ErrorKind::RateLimit));
        assert_eq!(classify_status(500), Some(ErrorKind::Upstream5xx));
        assert_eq!(classify_status(408), Some(ErrorKind::Upstream5xx));
        assert_eq!(classify_status(404), None);
    }

    #[test]
    fn no_account_http_status_is_503() {
        assert_eq!(ErrorKind::NoAccount.http_status(), http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
