use thiserror::Error;

/// Type alias for Result with EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy for the bulk-operation engine
///
/// Terminal credential errors (`Auth`, `ReauthRequired`) are never retried;
/// they surface a reconnect prompt instead. Rate-limit and transient errors
/// stop the current target without an automatic backoff loop, so the user
/// decides whether to re-trigger the job.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Credential invalid or rejected by the provider
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Token refresh was refused; the account must be reconnected
    #[error("Reconnect required: {0}")]
    ReauthRequired(String),

    /// Provider throttling (429)
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// Provider returned an error response
    #[error("Provider error: {0}")]
    Provider(String),

    /// Network-level failure (connection issues, timeouts, malformed responses)
    #[error("Network error: {0}")]
    Network(String),

    /// Payload rejected before any network activity
    #[error("Validation error: {0}")]
    Validation(String),

    /// Per-target page-fetch cap reached; guarantees termination when the
    /// provider keeps returning a non-decreasing result set
    #[error("Gave up on target after {attempts} page fetches")]
    AttemptsExhausted { attempts: u32 },

    /// Filter creation failed
    #[error("Filter error: {0}")]
    Filter(String),

    /// Audit-log write failed; callers swallow this, never escalate it
    #[error("Audit log error: {0}")]
    AuditLog(String),

    /// IO error (action-log files, config)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// True for errors that mean the stored credential is unusable and the
    /// user has to reconnect the account
    pub fn is_reauth(&self) -> bool {
        matches!(self, EngineError::Auth(_) | EngineError::ReauthRequired(_))
    }

    /// True for errors a later manual re-run could plausibly clear
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. }
                | EngineError::Provider(_)
                | EngineError::Network(_)
        )
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Accepts both delay-seconds ("120") and HTTP-date formats. Missing or
/// invalid headers fall back to a 5 second default.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for EngineError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    401 => EngineError::Auth(message),
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        EngineError::RateLimited { retry_after }
                    }
                    // Gmail reports some quota exhaustion as 403
                    403 => EngineError::Provider(message),
                    500..=599 => EngineError::Network(message),
                    _ => EngineError::Provider(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => {
                EngineError::Provider(format!("{}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                EngineError::Network(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => EngineError::Network(err.to_string()),
            _ => EngineError::Provider(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reauth_classification() {
        assert!(EngineError::Auth("expired".to_string()).is_reauth());
        assert!(EngineError::ReauthRequired("refresh token revoked".to_string()).is_reauth());
        assert!(!EngineError::RateLimited { retry_after: 5 }.is_reauth());
        assert!(!EngineError::Validation("empty targets".to_string()).is_reauth());
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::RateLimited { retry_after: 5 }.is_transient());
        assert!(EngineError::Network("timeout".to_string()).is_transient());
        assert!(EngineError::Provider("HTTP 503".to_string()).is_transient());

        assert!(!EngineError::Auth("bad token".to_string()).is_transient());
        assert!(!EngineError::AttemptsExhausted { attempts: 40 }.is_transient());
        assert!(!EngineError::Validation("no labels".to_string()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let error = EngineError::RateLimited { retry_after: 10 };
        let display = format!("{}", error);
        assert!(display.contains("Rate limit exceeded"));
        assert!(display.contains("10 seconds"));

        let error = EngineError::AttemptsExhausted { attempts: 40 };
        assert!(format!("{}", error).contains("40 page fetches"));
    }

    #[test]
    fn test_parse_retry_after_header_integer() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("120"),
        );

        assert_eq!(parse_retry_after_header(&response), 120);
    }

    #[test]
    fn test_parse_retry_after_header_missing() {
        let response = hyper::Response::builder().status(429).body(()).unwrap();
        assert_eq!(parse_retry_after_header(&response), 5);
    }

    #[test]
    fn test_parse_retry_after_header_http_date() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();

        let future_time = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        let http_date = httpdate::fmt_http_date(future_time);
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_str(&http_date).unwrap(),
        );

        let retry_after = parse_retry_after_header(&response);
        assert!(
            (59..=61).contains(&retry_after),
            "Expected ~60, got {}",
            retry_after
        );
    }

    #[test]
    fn test_parse_retry_after_header_invalid() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("soon"),
        );

        assert_eq!(parse_retry_after_header(&response), 5);
    }
}
