use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Fallback wait when a 429 arrives without a usable `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

const BODY_EXCERPT_CHARS: usize = 200;

/// Structured error context for diagnostics and branching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Logical operation that failed (e.g. "request", "cache.disk.write")
    pub operation: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<u16>,
    /// Correlation id sent as `X-Request-ID`
    pub request_id: Option<String>,
    /// Number of attempts made before the error was surfaced
    pub attempts: Option<u32>,
    /// Remediation hint overriding the per-kind default
    pub suggestion: Option<String>,
    pub metadata: Vec<(String, String)>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref op) = ctx.operation {
        parts.push(op.clone());
    }
    match (&ctx.method, &ctx.url) {
        (Some(m), Some(u)) => parts.push(format!("{} {}", m, u)),
        (None, Some(u)) => parts.push(u.clone()),
        _ => {}
    }
    if let Some(status) = ctx.status_code {
        parts.push(format!("status={}", status));
    }
    if let Some(ref id) = ctx.request_id {
        parts.push(format!("request_id={}", id));
    }
    if let Some(n) = ctx.attempts {
        parts.push(format!("attempts={}", n));
    }
    for (k, v) in &ctx.metadata {
        parts.push(format!("{}={}", k, v));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(" | "))
    }
}

/// Fieldless classification of [`Error`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    RateLimit,
    Validation,
    Stream,
    ResourceTooLarge,
    Api,
    Configuration,
    SessionClosed,
    Io,
    Serialization,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::Validation => "INVALID_PARAMETER",
            ErrorKind::Stream => "STREAM_ERROR",
            ErrorKind::ResourceTooLarge => "FILE_TOO_LARGE_ERROR",
            ErrorKind::Api => "API_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::SessionClosed => "SESSION_CLOSED",
            ErrorKind::Io => "IO_ERROR",
            ErrorKind::Serialization => "SERIALIZATION_ERROR",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the execution core and the cache.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {message}{}", format_context(.context))]
    Network {
        message: String,
        context: ErrorContext,
    },

    #[error("Request timed out: {message}{}", format_context(.context))]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    #[error("Authentication failed: {message}{}", format_context(.context))]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limit exceeded: {message}{}", format_context(.context))]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Stream interrupted: {message}{}", format_context(.context))]
    Stream {
        message: String,
        context: ErrorContext,
    },

    #[error("Resource too large: {message}{}", format_context(.context))]
    ResourceTooLarge {
        message: String,
        context: ErrorContext,
    },

    #[error("API error: HTTP {status}: {message}{}", format_context(.context))]
    Api {
        status: u16,
        message: String,
        retryable: bool,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Session closed: {message}{}", format_context(.context))]
    SessionClosed {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {message}{}", format_context(.context))]
    Unknown {
        message: String,
        context: ErrorContext,
    },
}

macro_rules! context_ctor {
    ($plain:ident, $with:ident, $variant:ident) => {
        pub fn $plain(msg: impl Into<String>) -> Self {
            Self::$with(msg, ErrorContext::new())
        }

        pub fn $with(msg: impl Into<String>, context: ErrorContext) -> Self {
            Error::$variant {
                message: msg.into(),
                context,
            }
        }
    };
}

impl Error {
    context_ctor!(network, network_with_context, Network);
    context_ctor!(timeout, timeout_with_context, Timeout);
    context_ctor!(authentication, authentication_with_context, Authentication);
    context_ctor!(validation, validation_with_context, Validation);
    context_ctor!(stream, stream_with_context, Stream);
    context_ctor!(too_large, too_large_with_context, ResourceTooLarge);
    context_ctor!(configuration, configuration_with_context, Configuration);
    context_ctor!(session_closed, session_closed_with_context, SessionClosed);
    context_ctor!(unknown, unknown_with_context, Unknown);

    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::RateLimit {
            message: msg.into(),
            retry_after,
            context: ErrorContext::new(),
        }
    }

    pub fn api(status: u16, msg: impl Into<String>, retryable: bool) -> Self {
        Error::Api {
            status,
            message: msg.into(),
            retryable,
            context: ErrorContext::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Authentication { .. } => ErrorKind::Authentication,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Stream { .. } => ErrorKind::Stream,
            Error::ResourceTooLarge { .. } => ErrorKind::ResourceTooLarge,
            Error::Api { .. } => ErrorKind::Api,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::SessionClosed { .. } => ErrorKind::SessionClosed,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Default retry classification: transport failures, timeouts, rate limits
    /// and transient gateway statuses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } | Error::RateLimit { .. } => true,
            Error::Api { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Authoritative server-supplied delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::Authentication { context, .. }
            | Error::RateLimit { context, .. }
            | Error::Validation { context, .. }
            | Error::Stream { context, .. }
            | Error::ResourceTooLarge { context, .. }
            | Error::Api { context, .. }
            | Error::Configuration { context, .. }
            | Error::SessionClosed { context, .. }
            | Error::Unknown { context, .. } => Some(context),
            Error::Io(_) | Error::Serialization(_) => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::Authentication { context, .. }
            | Error::RateLimit { context, .. }
            | Error::Validation { context, .. }
            | Error::Stream { context, .. }
            | Error::ResourceTooLarge { context, .. }
            | Error::Api { context, .. }
            | Error::Configuration { context, .. }
            | Error::SessionClosed { context, .. }
            | Error::Unknown { context, .. } => Some(context),
            Error::Io(_) | Error::Serialization(_) => None,
        }
    }

    /// Replace the context, keeping the kind and message.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        if let Some(ctx) = self.context_mut() {
            *ctx = context;
        }
        self
    }

    /// Record how many attempts were made. Kind and message are unchanged.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.attempts = Some(attempts);
        }
        self
    }

    pub fn attempts(&self) -> Option<u32> {
        self.context().and_then(|c| c.attempts)
    }

    /// Remediation hint: an explicit one from the context, else a per-kind default.
    pub fn suggestion(&self) -> Option<String> {
        if let Some(s) = self.context().and_then(|c| c.suggestion.clone()) {
            return Some(s);
        }
        match self {
            Error::Authentication { .. } => {
                Some("Check your API token at https://enter.pollinations.ai".to_string())
            }
            Error::Timeout { .. } => {
                Some("Try increasing timeout or check your connection".to_string())
            }
            Error::RateLimit {
                retry_after: Some(d),
                ..
            } => Some(format!(
                "Please wait {} seconds before retrying",
                d.as_secs().max(1)
            )),
            Error::RateLimit { .. } => Some("Wait before retrying".to_string()),
            Error::Stream { .. } => {
                Some("Check your connection or increase the stream timeout".to_string())
            }
            Error::SessionClosed { .. } => {
                Some("Create a new client; closed sessions are not reopened".to_string())
            }
            Error::Unknown { .. } => Some("Please report this issue if it persists".to_string()),
            _ => None,
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(
        status: u16,
        retry_after_header: Option<&str>,
        body: &[u8],
        context: ErrorContext,
    ) -> Self {
        let context = context.with_status_code(status);
        let excerpt = body_excerpt(body);
        match status {
            401 | 403 => Error::authentication_with_context(
                format!("HTTP {}: {}", status, excerpt),
                context,
            ),
            402 => Error::Api {
                status,
                message: format!("Payment Required: {}", payment_message(body)),
                retryable: false,
                context: context.with_suggestion(
                    "Visit https://auth.pollinations.ai to upgrade or check your API token.",
                ),
            },
            400 | 422 => Error::validation_with_context(excerpt, context),
            413 => Error::too_large_with_context(excerpt, context),
            429 => Error::RateLimit {
                message: "Rate limit exceeded".to_string(),
                retry_after: Some(parse_retry_after(retry_after_header)),
                context,
            },
            502..=504 => Error::Api {
                status,
                message: format!("Server error {}: {}", status, excerpt),
                retryable: true,
                context,
            },
            _ => Error::Api {
                status,
                message: excerpt,
                retryable: false,
                context,
            },
        }
    }

    /// Map a transport failure from reqwest into the taxonomy.
    pub fn from_reqwest(err: reqwest::Error, context: ErrorContext) -> Self {
        if err.is_timeout() {
            Error::timeout_with_context(err.to_string(), context)
        } else if err.is_connect() {
            Error::network_with_context(format!("Connection failed: {}", err), context)
        } else if err.is_body() || err.is_decode() {
            Error::stream_with_context(err.to_string(), context)
        } else {
            Error::network_with_context(err.to_string(), context)
        }
    }
}

/// Seconds form of `Retry-After`; missing or unparsable values fall back to 60s.
pub fn parse_retry_after(raw: Option<&str>) -> Duration {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
}

fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(BODY_EXCERPT_CHARS).collect()
}

fn payment_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| "Payment Required".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let ctx = ErrorContext::new();
        assert_eq!(
            Error::from_status(401, None, b"nope", ctx.clone()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            Error::from_status(400, None, b"bad prompt", ctx.clone()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::from_status(413, None, b"", ctx.clone()).kind(),
            ErrorKind::ResourceTooLarge
        );

        let gateway = Error::from_status(502, None, b"bad gateway", ctx.clone());
        assert_eq!(gateway.kind(), ErrorKind::Api);
        assert!(gateway.is_retryable());

        let not_found = Error::from_status(404, None, b"missing", ctx);
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_rate_limit_retry_after() {
        let err = Error::from_status(429, Some("10"), b"", ErrorContext::new());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
        assert!(err.is_retryable());
        assert_eq!(
            err.suggestion().as_deref(),
            Some("Please wait 10 seconds before retrying")
        );

        let fallback = Error::from_status(429, Some("soon"), b"", ErrorContext::new());
        assert_eq!(fallback.retry_after(), Some(DEFAULT_RATE_LIMIT_WAIT));
    }

    #[test]
    fn test_payment_required_reads_json_error() {
        let err = Error::from_status(
            402,
            None,
            br#"{"error":"credits exhausted"}"#,
            ErrorContext::new(),
        );
        assert!(err.to_string().contains("credits exhausted"));
        assert!(err.suggestion().unwrap().contains("auth.pollinations.ai"));
    }

    #[test]
    fn test_with_attempts_keeps_kind() {
        let err = Error::network("connection reset").with_attempts(3);
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.attempts(), Some(3));
        assert!(err.to_string().contains("attempts=3"));
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let body = "x".repeat(500);
        let err = Error::from_status(500, None, body.as_bytes(), ErrorContext::new());
        match err {
            Error::Api { message, .. } => assert_eq!(message.len(), 200),
            other => panic!("unexpected {:?}", other),
        }
    }
}
