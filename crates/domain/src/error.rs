/// Shared error type used across all SerialAgent crates.
///
/// Every variant maps to one of the gateway's wire-level error codes via
/// [`Error::code`] / [`Error::http_status`], so a single `?`-propagated
/// error carries enough information to build the JSON error envelope at
/// the API boundary without re-deriving it from the error message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    /// Request failed validation (bad/missing parameter).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Referenced session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Referenced session exists but has passed its absolute expiry.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// STT backend failed.
    #[error("STT: {0}")]
    Stt(String),

    /// Caller exceeded a rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// SessionManager admission was refused (capacity bound reached).
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// A recoverable mid-stream LLM error (stream-only; the stream stays open).
    #[error("recoverable: {0}")]
    Recoverable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The canonical numeric error code surfaced in the API error envelope.
    pub fn code(&self) -> u32 {
        match self {
            Error::Validation(_) => 1001,
            Error::Auth(_) => 1002,
            Error::SessionNotFound(_) => 1003,
            Error::SessionExpired(_) => 1004,
            Error::Stt(_) => 2001,
            Error::Provider { .. } => 2002,
            Error::Timeout(_) => 2003,
            Error::RateLimited(_) => 3001,
            Error::Capacity(_) => 3002,
            Error::Recoverable(_) => 5001,
            Error::Io(_)
            | Error::Json(_)
            | Error::Http(_)
            | Error::Config(_)
            | Error::Other(_) => 5000,
        }
    }

    /// The HTTP status this error maps to when surfaced over REST.
    pub fn http_status(&self) -> u16 {
        match self.code() {
            1001 => 400,
            1002 => 401,
            1003 => 404,
            1004 => 410,
            2001 | 2002 => 502,
            2003 => 504,
            3001 | 3002 => 429,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let e = Error::Validation("missing field".into());
        assert_eq!(e.code(), 1001);
        assert_eq!(e.http_status(), 400);
    }

    #[test]
    fn session_expired_maps_to_410() {
        let e = Error::SessionExpired("sess_1".into());
        assert_eq!(e.code(), 1004);
        assert_eq!(e.http_status(), 410);
    }

    #[test]
    fn capacity_maps_to_429() {
        let e = Error::Capacity("max_sessions reached".into());
        assert_eq!(e.code(), 3002);
        assert_eq!(e.http_status(), 429);
    }

    #[test]
    fn timeout_maps_to_504() {
        let e = Error::Timeout("stt completion".into());
        assert_eq!(e.code(), 2003);
        assert_eq!(e.http_status(), 504);
    }

    #[test]
    fn other_maps_to_internal_500() {
        let e = Error::Other("unexpected".into());
        assert_eq!(e.code(), 5000);
        assert_eq!(e.http_status(), 500);
    }
}
