//! Typed error taxonomy shared by every operation surface.
//!
//! Every recoverable fault an operation can return is one of these variants.
//! Each carries a stable string code (surfaced in REST bodies and MCP tool
//! errors) and an HTTP status for the REST layer. Recoverable errors never
//! terminate a session or the manager; read-loop I/O faults are reported via
//! session metadata instead of bubbling through unrelated operations.

use axum::http::StatusCode;
use thiserror::Error;

/// Operation-level errors for the terminal host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Unknown terminal name.
    #[error("terminal '{0}' not found")]
    NotFound(String),

    /// An active terminal already owns the requested name.
    #[error("terminal '{0}' already exists and is active")]
    NameInUse(String),

    /// PTY allocation or child spawn failed; the OS cause is attached.
    #[error("failed to spawn terminal: {cause}")]
    SpawnFailed { cause: String },

    /// Write or resize attempted on a terminal that has already ended.
    #[error("terminal '{0}' has terminated")]
    SessionTerminated(String),

    /// A blacklist hook refused the input. The message is the rule's own
    /// text, returned verbatim so the caller can surface it to the AI.
    #[error("{0}")]
    BlacklistedCommand(String),

    /// Argument validation failure.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgs { field: String, reason: String },

    /// Unexpected invariant violation. Logged and surfaced.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HostError {
    pub fn invalid_args(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for wire surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::NameInUse(_) => "NAME_IN_USE",
            Self::SpawnFailed { .. } => "SPAWN_FAILED",
            Self::SessionTerminated(_) => "SESSION_TERMINATED",
            Self::BlacklistedCommand(_) => "BLACKLISTED_COMMAND",
            Self::InvalidArgs { .. } => "INVALID_ARGS",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status for the REST surface.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NameInUse(_) => StatusCode::CONFLICT,
            Self::SpawnFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SessionTerminated(_) => StatusCode::CONFLICT,
            Self::BlacklistedCommand(_) => StatusCode::FORBIDDEN,
            Self::InvalidArgs { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for HostError {
    fn into_response(self) -> axum::response::Response {
        let body = axum::Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        axum::response::IntoResponse::into_response((self.status(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(HostError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(
            HostError::NameInUse("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HostError::invalid_args("cols", "out of range").code(),
            "INVALID_ARGS"
        );
    }

    #[test]
    fn blacklist_message_passes_through_verbatim() {
        let err = HostError::BlacklistedCommand("use trash-cli instead".into());
        assert_eq!(err.to_string(), "use trash-cli instead");
    }
}
