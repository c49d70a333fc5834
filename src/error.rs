use serde::Deserialize;

/// Unified console error type.
///
/// Every payload is a plain string so one failed fetch can be handed to
/// every subscriber of a cache entry (the enum is `Clone`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsoleError {
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Request failed ({status}): {message}")]
    Transport { status: u16, message: String },

    #[error("Validation failed: {message}")]
    Validation {
        /// 400 or 422, as the gateway sent it.
        status: u16,
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single field-level complaint attached to a validation error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

pub type Result<T, E = ConsoleError> = std::result::Result<T, E>;

impl ConsoleError {
    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(401),
            Self::Transport { status, .. } | Self::Validation { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Map a non-2xx response to the error taxonomy.
    ///
    /// 401 is always `Unauthorized`. 400 and 422 become `Validation` when the
    /// body is JSON; everything else is `Transport` with the best message
    /// the body offers.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<ServerErrorBody> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(ServerErrorBody::message)
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    format!("HTTP {status}")
                } else {
                    trimmed.to_string()
                }
            });

        match status {
            401 => Self::Unauthorized(message),
            400 | 422 if parsed.is_some() => Self::Validation {
                status,
                message,
                fields: parsed.map(|p| p.fields).unwrap_or_default(),
            },
            _ => Self::Transport { status, message },
        }
    }
}

/// The shapes the gateway uses for error bodies.
#[derive(Debug, Deserialize)]
struct ServerErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<ServerErrorField>,
    #[serde(default)]
    fields: Vec<FieldError>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerErrorField {
    Text(String),
    Detail { message: String },
}

impl ServerErrorBody {
    fn message(&self) -> Option<String> {
        match (&self.error, &self.message) {
            (Some(ServerErrorField::Detail { message }), _) => Some(message.clone()),
            (Some(ServerErrorField::Text(text)), _) => Some(text.clone()),
            (None, Some(message)) => Some(message.clone()),
            (None, None) => None,
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(error = %err, "HTTP client error");
        if let Some(status) = err.status() {
            return Self::Transport {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {err}"))
    }
}

impl From<url::ParseError> for ConsoleError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("Invalid URL: {err}"))
    }
}

impl From<anyhow::Error> for ConsoleError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_from_401() {
        let err = ConsoleError::from_response(401, r#"{"error":{"message":"expired"}}"#);
        assert_eq!(err, ConsoleError::Unauthorized("expired".into()));
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_validation_keeps_fields() {
        let body = r#"{"message":"bad budget","fields":[{"field":"limit","message":"must be positive"}]}"#;
        match ConsoleError::from_response(422, body) {
            ConsoleError::Validation {
                status,
                message,
                fields,
            } => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad budget");
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "limit");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_reports_its_own_status() {
        let unprocessable = ConsoleError::from_response(422, r#"{"message":"bad"}"#);
        assert_eq!(unprocessable.status(), Some(422));

        let bad_request = ConsoleError::from_response(400, r#"{"message":"bad"}"#);
        assert_eq!(bad_request.status(), Some(400));
        assert!(matches!(bad_request, ConsoleError::Validation { .. }));
    }

    #[test]
    fn test_plain_text_400_is_transport() {
        let err = ConsoleError::from_response(400, "nope");
        assert_eq!(
            err,
            ConsoleError::Transport {
                status: 400,
                message: "nope".into()
            }
        );
    }

    #[test]
    fn test_error_string_field() {
        let err = ConsoleError::from_response(500, r#"{"error":"boom"}"#);
        assert_eq!(
            err,
            ConsoleError::Transport {
                status: 500,
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_empty_body_message() {
        let err = ConsoleError::from_response(503, "  ");
        assert_eq!(err.to_string(), "Request failed (503): HTTP 503");
    }
}
