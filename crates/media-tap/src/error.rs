//! Error types shared by probes, sessions and backends.

use media_tap_types::DecodeErrorCode;
use thiserror::Error;

/// Errors surfaced by the tap core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TapError {
    /// A decode was requested without a filename or stream device.
    #[error("no decode source set")]
    NoSource,

    /// The backend failed while opening, probing or decoding.
    #[error("backend failure ({code:?}): {message}")]
    Backend {
        code: DecodeErrorCode,
        message: String,
    },
}

impl TapError {
    /// Build a backend failure with the given code.
    pub fn backend(code: DecodeErrorCode, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    /// Code reported through decode error events.
    pub fn code(&self) -> DecodeErrorCode {
        match self {
            TapError::NoSource => DecodeErrorCode::NoSource,
            TapError::Backend { code, .. } => *code,
        }
    }
}

/// Error payload carried by [`DecodeEvent::Error`](crate::decode::DecodeEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub code: DecodeErrorCode,
    pub message: String,
}

impl From<TapError> for DecodeError {
    fn from(err: TapError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(TapError::NoSource.to_string(), "no decode source set");
        let err = TapError::backend(DecodeErrorCode::Format, "bad header");
        assert!(err.to_string().contains("bad header"));
        assert_eq!(err.code(), DecodeErrorCode::Format);
    }

    #[test]
    fn decode_error_keeps_code_and_message() {
        let err: DecodeError = TapError::backend(DecodeErrorCode::Resource, "open failed").into();
        assert_eq!(err.code, DecodeErrorCode::Resource);
        assert!(err.message.contains("open failed"));
        let no_source: DecodeError = TapError::NoSource.into();
        assert_eq!(no_source.code, DecodeErrorCode::NoSource);
    }
}
