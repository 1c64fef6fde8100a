//! Unified error types for the yoz core.
//!
//! Registry and lifecycle errors live in `yoz-framework`; this module only
//! carries what the event model, the transport boundary, and the outbound
//! bot API can produce.

use thiserror::Error;

// =============================================================================
// Parse Errors
// =============================================================================

/// A malformed inbound envelope or unparseable command arguments.
///
/// The dispatch loop logs these and drops the offending event.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// The payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(String),

    /// The envelope is missing a field the event type requires.
    #[error("malformed '{event}' envelope: {reason}")]
    Envelope {
        /// Envelope `type` being parsed.
        event: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Command arguments could not be parsed.
    #[error("invalid arguments for command '{command}': {reason}")]
    Arguments {
        /// The matched command string.
        command: String,
        /// Parser output.
        reason: String,
    },
}

impl ParseError {
    /// Creates an envelope error for the given event type.
    pub fn envelope(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Envelope {
            event: event.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors surfaced by an event source at the transport boundary.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection dropped; the source may be reconnected.
    #[error("transport disconnected: {reason}")]
    Disconnected {
        /// Reason reported by the transport.
        reason: String,
    },

    /// The source is exhausted and will never produce another event.
    #[error("transport closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a disconnect error.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound bot API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,
    /// The gateway rejected the call.
    #[error("API error ({code}): {message}")]
    Rejected { code: i64, message: String },
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for envelope parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
