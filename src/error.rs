//! Error types for the RF instrument drivers.
//!
//! One consolidated error enum covers the whole crate. The variants map to
//! the failure classes an acquisition can hit:
//!
//! - **`Transport`**: I/O failure on the instrument socket (refused
//!   connection, reset mid-read, closed stream).
//! - **`Timeout`**: a bounded wait elapsed, either the per-read I/O timeout
//!   on the transport or an opt-in acquisition/poll deadline.
//! - **`Format`**: the instrument returned a payload the decoder cannot
//!   accept (non-numeric token, odd interleave count). Never corrected
//!   silently; the offending input is quoted in the message.
//! - **`InvalidArgument`**: a caller-supplied value failed validation before
//!   anything was written to the wire (out-of-range parameter, unknown
//!   enumerated option, bad trace count), or an enumerated reply from the
//!   instrument was outside its closed set.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Primary error type for the RF instrument drivers.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// I/O failure on the instrument connection.
    ///
    /// Wraps `std::io::Error` from the socket. May be transient (glitch on
    /// the bench network) or permanent (instrument powered off); the driver
    /// does not retry except where a fetch policy says so.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A bounded wait elapsed without the instrument responding.
    ///
    /// Raised by the transport read timeout, or by the opt-in poll and
    /// acquisition deadlines when configured. The default acquisition
    /// behaviour has no deadline and never produces this variant on its own.
    #[error("operation timed out after {waited:?}")]
    Timeout {
        /// How long the operation waited before giving up.
        waited: Duration,
    },

    /// Malformed numeric trace payload.
    #[error("malformed trace payload: {0}")]
    Format(String),

    /// Rejected parameter value or unrecognized enumerated option.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl InstrumentError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
