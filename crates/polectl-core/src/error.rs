//! Error types for polectl.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Adapter queue failures, device queue
//! failures, and record codec failures are all captured here.

use crate::types::{AdapterState, ControlPointId};

/// The error type for all polectl operations.
///
/// Every queue-level variant resolves exactly one pending operation; the
/// queue that produced it has already moved on to the next operation by the
/// time the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The adapter left the powered-on state while an operation was running.
    #[error("adapter not ready: {0}")]
    AdapterNotReady(AdapterState),

    /// The adapter never reached the powered-on state within the readiness
    /// window, so every queued operation was failed.
    #[error("adapter did not power on in time (state: {0})")]
    PowerOnTimeout(AdapterState),

    /// No transport response arrived for a connect or disconnect.
    #[error("timeout waiting for adapter command")]
    CommandTimeout,

    /// A transport completion signal arrived for a different kind of
    /// operation than the one currently running.
    #[error("out-of-order command completion")]
    OutOfOrderCompletion,

    /// The transport reported that the connection attempt failed.
    #[error("unable to connect: {0}")]
    ConnectFailed(String),

    /// No device session is attached, or its link is down.
    #[error("not connected")]
    NotConnected,

    /// The control point was never discovered on the connected device.
    #[error("unknown control point: {0}")]
    UnknownControlPoint(ControlPointId),

    /// The device did not report its control points in time.
    #[error("timeout waiting for control-point discovery")]
    DiscoveryTimeout,

    /// A read completed but carried no value.
    #[error("read returned no data")]
    NoData,

    /// Timed out waiting for a control-point value.
    #[error("timeout waiting for read")]
    ReadTimeout,

    /// Timed out waiting for a write acknowledgement.
    #[error("timeout waiting for write acknowledgement")]
    WriteTimeout,

    /// A record had the wrong number of bytes.
    #[error("record length mismatch: expected {expected} bytes, got {actual}")]
    RecordLength { expected: usize, actual: usize },

    /// A record field is outside its valid range.
    #[error("field out of range: {0}")]
    FieldOutOfRange(&'static str),

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was discarded by a queue flush or session shutdown
    /// before it could complete.
    #[error("operation cancelled")]
    Cancelled,
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_power_on_timeout() {
        let e = Error::PowerOnTimeout(AdapterState::PoweredOff);
        assert_eq!(
            e.to_string(),
            "adapter did not power on in time (state: powered off)"
        );
    }

    #[test]
    fn error_display_adapter_not_ready() {
        let e = Error::AdapterNotReady(AdapterState::Resetting);
        assert_eq!(e.to_string(), "adapter not ready: resetting");
    }

    #[test]
    fn error_display_unknown_control_point() {
        let e = Error::UnknownControlPoint(ControlPointId::Latch);
        assert_eq!(e.to_string(), "unknown control point: latch position");
    }

    #[test]
    fn error_display_record_length() {
        let e = Error::RecordLength {
            expected: 3,
            actual: 1,
        };
        assert_eq!(
            e.to_string(),
            "record length mismatch: expected 3 bytes, got 1"
        );
    }

    #[test]
    fn error_display_field_out_of_range() {
        let e = Error::FieldOutOfRange("servo position");
        assert_eq!(e.to_string(), "field out of range: servo position");
    }

    #[test]
    fn error_display_timeouts() {
        assert_eq!(
            Error::CommandTimeout.to_string(),
            "timeout waiting for adapter command"
        );
        assert_eq!(Error::ReadTimeout.to_string(), "timeout waiting for read");
        assert_eq!(
            Error::WriteTimeout.to_string(),
            "timeout waiting for write acknowledgement"
        );
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
