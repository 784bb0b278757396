//! Top-level error taxonomy for the intake subsystem.
//!
//! Every fallible public function in the core returns [`IntakeResult`] or a
//! narrower error that converts into [`IntakeError`] via `#[from]`. `Fatal`
//! is never constructed from a `Result` path; it exists only so callers that
//! must bridge into `anyhow` (the binary's `main`) have a variant to name
//! the "this is a programmer bug" case distinctly from recoverable errors.

use thiserror::Error;

pub type IntakeResult<T> = Result<T, IntakeError>;

#[derive(Debug, Error)]
pub enum IntakeError {
    /// Malformed frame, truncated bytes, or an unknown enum discriminant.
    #[error("parse error: {0}")]
    Parse(String),

    /// Ring self-check failed, or a frame was shorter than its header.
    #[error("ipc corruption: {0}")]
    IpcCorruption(String),

    /// The ring has no room for the next frame; a transient backpressure
    /// condition, distinct from corruption.
    #[error("ring full: {0}")]
    RingFull(String),

    /// Short read/write or `EAGAIN` that exceeded the retry budget.
    #[error("transient io error: {0}")]
    TransientIo(#[from] std::io::Error),

    /// Configuration failed to load or validate; the previous configuration
    /// stays live.
    #[error("configuration error: {0}")]
    ConfigLoad(String),

    /// The watchdog registration command failed or timed out.
    #[error("watchdog registration failed: {0}")]
    WatchdogRegistration(String),

    /// gzip/zlib/brotli stream error, or the decompression output cap was
    /// exceeded.
    #[error("compression error: {0}")]
    Compression(String),

    /// JWT/cookie/XFF decoding failed on the source-identifier path; the
    /// previous identifier is retained and no verdict is affected.
    #[error("source identifier error: {0}")]
    SourceIdentifier(String),

    /// A bug in the core, not in traffic: indexing a buffer with a literal
    /// out-of-range offset, or double-activating a session key. Reserved
    /// for `assert!`/`panic!` sites; not intended to be returned.
    #[error("fatal programmer error: {0}")]
    Fatal(String),
}

impl IntakeError {
    pub fn parse(msg: impl Into<String>) -> Self {
        IntakeError::Parse(msg.into())
    }

    pub fn ipc_corruption(msg: impl Into<String>) -> Self {
        IntakeError::IpcCorruption(msg.into())
    }

    pub fn ring_full(msg: impl Into<String>) -> Self {
        IntakeError::RingFull(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        IntakeError::Compression(msg.into())
    }

    pub fn source_identifier(msg: impl Into<String>) -> Self {
        IntakeError::SourceIdentifier(msg.into())
    }

    pub fn config_load(msg: impl Into<String>) -> Self {
        IntakeError::ConfigLoad(msg.into())
    }

    pub fn watchdog_registration(msg: impl Into<String>) -> Self {
        IntakeError::WatchdogRegistration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_formats_message() {
        let err = IntakeError::parse("header data extends beyond current buffer");
        assert_eq!(
            err.to_string(),
            "parse error: header data extends beyond current buffer"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WouldBlock, "eagain");
        let err: IntakeError = io_err.into();
        assert!(matches!(err, IntakeError::TransientIo(_)));
    }
}
