//! Error taxonomy and wire status codes.
//!
//! Stream-scoped problems become a `RST_STREAM` carrying a [`StatusCode`];
//! connection-scoped problems become a `GOAWAY` carrying a [`GoAwayStatus`].

/// RST_STREAM status codes (SPDY/3.1 Section 2.6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    ProtocolError = 1,
    InvalidStream = 2,
    RefusedStream = 3,
    UnsupportedVersion = 4,
    Cancel = 5,
    InternalError = 6,
    FlowControlError = 7,
    StreamInUse = 8,
    StreamAlreadyClosed = 9,
    FrameTooLarge = 11,
}

impl StatusCode {
    /// Map a wire value; unknown codes collapse to `ProtocolError`.
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::ProtocolError,
            2 => Self::InvalidStream,
            3 => Self::RefusedStream,
            4 => Self::UnsupportedVersion,
            5 => Self::Cancel,
            6 => Self::InternalError,
            7 => Self::FlowControlError,
            8 => Self::StreamInUse,
            9 => Self::StreamAlreadyClosed,
            11 => Self::FrameTooLarge,
            _ => Self::ProtocolError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// GOAWAY status codes (SPDY/3.1 Section 2.6.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GoAwayStatus {
    Ok = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl GoAwayStatus {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Ok,
            1 => Self::ProtocolError,
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Errors raised while decoding the byte stream. All of them are fatal for
/// the connection: once framing or the compression state is off, nothing
/// after it can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown control frame type {0}")]
    UnknownFrameType(u16),

    #[error("{kind} frame has invalid length {len}")]
    InvalidLength { kind: &'static str, len: usize },

    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("header block decompression failed: {0}")]
    Compression(String),

    #[error("malformed header block: {0}")]
    HeaderBlock(&'static str),

    #[error("malformed {0} frame")]
    Malformed(&'static str),
}

/// Inbound data would take a receive window below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("flow control window exceeded: {requested} bytes against {available} available")]
pub struct FlowViolation {
    pub requested: u32,
    pub available: i64,
}

/// A header set that may not go on the wire (or that the peer should not
/// have sent).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("unknown pseudo-header {0:?}")]
    UnknownPseudoHeader(String),

    #[error("duplicate pseudo-header {0:?}")]
    DuplicatePseudoHeader(String),

    #[error("pseudo-header {0:?} after regular headers")]
    MisplacedPseudoHeader(String),

    #[error("pseudo-header {0:?} not allowed in trailers")]
    PseudoHeaderInTrailers(String),

    #[error("connection-specific header {0:?}")]
    ConnectionSpecific(String),

    #[error("invalid header name {0:?}")]
    InvalidName(String),
}

/// Errors surfaced by [`crate::Connection`] commands and input processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The command is not valid for the stream or connection in its current
    /// state (e.g. writing after end-of-stream, pushing from a client).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("unknown stream {0}")]
    UnknownStream(u32),

    /// No new streams: GOAWAY was exchanged or the peer's concurrency limit
    /// is reached.
    #[error("stream refused: {0}")]
    Refused(&'static str),

    #[error("invalid headers: {0}")]
    InvalidHeaders(#[from] HeaderError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A connection-level protocol violation. GOAWAY with `status` has been
    /// queued and the connection is closed.
    #[error("connection error ({status:?}): {reason}")]
    Connection { status: GoAwayStatus, reason: String },
}

impl Error {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Connection {
            status: GoAwayStatus::ProtocolError,
            reason: reason.into(),
        }
    }
}
