//! spdy-sans-io: a sans-I/O SPDY/3.1 stream multiplexer
//!
//! This crate runs many logical, bidirectional, prioritized streams over a
//! single ordered byte transport, with the SPDY/3.1 framing, flow control,
//! server push, ping and GOAWAY rules. It never touches a socket or a clock:
//! you hand it bytes and the current time, it hands back bytes and events.
//!
//! # Features
//!
//! - **Sans-I/O Design**: no async runtime, no threads, no timers of its own
//! - **Framing**: SYN_STREAM, SYN_REPLY, RST_STREAM, SETTINGS, PING, GOAWAY,
//!   HEADERS, WINDOW_UPDATE and DATA, with a standalone [`FrameCodec`]
//! - **Header Compression**: SPDY/3 name/value blocks in one connection-wide
//!   zlib stream per direction, primed with the SPDY/3 dictionary
//! - **Flow Control**: per-stream and per-connection windows, credit returned
//!   when the application consumes data
//! - **Server Push**: promised streams tied to a client request
//! - **Liveness**: ping round trips, stream and connection idle timeouts
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Instant;
//! use spdy_sans_io::{Connection, Event, Headers};
//!
//! let now = Instant::now();
//! let mut client = Connection::client(now);
//! let mut server = Connection::server(now);
//!
//! let request: Headers = [
//!     (":method", "GET"),
//!     (":path", "/"),
//!     (":version", "HTTP/1.1"),
//!     (":host", "example.com"),
//!     (":scheme", "https"),
//! ]
//! .into_iter()
//! .collect();
//! let stream_id = client.open_stream(request, 0, true, now).unwrap();
//!
//! // Move the bytes however you like; here they go straight across.
//! server.recv(&client.take_pending_send(), now).unwrap();
//!
//! while let Some(event) = server.poll_event() {
//!     if let Event::StreamOpened { stream_id: id, headers, .. } = event {
//!         assert_eq!(id, stream_id);
//!         assert_eq!(headers.get(":path"), Some("/"));
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`frame`]: bytes ↔ [`Frame`]
//! - [`compression`]: header block compression context
//! - [`flow`], [`stream`], [`table`]: windows, per-stream state, stream registry
//! - [`ping`], [`push`]: liveness pings and server push
//! - [`connection`]: the [`Connection`] tying it together
//!
//! It does NOT provide:
//! - TCP or TLS (you provide the bytes)
//! - NPN/ALPN negotiation or HTTP semantics beyond header validation

pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod headers;
pub mod ping;
pub mod push;
pub mod stream;
pub mod table;

pub use compression::{CompressionContext, HeaderDecoder, HeaderEncoder};
pub use config::{Config, Role, DEFAULT_WINDOW_SIZE};
pub use connection::{CloseReason, Connection, Event};
pub use error::{Error, FlowViolation, FrameError, GoAwayStatus, HeaderError, StatusCode};
pub use frame::{
    flags, frame_type, settings_id, Decoded, Frame, FrameCodec, FrameHeader, Setting,
    FRAME_HEADER_LEN, SPDY_VERSION,
};
pub use headers::{BlockKind, Headers};
pub use stream::StreamState;
