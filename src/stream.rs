//! Per-stream state machine.
//!
//! ```text
//!                 Idle
//!    push sent /   |   \ push received
//!  ReservedLocal   |    ReservedRemote
//!        |       Open        |
//!        |      /    \       |
//!  HalfClosedRemote  HalfClosedLocal
//!              \      /
//!               Closed
//! ```
//!
//! Push streams are unidirectional: the pushing side only sends, so leaving
//! `ReservedLocal` lands in `HalfClosedRemote` and leaving `ReservedRemote`
//! lands in `HalfClosedLocal`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::StatusCode;
use crate::flow::StreamWindows;
use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// A write waiting for flow-control credit. Header blocks are kept in
/// logical form and only compressed when they reach the wire.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// `sent` bytes of `data` are already on the wire.
    Data { data: Vec<u8>, sent: usize, fin: bool },
    Trailers(Headers),
}

impl Outbound {
    pub(crate) fn data(data: Vec<u8>, fin: bool) -> Self {
        Outbound::Data { data, sent: 0, fin }
    }
}

#[derive(Debug)]
pub struct Stream {
    id: u32,
    priority: u8,
    state: StreamState,
    associated_stream_id: Option<u32>,
    pub(crate) windows: StreamWindows,
    /// Our opening headers (SYN_STREAM or SYN_REPLY) went out.
    local_headers_sent: bool,
    /// The peer's opening headers arrived.
    remote_headers_received: bool,
    /// FIN is queued or sent; no more writes accepted.
    local_end_queued: bool,
    pub(crate) outbound: VecDeque<Outbound>,
    last_activity: Instant,
}

impl Stream {
    pub fn new(id: u32, priority: u8, windows: StreamWindows, now: Instant) -> Self {
        Self {
            id,
            priority: priority.min(7),
            state: StreamState::Idle,
            associated_stream_id: None,
            windows,
            local_headers_sent: false,
            remote_headers_received: false,
            local_end_queued: false,
            outbound: VecDeque::new(),
            last_activity: now,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn associated_stream_id(&self) -> Option<u32> {
        self.associated_stream_id
    }

    pub fn is_push(&self) -> bool {
        self.associated_stream_id.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Both directions are done and nothing is left to flush.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.outbound.is_empty()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// The peer may still send on this stream.
    pub fn is_remote_open(&self) -> bool {
        matches!(
            self.state,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::ReservedRemote
        )
    }

    /// We may still queue writes on this stream.
    pub fn can_send(&self) -> bool {
        self.local_headers_sent
            && !self.local_end_queued
            && matches!(
                self.state,
                StreamState::Open | StreamState::HalfClosedRemote | StreamState::ReservedLocal
            )
    }

    /// Waiting for our SYN_REPLY.
    pub fn awaiting_local_reply(&self) -> bool {
        !self.local_headers_sent
            && matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn idle_deadline(&self, timeout: Duration) -> Instant {
        self.last_activity + timeout
    }

    /// We sent SYN_STREAM.
    pub fn open_local(&mut self, fin: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::Open;
        self.local_headers_sent = true;
        if fin {
            self.local_end_queued = true;
            self.close_local();
        }
    }

    /// We received SYN_STREAM.
    pub fn open_remote(&mut self, fin: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::Open;
        self.remote_headers_received = true;
        if fin {
            self.close_remote();
        }
    }

    /// We promised this stream to the peer.
    pub fn reserve_local(&mut self, associated: u32) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::ReservedLocal;
        self.associated_stream_id = Some(associated);
        self.local_headers_sent = true;
    }

    /// The peer promised this stream to us.
    pub fn reserve_remote(&mut self, associated: u32, fin: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::ReservedRemote;
        self.associated_stream_id = Some(associated);
        self.remote_headers_received = true;
        if fin {
            self.close_remote();
        }
    }

    /// We are about to send SYN_REPLY on a peer-initiated stream.
    pub fn send_reply(&mut self, fin: bool) {
        self.local_headers_sent = true;
        if fin {
            self.local_end_queued = true;
            self.close_local();
        }
    }

    /// Mark FIN as queued: later writes are rejected even though the FIN
    /// itself may still be waiting for credit.
    pub fn queue_end(&mut self) {
        self.local_end_queued = true;
    }

    /// A frame of ours for this stream reached the wire.
    pub fn on_frame_sent(&mut self, fin: bool) {
        if self.state == StreamState::ReservedLocal {
            self.state = StreamState::HalfClosedRemote;
        }
        if fin {
            self.close_local();
        }
    }

    /// SYN_REPLY received.
    pub fn on_reply(&mut self, fin: bool) -> Result<(), StatusCode> {
        if self.remote_headers_received {
            return Err(StatusCode::StreamInUse);
        }
        if !self.is_remote_open() {
            return Err(StatusCode::StreamAlreadyClosed);
        }
        self.remote_headers_received = true;
        if fin {
            self.close_remote();
        }
        Ok(())
    }

    /// DATA received.
    pub fn on_data(&mut self, fin: bool) -> Result<(), StatusCode> {
        self.check_remote_body()?;
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
        if fin {
            self.close_remote();
        }
        Ok(())
    }

    /// HEADERS (trailers) received: only valid once the opening headers
    /// arrived and while the remote side is still open.
    pub fn on_headers(&mut self, fin: bool) -> Result<(), StatusCode> {
        self.check_remote_body()?;
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
        if fin {
            self.close_remote();
        }
        Ok(())
    }

    fn check_remote_body(&self) -> Result<(), StatusCode> {
        if !self.is_remote_open() {
            return Err(StatusCode::StreamAlreadyClosed);
        }
        if !self.remote_headers_received {
            return Err(StatusCode::ProtocolError);
        }
        Ok(())
    }

    /// Close the stream at once, from either side. Queued writes are
    /// dropped. Returns false if it was already
    /// closed.
    pub fn reset(&mut self) -> bool {
        let was_open = self.state != StreamState::Closed;
        self.state = StreamState::Closed;
        self.local_end_queued = true;
        self.outbound.clear();
        was_open
    }

    fn close_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote | StreamState::ReservedLocal => StreamState::Closed,
            other => other,
        };
    }

    fn close_remote(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal | StreamState::ReservedRemote => StreamState::Closed,
            other => other,
        };
    }
}
