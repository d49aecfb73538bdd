//! SPDY/3.1 session state machine.
//!
//! `Connection` is sans-I/O: feed received bytes with [`Connection::recv`],
//! pull outgoing bytes with [`Connection::take_pending_send`], drain events
//! with [`Connection::poll_event`] and drive timers with
//! [`Connection::handle_timeout`]. The caller owns the socket and the clock.
//!
//! Inbound DATA is not credited back to the peer when it arrives but when the
//! application takes the matching [`Event::Data`] off the queue, so a slow
//! consumer stalls the sender instead of growing the queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::compression::CompressionContext;
use crate::config::{Config, Role};
use crate::error::{Error, FrameError, GoAwayStatus, StatusCode};
use crate::flow::FlowController;
use crate::frame::{settings_id, Decoded, Frame, FrameCodec, Setting};
use crate::headers::{BlockKind, Headers};
use crate::ping::{PingAction, PingManager};
use crate::push::{PushCoordinator, PushRejection};
use crate::stream::{Outbound, Stream, StreamState};
use crate::table::{IdStatus, StreamTable};

/// Events produced by the connection for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The peer opened a stream. `associated_stream_id` is set for pushes.
    /// With `end_stream` set, an [`Event::End`] follows immediately.
    StreamOpened {
        stream_id: u32,
        headers: Headers,
        priority: u8,
        end_stream: bool,
        associated_stream_id: Option<u32>,
    },
    /// SYN_REPLY on one of our streams.
    Response {
        stream_id: u32,
        headers: Headers,
        end_stream: bool,
    },
    Data { stream_id: u32, data: Vec<u8> },
    Trailers { stream_id: u32, headers: Headers },
    /// The peer finished its side of the stream.
    End { stream_id: u32 },
    /// The stream was aborted. `remote` is true when the peer caused it.
    Reset {
        stream_id: u32,
        status: StatusCode,
        remote: bool,
    },
    /// The peer is going away; streams above `last_stream_id` were refused.
    GoAway {
        last_stream_id: u32,
        status: GoAwayStatus,
    },
    PingAcknowledged { id: u32, rtt: Duration },
    PingTimeout { id: u32 },
    /// Terminal. Nothing but pending output remains.
    Closed { reason: CloseReason },
}

impl Event {
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Event::StreamOpened { stream_id, .. }
            | Event::Response { stream_id, .. }
            | Event::Data { stream_id, .. }
            | Event::Trailers { stream_id, .. }
            | Event::End { stream_id }
            | Event::Reset { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Our graceful close drained.
    Graceful,
    /// The peer's GOAWAY drained.
    GoAway(GoAwayStatus),
    /// `close(false)`.
    Aborted,
    TransportClosed,
    IdleTimeout,
    Error { status: GoAwayStatus, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Open,
    /// GOAWAY went one way or the other; waiting for streams to finish.
    Draining,
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    role: Role,
    config: Config,
    state: ConnState,

    codec: FrameCodec,
    compression: CompressionContext,
    flow: FlowController,
    table: StreamTable,
    push: PushCoordinator,
    pings: PingManager,

    /// Last good stream id we announced in our GOAWAY.
    goaway_sent: Option<u32>,
    /// Last good stream id the peer announced in its GOAWAY.
    goaway_received: Option<u32>,
    drain_deadline: Option<Instant>,
    drain_reason: Option<CloseReason>,
    /// Peer's MAX_CONCURRENT_STREAMS.
    peer_max_concurrent: Option<u32>,

    send_buf: Vec<u8>,
    events: VecDeque<Event>,

    now: Instant,
    last_recv: Instant,
    /// Frames decoded so far; the clock for closed-stream grace.
    frames_received: u64,
}

impl Connection {
    /// Create a connection and queue the initial SETTINGS (plus a connection
    /// WINDOW_UPDATE if `connection_window` exceeds the default).
    pub fn new(role: Role, config: Config, now: Instant) -> Self {
        let config = config.normalized();
        let settings = vec![
            Setting::new(settings_id::MAX_CONCURRENT_STREAMS, config.max_concurrent_streams),
            Setting::new(settings_id::INITIAL_WINDOW_SIZE, config.initial_window_size),
        ];

        let mut conn = Self {
            role,
            state: ConnState::Open,
            codec: FrameCodec::with_max_frame_len(config.max_frame_len),
            compression: CompressionContext::new(),
            flow: FlowController::new(&config),
            table: StreamTable::new(role, config.closed_stream_memory),
            push: PushCoordinator::new(),
            pings: PingManager::new(role, config.ping_timeout),
            goaway_sent: None,
            goaway_received: None,
            drain_deadline: None,
            drain_reason: None,
            peer_max_concurrent: None,
            send_buf: Vec::new(),
            events: VecDeque::new(),
            now,
            last_recv: now,
            frames_received: 0,
            config,
        };

        conn.write_frame(Frame::Settings {
            clear: false,
            settings,
        });
        if let Some(update) = conn.flow.initial_connection_update() {
            conn.write_frame(update);
        }
        conn
    }

    pub fn client(now: Instant) -> Self {
        Self::new(Role::Client, Config::client(), now)
    }

    pub fn server(now: Instant) -> Self {
        Self::new(Role::Server, Config::server(), now)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// GOAWAY has been sent or received and the connection is winding down.
    pub fn is_draining(&self) -> bool {
        self.state == ConnState::Draining
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.table.get(stream_id).map(|s| s.state())
    }

    pub fn stream(&self, stream_id: u32) -> Option<&Stream> {
        self.table.get(stream_id)
    }

    pub fn active_streams(&self) -> usize {
        self.table.len()
    }

    pub fn goaway_received(&self) -> Option<u32> {
        self.goaway_received
    }

    pub fn connection_send_window(&self) -> i64 {
        self.flow.connection_send_window()
    }

    pub fn pushes_promised(&self) -> u64 {
        self.push.promised()
    }

    // ---- Input ----

    /// Process bytes read from the transport at `now`. On a connection error
    /// the connection is torn down (GOAWAY queued, every stream reset,
    /// `Closed` queued) and the error is returned.
    pub fn recv(&mut self, data: &[u8], now: Instant) -> Result<(), Error> {
        if self.state == ConnState::Closed {
            return Err(Error::ConnectionClosed);
        }
        self.advance_clock(now);
        self.codec.feed(data);

        loop {
            let frame = match self.codec.decode(&mut self.compression) {
                Ok(Decoded::Frame(frame)) => frame,
                Ok(Decoded::NeedMoreBytes) => break,
                Err(e) => {
                    self.fail(GoAwayStatus::ProtocolError, e.to_string());
                    return Err(Error::Frame(e));
                }
            };
            self.frames_received += 1;
            self.last_recv = self.now;

            if let Err(e) = self.handle_frame(frame) {
                let (status, reason) = match &e {
                    Error::Connection { status, reason } => (*status, reason.clone()),
                    other => (GoAwayStatus::InternalError, other.to_string()),
                };
                self.fail(status, reason);
                return Err(e);
            }
        }

        self.settle();
        Ok(())
    }

    /// Take all bytes queued for the transport.
    pub fn take_pending_send(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send_buf)
    }

    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// Next event in arrival order. Taking a `Data` event releases its bytes
    /// back to the peer's send window.
    pub fn poll_event(&mut self) -> Option<Event> {
        let event = self.events.pop_front()?;
        self.on_delivered(&event);
        Some(event)
    }

    /// Next event for one stream, leaving other streams' events queued.
    pub fn poll_stream_event(&mut self, stream_id: u32) -> Option<Event> {
        let pos = self
            .events
            .iter()
            .position(|e| e.stream_id() == Some(stream_id))?;
        let event = self.events.remove(pos)?;
        self.on_delivered(&event);
        Some(event)
    }

    fn on_delivered(&mut self, event: &Event) {
        let Event::Data { stream_id, data } = event else {
            return;
        };
        if self.state == ConnState::Closed {
            return;
        }
        let (id, n) = (*stream_id, data.len() as u32);
        let windows = match self.table.get_mut(id) {
            Some(stream) => {
                if stream.is_remote_open() {
                    Some(&mut stream.windows)
                } else {
                    None
                }
            }
            None => None,
        };
        let updates = self.flow.replenish(id, windows, n);
        for frame in updates {
            self.write_frame(frame);
        }
    }

    // ---- Commands ----

    /// Open a stream with SYN_STREAM. `priority` is 0 (highest) to 7.
    pub fn open_stream(
        &mut self,
        headers: Headers,
        priority: u8,
        end_stream: bool,
        now: Instant,
    ) -> Result<u32, Error> {
        self.ensure_accepting()?;
        self.advance_clock(now);
        if self.role == Role::Server {
            return Err(Error::InvalidState("servers only open streams by pushing"));
        }
        if let Some(max) = self.peer_max_concurrent {
            if self.table.active_count(true) >= max as usize {
                return Err(Error::Refused("peer concurrency limit reached"));
            }
        }
        headers.validate(BlockKind::Initial)?;

        let stream_id = self.table.allocate_id()?;
        let mut stream = Stream::new(stream_id, priority, self.flow.stream_windows(), self.now);
        stream.open_local(end_stream);
        let priority = stream.priority();
        self.table.insert(stream);

        tracing::debug!(stream_id, priority, "stream opened");
        self.write_frame(Frame::SynStream {
            stream_id,
            associated_stream_id: 0,
            priority,
            unidirectional: false,
            fin: end_stream,
            headers,
        });
        Ok(stream_id)
    }

    /// Answer a peer-initiated stream with SYN_REPLY.
    pub fn respond(
        &mut self,
        stream_id: u32,
        headers: Headers,
        end_stream: bool,
        now: Instant,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.advance_clock(now);
        let now = self.now;
        let stream = self
            .table
            .get_mut(stream_id)
            .ok_or(Error::UnknownStream(stream_id))?;
        if !stream.awaiting_local_reply() {
            return Err(Error::InvalidState("stream does not expect a reply"));
        }
        headers.validate(BlockKind::Initial)?;
        stream.send_reply(end_stream);
        stream.touch(now);

        self.write_frame(Frame::SynReply {
            stream_id,
            fin: end_stream,
            headers,
        });
        self.settle();
        Ok(())
    }

    /// Promise a pushed resource tied to the client stream `origin`. The
    /// returned stream carries the body via [`Connection::write_data`].
    pub fn push(&mut self, origin: u32, headers: Headers, now: Instant) -> Result<u32, Error> {
        self.ensure_open()?;
        self.advance_clock(now);
        let accepting = self.goaway_sent.is_none() && self.goaway_received.is_none();
        let (stream_id, frame) =
            self.push
                .push(&mut self.table, &self.flow, accepting, origin, headers, self.now)?;
        self.write_frame(frame);
        Ok(stream_id)
    }

    /// Queue body bytes. Whatever the send windows allow goes out at once;
    /// the rest waits for WINDOW_UPDATE.
    pub fn write_data(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
        now: Instant,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.advance_clock(now);
        let stream = self.writable_stream(stream_id)?;
        if data.is_empty() && !end_stream {
            return Ok(());
        }
        stream.outbound.push_back(Outbound::data(data.to_vec(), end_stream));
        if end_stream {
            stream.queue_end();
        }
        self.flush_stream(stream_id);
        self.settle();
        Ok(())
    }

    /// Queue trailing headers; they end our side of the stream.
    pub fn send_trailers(&mut self, stream_id: u32, headers: Headers, now: Instant) -> Result<(), Error> {
        self.ensure_open()?;
        self.advance_clock(now);
        headers.validate(BlockKind::Trailers)?;
        let stream = self.writable_stream(stream_id)?;
        stream.outbound.push_back(Outbound::Trailers(headers));
        stream.queue_end();
        self.flush_stream(stream_id);
        self.settle();
        Ok(())
    }

    /// Abort a stream. Resetting an already closed stream is a no-op.
    pub fn reset_stream(&mut self, stream_id: u32, status: StatusCode) -> Result<(), Error> {
        self.ensure_open()?;
        match self.table.status(stream_id, self.frames_received) {
            IdStatus::Active => {
                self.reset_local(stream_id, status);
                self.settle();
                Ok(())
            }
            IdStatus::Idle => Err(Error::UnknownStream(stream_id)),
            IdStatus::RecentlyClosed { .. } | IdStatus::Closed => Ok(()),
        }
    }

    /// Send a PING. The returned token comes back in
    /// [`Event::PingAcknowledged`] or [`Event::PingTimeout`].
    pub fn ping(&mut self, now: Instant) -> Result<u32, Error> {
        self.ensure_open()?;
        self.advance_clock(now);
        let (id, frame) = self.pings.ping(self.now);
        self.write_frame(frame);
        Ok(id)
    }

    /// Close the connection. Graceful: GOAWAY now, `Closed` once in-flight
    /// streams finish or `close_timeout` runs out. Otherwise every stream is
    /// reset and the connection closes at once.
    pub fn close(&mut self, graceful: bool, now: Instant) {
        if self.state == ConnState::Closed {
            return;
        }
        self.advance_clock(now);
        if graceful {
            self.send_goaway(GoAwayStatus::Ok);
            self.begin_drain(CloseReason::Graceful);
            self.settle();
        } else {
            self.teardown(CloseReason::Aborted, Some(GoAwayStatus::Ok), StatusCode::Cancel, true);
        }
    }

    /// The transport is gone. Streams still open are reset; nothing more is
    /// written.
    pub fn transport_closed(&mut self) {
        self.teardown(CloseReason::TransportClosed, None, StatusCode::Cancel, false);
        self.send_buf.clear();
    }

    /// Advance the clock and fire whatever timers are due.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.advance_clock(now);
        if self.state == ConnState::Closed {
            return;
        }
        let now = self.now;

        for id in self.pings.poll_timeouts(now) {
            tracing::warn!(ping_id = id, "ping timed out");
            self.events.push_back(Event::PingTimeout { id });
        }

        if let Some(idle) = self.config.idle_timeout {
            if now >= self.last_recv + idle {
                tracing::warn!(?idle, "connection idle timeout");
                self.teardown(CloseReason::IdleTimeout, Some(GoAwayStatus::Ok), StatusCode::Cancel, false);
                return;
            }
        }

        if self.state == ConnState::Draining && self.drain_deadline.is_some_and(|d| now >= d) {
            let reason = self.drain_reason.take().unwrap_or(CloseReason::Graceful);
            tracing::debug!(remaining = self.table.len(), "drain deadline reached");
            self.teardown(reason, None, StatusCode::Cancel, true);
            return;
        }

        if let Some(timeout) = self.config.stream_idle_timeout {
            let expired: Vec<u32> = self
                .table
                .iter()
                .filter(|s| !s.is_closed() && s.idle_deadline(timeout) <= now)
                .map(|s| s.id())
                .collect();
            for stream_id in expired {
                tracing::debug!(stream_id, "stream idle timeout");
                self.reset_local(stream_id, StatusCode::Cancel);
            }
        }

        self.settle();
    }

    /// The clock never runs backwards, whatever the caller passes.
    fn advance_clock(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Earliest instant at which [`Connection::handle_timeout`] has work.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.state == ConnState::Closed {
            return None;
        }
        let stream_deadline = self.config.stream_idle_timeout.and_then(|timeout| {
            self.table
                .iter()
                .filter(|s| !s.is_closed())
                .map(|s| s.idle_deadline(timeout))
                .min()
        });
        [
            self.pings.next_deadline(),
            self.config.idle_timeout.map(|t| self.last_recv + t),
            self.drain_deadline.filter(|_| self.state == ConnState::Draining),
            stream_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ---- Frame handling ----

    fn handle_frame(&mut self, frame: Frame) -> Result<(), Error> {
        tracing::trace!(kind = frame.kind(), stream_id = frame.stream_id(), "frame received");
        match frame {
            Frame::SynStream {
                stream_id,
                associated_stream_id,
                priority,
                fin,
                headers,
                ..
            } => self.on_syn_stream(stream_id, associated_stream_id, priority, fin, headers),
            Frame::SynReply {
                stream_id,
                fin,
                headers,
            } => self.on_syn_reply(stream_id, fin, headers),
            Frame::Headers {
                stream_id,
                fin,
                headers,
            } => self.on_headers(stream_id, fin, headers),
            Frame::Data {
                stream_id,
                fin,
                data,
            } => self.on_data(stream_id, fin, data),
            Frame::RstStream { stream_id, status } => {
                self.on_rst_stream(stream_id, status);
                Ok(())
            }
            Frame::Settings { settings, .. } => {
                self.on_settings(settings);
                Ok(())
            }
            Frame::Ping { id } => {
                self.on_ping(id);
                Ok(())
            }
            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                self.on_goaway(last_good_stream_id, status);
                Ok(())
            }
            Frame::WindowUpdate { stream_id, delta } => self.on_window_update(stream_id, delta),
        }
    }

    fn on_syn_stream(
        &mut self,
        stream_id: u32,
        associated: u32,
        priority: u8,
        fin: bool,
        headers: Headers,
    ) -> Result<(), Error> {
        self.table.accept_remote_id(stream_id)?;

        if self.goaway_sent.is_some() {
            self.refuse(stream_id, StatusCode::RefusedStream);
            return Ok(());
        }
        if associated != 0 {
            match self
                .push
                .check_incoming(&self.table, self.config.enable_push, stream_id, associated)
            {
                Ok(()) => {}
                Err(PushRejection::Fatal(e)) => return Err(e),
                Err(PushRejection::Refuse(status)) => {
                    self.refuse(stream_id, status);
                    return Ok(());
                }
            }
        } else if self.role == Role::Client {
            // Servers only open streams as pushes.
            self.refuse(stream_id, StatusCode::ProtocolError);
            return Ok(());
        } else if self.table.active_count(false) >= self.config.max_concurrent_streams as usize {
            self.refuse(stream_id, StatusCode::RefusedStream);
            return Ok(());
        }
        if let Err(e) = headers.validate(BlockKind::Initial) {
            tracing::debug!(stream_id, error = %e, "rejecting stream headers");
            self.refuse(stream_id, StatusCode::ProtocolError);
            return Ok(());
        }

        let mut stream = Stream::new(stream_id, priority, self.flow.stream_windows(), self.now);
        if associated != 0 {
            stream.reserve_remote(associated, fin);
        } else {
            stream.open_remote(fin);
        }
        let priority = stream.priority();
        self.table.insert(stream);

        tracing::debug!(stream_id, associated, "peer opened stream");
        self.events.push_back(Event::StreamOpened {
            stream_id,
            headers,
            priority,
            end_stream: fin,
            associated_stream_id: (associated != 0).then_some(associated),
        });
        if fin {
            self.events.push_back(Event::End { stream_id });
        }
        Ok(())
    }

    fn on_syn_reply(&mut self, stream_id: u32, fin: bool, headers: Headers) -> Result<(), Error> {
        let now = self.now;
        let Some(stream) = self.table.get_mut(stream_id) else {
            return self.late_frame(stream_id, "SYN_REPLY");
        };
        stream.touch(now);
        let result = if !self.role.is_local_id(stream_id) || stream.is_push() {
            Err(StatusCode::ProtocolError)
        } else if headers.validate(BlockKind::Initial).is_err() {
            Err(StatusCode::ProtocolError)
        } else {
            stream.on_reply(fin)
        };
        if let Err(status) = result {
            self.reset_local(stream_id, status);
            return Ok(());
        }

        self.events.push_back(Event::Response {
            stream_id,
            headers,
            end_stream: fin,
        });
        if fin {
            self.events.push_back(Event::End { stream_id });
        }
        Ok(())
    }

    fn on_headers(&mut self, stream_id: u32, fin: bool, headers: Headers) -> Result<(), Error> {
        let now = self.now;
        let Some(stream) = self.table.get_mut(stream_id) else {
            return self.late_frame(stream_id, "HEADERS");
        };
        stream.touch(now);
        let result = match headers.validate(BlockKind::Trailers) {
            Ok(()) => stream.on_headers(fin),
            Err(_) => Err(StatusCode::ProtocolError),
        };
        if let Err(status) = result {
            self.reset_local(stream_id, status);
            return Ok(());
        }

        if !headers.is_empty() {
            self.events.push_back(Event::Trailers { stream_id, headers });
        }
        if fin {
            self.events.push_back(Event::End { stream_id });
        }
        Ok(())
    }

    fn on_data(&mut self, stream_id: u32, fin: bool, data: Vec<u8>) -> Result<(), Error> {
        let n = data.len() as u32;
        let now = self.now;
        let Some(stream) = self.table.get_mut(stream_id) else {
            if let Some(update) = self.flow.discard(n) {
                self.write_frame(update);
            }
            return self.late_frame(stream_id, "DATA");
        };
        stream.touch(now);

        if let Err(violation) = self.flow.consume(&mut stream.windows, n) {
            tracing::debug!(stream_id, %violation, "inbound data overran window");
            if let Some(update) = self.flow.discard(n) {
                self.write_frame(update);
            }
            self.reset_local(stream_id, StatusCode::FlowControlError);
            return Ok(());
        }
        if let Err(status) = stream.on_data(fin) {
            self.release_connection_credit(stream_id, n);
            self.reset_local(stream_id, status);
            return Ok(());
        }
        if !data.is_empty() {
            self.events.push_back(Event::Data { stream_id, data });
        }
        if fin {
            self.events.push_back(Event::End { stream_id });
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, stream_id: u32, status: StatusCode) {
        let Some(stream) = self.table.get_mut(stream_id) else {
            tracing::trace!(stream_id, ?status, "RST_STREAM for inactive stream");
            return;
        };
        if stream.reset() {
            tracing::debug!(stream_id, ?status, "stream reset by peer");
            let freed = self.drop_buffered_events(stream_id);
            self.release_connection_credit(stream_id, freed);
            self.events.push_back(Event::Reset {
                stream_id,
                status,
                remote: true,
            });
        }
        self.table.remove(stream_id, self.frames_received);
    }

    fn on_settings(&mut self, settings: Vec<Setting>) {
        for setting in settings {
            match setting.id {
                settings_id::INITIAL_WINDOW_SIZE => {
                    let delta = self.flow.set_initial_send_window(setting.value);
                    if delta != 0 {
                        for stream in self.table.iter_mut().filter(|s| !s.is_closed()) {
                            stream.windows.send.adjust(delta);
                        }
                    }
                }
                settings_id::MAX_CONCURRENT_STREAMS => {
                    self.peer_max_concurrent = Some(setting.value);
                }
                id => tracing::trace!(id, value = setting.value, "ignoring setting"),
            }
        }
        self.flush_all();
    }

    fn on_ping(&mut self, id: u32) {
        match self.pings.on_ping(id, self.now) {
            PingAction::Echo(frame) => self.write_frame(frame),
            PingAction::Acknowledged { id, rtt } => {
                self.events.push_back(Event::PingAcknowledged { id, rtt });
            }
            PingAction::Unmatched { id } => tracing::warn!(ping_id = id, "unmatched ping reply"),
        }
    }

    fn on_goaway(&mut self, last_good: u32, status: GoAwayStatus) {
        tracing::debug!(last_good, ?status, "peer sent GOAWAY");
        self.goaway_received = Some(last_good);
        self.events.push_back(Event::GoAway {
            last_stream_id: last_good,
            status,
        });

        // Our streams above `last_good` were never processed.
        let refused: Vec<u32> = self
            .table
            .iter()
            .filter(|s| self.role.is_local_id(s.id()) && s.id() > last_good)
            .map(|s| s.id())
            .collect();
        for stream_id in refused {
            let was_open = self.table.get_mut(stream_id).is_some_and(|s| s.reset());
            if was_open {
                let freed = self.drop_buffered_events(stream_id);
                self.release_connection_credit(stream_id, freed);
                self.events.push_back(Event::Reset {
                    stream_id,
                    status: StatusCode::RefusedStream,
                    remote: true,
                });
            }
            self.table.remove(stream_id, self.frames_received);
        }

        self.begin_drain(CloseReason::GoAway(status));
    }

    fn on_window_update(&mut self, stream_id: u32, delta: u32) -> Result<(), Error> {
        if stream_id == 0 {
            self.flow
                .credit_connection(delta)
                .map_err(|v| Error::protocol(format!("connection window overflow: {v}")))?;
            self.flush_all();
            return Ok(());
        }
        let Some(stream) = self.table.get_mut(stream_id) else {
            tracing::trace!(stream_id, "WINDOW_UPDATE for inactive stream");
            return Ok(());
        };
        if let Err(violation) = self.flow.credit_stream(&mut stream.windows, delta) {
            tracing::debug!(stream_id, %violation, "stream window overflow");
            self.reset_local(stream_id, StatusCode::FlowControlError);
            return Ok(());
        }
        self.flush_stream(stream_id);
        Ok(())
    }

    /// A stream frame for an id with no live stream: tolerated shortly after
    /// the stream closed, fatal otherwise.
    fn late_frame(&self, stream_id: u32, kind: &'static str) -> Result<(), Error> {
        match self.table.status(stream_id, self.frames_received) {
            IdStatus::RecentlyClosed { age } if age <= self.config.closed_stream_grace_frames => {
                tracing::trace!(stream_id, kind, age, "ignoring frame for closed stream");
                Ok(())
            }
            IdStatus::Idle => Err(Error::protocol(format!("{kind} on idle stream {stream_id}"))),
            _ => Err(Error::protocol(format!("{kind} on closed stream {stream_id}"))),
        }
    }

    // ---- Output ----

    fn write_frame(&mut self, frame: Frame) {
        tracing::trace!(kind = frame.kind(), stream_id = frame.stream_id(), "frame sent");
        if let Err(e) = FrameCodec::encode(&frame, &mut self.compression, &mut self.send_buf) {
            self.fail(GoAwayStatus::InternalError, e.to_string());
        }
    }

    fn flush_stream(&mut self, stream_id: u32) {
        if let Err(e) = self.try_flush_stream(stream_id) {
            self.fail(GoAwayStatus::InternalError, e.to_string());
        }
    }

    /// Move as much of a stream's queued output onto the wire as the send
    /// windows allow.
    fn try_flush_stream(&mut self, stream_id: u32) -> Result<(), FrameError> {
        let Self {
            table,
            flow,
            compression,
            send_buf,
            now,
            ..
        } = self;
        let Some(stream) = table.get_mut(stream_id) else {
            return Ok(());
        };

        while let Some(item) = stream.outbound.pop_front() {
            let frame = match item {
                Outbound::Data { data, sent, fin } => {
                    let remaining = data.len() - sent;
                    let allowed = if remaining == 0 {
                        0
                    } else {
                        flow.reserve(&mut stream.windows, remaining)
                    };
                    if remaining > 0 && allowed == 0 {
                        stream.outbound.push_front(Outbound::Data { data, sent, fin });
                        break;
                    }
                    let chunk = data[sent..sent + allowed].to_vec();
                    let done = sent + allowed == data.len();
                    if !done {
                        stream.outbound.push_front(Outbound::Data {
                            data,
                            sent: sent + allowed,
                            fin,
                        });
                    }
                    Frame::Data {
                        stream_id,
                        fin: fin && done,
                        data: chunk,
                    }
                }
                Outbound::Trailers(headers) => Frame::Headers {
                    stream_id,
                    fin: true,
                    headers,
                },
            };
            let fin = matches!(
                frame,
                Frame::Data { fin: true, .. } | Frame::Headers { fin: true, .. }
            );
            stream.on_frame_sent(fin);
            stream.touch(*now);
            tracing::trace!(kind = frame.kind(), stream_id, fin, "frame sent");
            FrameCodec::encode(&frame, compression, send_buf)?;
        }
        Ok(())
    }

    fn flush_all(&mut self) {
        for stream_id in self.table.pending_write_ids() {
            if self.flow.connection_send_window() <= 0 {
                break;
            }
            self.flush_stream(stream_id);
        }
    }

    fn release_connection_credit(&mut self, stream_id: u32, n: u32) {
        for frame in self.flow.replenish(stream_id, None, n) {
            self.write_frame(frame);
        }
    }

    // ---- Teardown ----

    /// Remove a stream's undelivered body events. Returns the DATA bytes
    /// dropped.
    fn drop_buffered_events(&mut self, id: u32) -> u32 {
        let mut freed = 0u32;
        self.events.retain(|event| match event {
            Event::Data { stream_id, data } if *stream_id == id => {
                freed += data.len() as u32;
                false
            }
            Event::Trailers { stream_id, .. } | Event::End { stream_id } if *stream_id == id => false,
            _ => true,
        });
        freed
    }

    fn reset_local(&mut self, stream_id: u32, status: StatusCode) {
        let was_open = match self.table.get_mut(stream_id) {
            Some(stream) => stream.reset(),
            None => return,
        };
        if was_open {
            tracing::debug!(stream_id, ?status, "resetting stream");
            let freed = self.drop_buffered_events(stream_id);
            self.release_connection_credit(stream_id, freed);
            self.write_frame(Frame::RstStream { stream_id, status });
            self.events.push_back(Event::Reset {
                stream_id,
                status,
                remote: false,
            });
        }
        self.table.remove(stream_id, self.frames_received);
    }

    fn refuse(&mut self, stream_id: u32, status: StatusCode) {
        tracing::debug!(stream_id, ?status, "refusing stream");
        self.write_frame(Frame::RstStream { stream_id, status });
        self.table.remember_closed(stream_id, self.frames_received);
    }

    fn send_goaway(&mut self, status: GoAwayStatus) {
        if self.goaway_sent.is_some() {
            return;
        }
        let last_good = self.table.highest_remote_id();
        tracing::debug!(last_good, ?status, "sending GOAWAY");
        self.write_frame(Frame::GoAway {
            last_good_stream_id: last_good,
            status,
        });
        self.goaway_sent = Some(last_good);
    }

    fn begin_drain(&mut self, reason: CloseReason) {
        if self.state == ConnState::Open {
            self.state = ConnState::Draining;
            self.drain_deadline = Some(self.now + self.config.close_timeout);
            self.drain_reason = Some(reason);
        }
    }

    /// Reap finished streams and finish a drain once nothing is left.
    fn settle(&mut self) {
        let reaped = self.table.reap(self.frames_received);
        if !reaped.is_empty() {
            tracing::trace!(?reaped, "streams reaped");
        }
        if self.state == ConnState::Draining && self.table.is_empty() {
            let reason = self.drain_reason.take().unwrap_or(CloseReason::Graceful);
            tracing::debug!(?reason, "connection drained");
            self.state = ConnState::Closed;
            self.codec.reset();
            self.events.push_back(Event::Closed { reason });
        }
    }

    fn fail(&mut self, status: GoAwayStatus, reason: String) {
        tracing::warn!(?status, %reason, "connection error");
        self.teardown(
            CloseReason::Error { status, reason },
            Some(status),
            StatusCode::Cancel,
            false,
        );
    }

    /// Close now. Open streams are reset (on the wire too if `notify_peer`)
    /// and lose their undelivered body events.
    fn teardown(
        &mut self,
        reason: CloseReason,
        goaway: Option<GoAwayStatus>,
        status: StatusCode,
        notify_peer: bool,
    ) {
        if self.state == ConnState::Closed {
            return;
        }
        for stream_id in self.table.ids() {
            let was_open = self.table.get_mut(stream_id).is_some_and(|s| s.reset());
            if was_open {
                self.drop_buffered_events(stream_id);
                if notify_peer {
                    self.write_frame(Frame::RstStream { stream_id, status });
                }
                self.events.push_back(Event::Reset {
                    stream_id,
                    status,
                    remote: false,
                });
            }
            self.table.remove(stream_id, self.frames_received);
        }

        if let Some(goaway_status) = goaway {
            if self.goaway_sent.is_none() || goaway_status != GoAwayStatus::Ok {
                let last_good = self.table.highest_remote_id();
                self.write_frame(Frame::GoAway {
                    last_good_stream_id: last_good,
                    status: goaway_status,
                });
                self.goaway_sent = Some(last_good);
            }
        }

        tracing::debug!(?reason, "connection closed");
        self.state = ConnState::Closed;
        self.drain_deadline = None;
        self.codec.reset();
        self.events.push_back(Event::Closed { reason });
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            ConnState::Closed => Err(Error::ConnectionClosed),
            _ => Ok(()),
        }
    }

    fn ensure_accepting(&self) -> Result<(), Error> {
        self.ensure_open()?;
        if self.goaway_sent.is_some() || self.goaway_received.is_some() {
            return Err(Error::Refused("connection is going away"));
        }
        Ok(())
    }

    fn writable_stream(&mut self, stream_id: u32) -> Result<&mut Stream, Error> {
        let stream = self
            .table
            .get_mut(stream_id)
            .ok_or(Error::UnknownStream(stream_id))?;
        if stream.awaiting_local_reply() {
            return Err(Error::InvalidState("reply before sending data"));
        }
        if !stream.can_send() {
            return Err(Error::InvalidState("stream is closed for writing"));
        }
        Ok(stream)
    }
}
