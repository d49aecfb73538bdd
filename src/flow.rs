//! Flow-control windows (SPDY/3.1 Section 2.6.8).
//!
//! Each stream has a send window (credit the peer granted us) and a receive
//! window (credit we granted the peer); the connection has one of each too.
//! Inbound data must fit both receive windows. Credit is handed back with
//! WINDOW_UPDATE once enough consumed data has been passed on to the
//! application, coalesced so the peer does not get one update per frame.

use crate::config::{Config, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::error::FlowViolation;
use crate::frame::Frame;

/// One credit counter. Signed because a SETTINGS change to the initial
/// window can push an open stream's send window below zero.
#[derive(Debug, Clone)]
pub struct Window {
    window: i64,
}

impl Window {
    pub fn new(initial: i64) -> Self {
        Self { window: initial }
    }

    pub fn available(&self) -> i64 {
        self.window
    }

    /// Take `amount` bytes of credit. Fails, leaving the window unchanged,
    /// if that would go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), FlowViolation> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(FlowViolation {
                requested: amount,
                available: self.window,
            });
        }
        self.window = new;
        Ok(())
    }

    /// Add credit from a WINDOW_UPDATE. Fails if the window would exceed
    /// 2^31 - 1.
    pub fn increase(&mut self, increment: u32) -> Result<(), FlowViolation> {
        let new = self.window + i64::from(increment);
        if new > MAX_WINDOW_SIZE {
            return Err(FlowViolation {
                requested: increment,
                available: MAX_WINDOW_SIZE - self.window,
            });
        }
        self.window = new;
        Ok(())
    }

    /// Shift the window after the initial window size changed.
    pub fn adjust(&mut self, delta: i64) {
        self.window = (self.window + delta).min(MAX_WINDOW_SIZE);
    }

    fn charge(&mut self, amount: u32) {
        self.window -= i64::from(amount);
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new(i64::from(DEFAULT_WINDOW_SIZE))
    }
}

/// The windows owned by one stream.
#[derive(Debug, Clone)]
pub struct StreamWindows {
    pub send: Window,
    pub recv: Window,
    pending_update: u32,
}

/// Connection-level windows plus the policy for per-stream ones.
#[derive(Debug)]
pub struct FlowController {
    conn_send: Window,
    conn_recv: Window,
    conn_pending_update: u32,
    /// Peer's INITIAL_WINDOW_SIZE: starting send window for new streams.
    initial_send: i64,
    /// Our INITIAL_WINDOW_SIZE: starting receive window for new streams.
    initial_recv: i64,
    threshold: u32,
    max_chunk: usize,
}

impl FlowController {
    pub fn new(config: &Config) -> Self {
        Self {
            conn_send: Window::default(),
            conn_recv: Window::new(i64::from(config.connection_window)),
            conn_pending_update: 0,
            initial_send: i64::from(DEFAULT_WINDOW_SIZE),
            initial_recv: i64::from(config.initial_window_size),
            threshold: config.window_update_threshold,
            max_chunk: config.max_data_frame_len,
        }
    }

    /// Windows for a newly created stream.
    pub fn stream_windows(&self) -> StreamWindows {
        StreamWindows {
            send: Window::new(self.initial_send),
            recv: Window::new(self.initial_recv),
            pending_update: 0,
        }
    }

    pub fn connection_send_window(&self) -> i64 {
        self.conn_send.available()
    }

    pub fn connection_recv_window(&self) -> i64 {
        self.conn_recv.available()
    }

    /// Account for `n` inbound bytes on `stream`. Both windows must cover
    /// them; otherwise nothing changes and the stream must be reset.
    pub fn consume(&mut self, stream: &mut StreamWindows, n: u32) -> Result<(), FlowViolation> {
        if n == 0 {
            return Ok(());
        }
        if i64::from(n) > self.conn_recv.available() {
            return Err(FlowViolation {
                requested: n,
                available: self.conn_recv.available(),
            });
        }
        stream.recv.consume(n)?;
        self.conn_recv.charge(n);
        Ok(())
    }

    /// Account for `n` inbound bytes that were dropped without reaching a
    /// stream (overrun, closed stream). The peer already charged them to the
    /// connection window, so they are charged here too and handed straight
    /// back.
    pub fn discard(&mut self, n: u32) -> Option<Frame> {
        if n == 0 {
            return None;
        }
        self.conn_recv.charge(n);
        self.replenish_connection(n)
    }

    /// Hand `n` consumed bytes back. `stream` is `None` when the stream is
    /// gone or its remote side has finished, in which case only the
    /// connection window is refilled. Returns the WINDOW_UPDATE frames due.
    pub fn replenish(
        &mut self,
        stream_id: u32,
        stream: Option<&mut StreamWindows>,
        n: u32,
    ) -> Vec<Frame> {
        let mut frames = Vec::new();
        if n == 0 {
            return frames;
        }
        if let Some(update) = self.replenish_connection(n) {
            frames.push(update);
        }
        if let Some(stream) = stream {
            stream.pending_update = stream.pending_update.saturating_add(n);
            if stream.pending_update >= self.threshold {
                let delta = std::mem::take(&mut stream.pending_update);
                if stream.recv.increase(delta).is_ok() {
                    frames.push(Frame::WindowUpdate { stream_id, delta });
                }
            }
        }
        frames
    }

    fn replenish_connection(&mut self, n: u32) -> Option<Frame> {
        self.conn_pending_update = self.conn_pending_update.saturating_add(n);
        if self.conn_pending_update < self.threshold {
            return None;
        }
        let delta = std::mem::take(&mut self.conn_pending_update);
        self.conn_recv.increase(delta).ok()?;
        Some(Frame::WindowUpdate { stream_id: 0, delta })
    }

    /// Claim send credit for up to `n` bytes on `stream`. Returns how many
    /// bytes may go out now: the smaller of both send windows and the data
    /// frame size limit. Zero means the write has to wait for an update.
    pub fn reserve(&mut self, stream: &mut StreamWindows, n: usize) -> usize {
        let credit = stream
            .send
            .available()
            .min(self.conn_send.available())
            .max(0) as usize;
        let allowed = n.min(credit).min(self.max_chunk);
        if allowed > 0 {
            stream.send.charge(allowed as u32);
            self.conn_send.charge(allowed as u32);
        }
        allowed
    }

    /// WINDOW_UPDATE on stream 0.
    pub fn credit_connection(&mut self, delta: u32) -> Result<(), FlowViolation> {
        self.conn_send.increase(delta)
    }

    /// WINDOW_UPDATE on a stream.
    pub fn credit_stream(&self, stream: &mut StreamWindows, delta: u32) -> Result<(), FlowViolation> {
        stream.send.increase(delta)
    }

    /// The peer changed INITIAL_WINDOW_SIZE. Returns the delta every open
    /// stream's send window has to be shifted by.
    pub fn set_initial_send_window(&mut self, size: u32) -> i64 {
        let new = i64::from(size).min(MAX_WINDOW_SIZE);
        let delta = new - self.initial_send;
        self.initial_send = new;
        delta
    }

    /// Extra connection credit to announce at start-up, if our connection
    /// window is larger than the protocol default.
    pub fn initial_connection_update(&self) -> Option<Frame> {
        let extra = self.conn_recv.available() - i64::from(DEFAULT_WINDOW_SIZE);
        (extra > 0).then(|| Frame::WindowUpdate {
            stream_id: 0,
            delta: extra as u32,
        })
    }
}
