//! Connection tunables.

use std::time::Duration;

/// Default initial flow-control window for streams and the connection
/// (SPDY/3.1 Section 2.6.8).
pub const DEFAULT_WINDOW_SIZE: u32 = 64 * 1024;

/// Largest value a flow-control window may reach.
pub const MAX_WINDOW_SIZE: i64 = 0x7fff_ffff;

/// Largest payload the 24-bit length field can describe.
pub const MAX_FRAME_LEN: usize = 0x00ff_ffff;

/// Which end of the connection we are. Decides stream and ping id parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// First stream id this side allocates (clients odd, servers even).
    pub fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `id` was (or would be) allocated by this side.
    pub fn is_local_id(self, id: u32) -> bool {
        match self {
            Role::Client => id % 2 == 1,
            Role::Server => id % 2 == 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Receive window advertised for every stream via SETTINGS.
    pub initial_window_size: u32,
    /// Connection-level receive window. Values above the protocol default are
    /// announced with a WINDOW_UPDATE on stream 0 at start.
    pub connection_window: u32,
    /// Accumulated replenishment, in bytes, before a WINDOW_UPDATE is sent.
    /// Clamped to the window it applies to.
    pub window_update_threshold: u32,
    /// Largest DATA payload this side writes.
    pub max_data_frame_len: usize,
    /// Largest inbound frame payload accepted before the connection is torn
    /// down.
    pub max_frame_len: usize,
    /// Peer streams allowed open at once; advertised via SETTINGS.
    pub max_concurrent_streams: u32,
    /// Accept server push (client side only).
    pub enable_push: bool,
    /// Received frames during which data/headers for a just-closed stream are
    /// still tolerated.
    pub closed_stream_grace_frames: u64,
    /// How many recently closed stream ids to remember.
    pub closed_stream_memory: usize,
    /// Outstanding ping deadline.
    pub ping_timeout: Duration,
    /// Reset a stream after this long without a frame in either direction.
    pub stream_idle_timeout: Option<Duration>,
    /// Tear down the connection after this long without receiving a frame.
    pub idle_timeout: Option<Duration>,
    /// Grace period for in-flight streams after a graceful close.
    pub close_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_window_size: DEFAULT_WINDOW_SIZE,
            connection_window: DEFAULT_WINDOW_SIZE,
            window_update_threshold: DEFAULT_WINDOW_SIZE / 2,
            max_data_frame_len: 16 * 1024,
            max_frame_len: MAX_FRAME_LEN,
            max_concurrent_streams: 100,
            enable_push: true,
            closed_stream_grace_frames: 128,
            closed_stream_memory: 256,
            ping_timeout: Duration::from_secs(30),
            stream_idle_timeout: None,
            idle_timeout: None,
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn client() -> Self {
        Self::default()
    }

    /// Servers never receive pushes.
    pub fn server() -> Self {
        Self {
            enable_push: false,
            ..Self::default()
        }
    }

    pub fn with_initial_window_size(mut self, size: u32) -> Self {
        self.initial_window_size = size;
        self
    }

    pub fn with_connection_window(mut self, size: u32) -> Self {
        self.connection_window = size;
        self
    }

    pub fn with_window_update_threshold(mut self, threshold: u32) -> Self {
        self.window_update_threshold = threshold;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = Some(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    pub fn with_enable_push(mut self, enable: bool) -> Self {
        self.enable_push = enable;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_max_data_frame_len(mut self, len: usize) -> Self {
        self.max_data_frame_len = len;
        self
    }

    /// Bring out-of-range values back to something the protocol can carry.
    pub(crate) fn normalized(mut self) -> Self {
        let window_cap = MAX_WINDOW_SIZE as u32;
        self.initial_window_size = self.initial_window_size.clamp(1, window_cap);
        self.connection_window = self
            .connection_window
            .clamp(DEFAULT_WINDOW_SIZE, window_cap);
        self.window_update_threshold = self
            .window_update_threshold
            .clamp(1, self.initial_window_size.min(self.connection_window));
        self.max_data_frame_len = self.max_data_frame_len.clamp(1, MAX_FRAME_LEN);
        self.max_frame_len = self.max_frame_len.clamp(8, MAX_FRAME_LEN);
        self
    }
}
