//! SPDY/3.1 frame codec.
//!
//! Every frame starts with an 8-byte header. The first bit tells control
//! frames from data frames:
//!
//! ```text
//! control: |1| version (15) | type (16) | flags (8) | length (24) |
//! data:    |0| stream id (31)           | flags (8) | length (24) |
//! ```
//!
//! Decoding is incremental: [`FrameCodec::feed`] accepts arbitrary fragments
//! of the byte stream and [`FrameCodec::decode`] yields one frame at a time
//! once all of its bytes are buffered. Header blocks are run through the
//! connection's [`CompressionContext`] as part of encode/decode.

use crate::compression::CompressionContext;
use crate::config::MAX_FRAME_LEN;
use crate::error::{FrameError, GoAwayStatus, StatusCode};
use crate::headers::Headers;

/// Protocol version carried in every control frame.
pub const SPDY_VERSION: u16 = 3;

/// Size of the common frame header.
pub const FRAME_HEADER_LEN: usize = 8;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Control frame types (SPDY/3.1 Section 2.6).
pub mod frame_type {
    pub const SYN_STREAM: u16 = 1;
    pub const SYN_REPLY: u16 = 2;
    pub const RST_STREAM: u16 = 3;
    pub const SETTINGS: u16 = 4;
    /// Removed in SPDY/3; skipped when seen.
    pub const NOOP: u16 = 5;
    pub const PING: u16 = 6;
    pub const GOAWAY: u16 = 7;
    pub const HEADERS: u16 = 8;
    pub const WINDOW_UPDATE: u16 = 9;
    /// Client certificates are not supported; skipped when seen.
    pub const CREDENTIAL: u16 = 10;
}

/// Frame flags.
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const UNIDIRECTIONAL: u8 = 0x02;
    pub const SETTINGS_CLEAR: u8 = 0x01;
}

/// SETTINGS identifiers (SPDY/3.1 Section 2.6.4).
pub mod settings_id {
    pub const UPLOAD_BANDWIDTH: u32 = 1;
    pub const DOWNLOAD_BANDWIDTH: u32 = 2;
    pub const ROUND_TRIP_TIME: u32 = 3;
    pub const MAX_CONCURRENT_STREAMS: u32 = 4;
    pub const CURRENT_CWND: u32 = 5;
    pub const DOWNLOAD_RETRANS_RATE: u32 = 6;
    pub const INITIAL_WINDOW_SIZE: u32 = 7;
    pub const CLIENT_CERTIFICATE_VECTOR_SIZE: u32 = 8;
}

/// A parsed 8-byte frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub control: bool,
    /// Control frames only.
    pub version: u16,
    /// Control frames only.
    pub frame_type: u16,
    /// Data frames only; control frames carry the id in their payload.
    pub stream_id: u32,
    pub flags: u8,
    pub length: u32,
}

impl FrameHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let control = data[0] & 0x80 != 0;
        let flags = data[4];
        let length = ((data[5] as u32) << 16) | ((data[6] as u32) << 8) | (data[7] as u32);
        if control {
            Some(Self {
                control,
                version: u16::from_be_bytes([data[0] & 0x7f, data[1]]),
                frame_type: u16::from_be_bytes([data[2], data[3]]),
                stream_id: 0,
                flags,
                length,
            })
        } else {
            Some(Self {
                control,
                version: 0,
                frame_type: 0,
                stream_id: read_u31(&data[0..4]),
                flags,
                length,
            })
        }
    }

    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }
}

/// One SETTINGS entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub flags: u8,
    /// 24-bit identifier, see [`settings_id`].
    pub id: u32,
    pub value: u32,
}

impl Setting {
    pub fn new(id: u32, value: u32) -> Self {
        Self { flags: 0, id, value }
    }
}

/// A logical frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opens a stream. A non-zero `associated_stream_id` makes it a push.
    SynStream {
        stream_id: u32,
        associated_stream_id: u32,
        priority: u8,
        unidirectional: bool,
        fin: bool,
        headers: Headers,
    },
    SynReply {
        stream_id: u32,
        fin: bool,
        headers: Headers,
    },
    RstStream {
        stream_id: u32,
        status: StatusCode,
    },
    Settings {
        clear: bool,
        settings: Vec<Setting>,
    },
    Ping {
        id: u32,
    },
    GoAway {
        last_good_stream_id: u32,
        status: GoAwayStatus,
    },
    /// Additional headers after the reply; trailers once the body started.
    Headers {
        stream_id: u32,
        fin: bool,
        headers: Headers,
    },
    WindowUpdate {
        stream_id: u32,
        delta: u32,
    },
    Data {
        stream_id: u32,
        fin: bool,
        data: Vec<u8>,
    },
}

impl Frame {
    /// Stream the frame belongs to; 0 for connection-level frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::SynStream { stream_id, .. }
            | Frame::SynReply { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Data { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::SynStream { .. } => "SYN_STREAM",
            Frame::SynReply { .. } => "SYN_REPLY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::Headers { .. } => "HEADERS",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Data { .. } => "DATA",
        }
    }
}

/// Outcome of one [`FrameCodec::decode`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    NeedMoreBytes,
}

/// Incremental frame decoder and stateless encoder.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Append a fragment of the inbound byte stream.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame from the buffer.
    pub fn decode(&mut self, ctx: &mut CompressionContext) -> Result<Decoded, FrameError> {
        loop {
            let header = match FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => return Ok(Decoded::NeedMoreBytes),
            };
            if header.length as usize > self.max_frame_len {
                return Err(FrameError::FrameTooLarge {
                    len: header.length as usize,
                    max: self.max_frame_len,
                });
            }
            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                return Ok(Decoded::NeedMoreBytes);
            }

            let remainder = self.buffer.split_off(total_size);
            let mut payload = std::mem::replace(&mut self.buffer, remainder);
            payload.drain(..FRAME_HEADER_LEN);

            if let Some(frame) = Self::parse_frame(&header, payload, ctx)? {
                return Ok(Decoded::Frame(frame));
            }
        }
    }

    /// Feed `data` and decode every complete frame it finishes.
    pub fn process(
        &mut self,
        data: &[u8],
        ctx: &mut CompressionContext,
    ) -> Result<Vec<Frame>, FrameError> {
        self.feed(data);
        let mut frames = Vec::new();
        while let Decoded::Frame(frame) = self.decode(ctx)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn parse_frame(
        header: &FrameHeader,
        payload: Vec<u8>,
        ctx: &mut CompressionContext,
    ) -> Result<Option<Frame>, FrameError> {
        if !header.control {
            if header.stream_id == 0 {
                return Err(FrameError::Malformed("DATA"));
            }
            return Ok(Some(Frame::Data {
                stream_id: header.stream_id,
                fin: header.is_fin(),
                data: payload,
            }));
        }

        if header.version != SPDY_VERSION {
            return Err(FrameError::UnsupportedVersion(header.version));
        }

        let fin = header.is_fin();
        let frame = match header.frame_type {
            frame_type::SYN_STREAM => {
                expect_min_len("SYN_STREAM", &payload, 10)?;
                let stream_id = read_u31(&payload[0..4]);
                if stream_id == 0 {
                    return Err(FrameError::Malformed("SYN_STREAM"));
                }
                Frame::SynStream {
                    stream_id,
                    associated_stream_id: read_u31(&payload[4..8]),
                    priority: payload[8] >> 5,
                    unidirectional: header.flags & flags::UNIDIRECTIONAL != 0,
                    fin,
                    headers: ctx.decoder.decode(&payload[10..])?,
                }
            }
            frame_type::SYN_REPLY => {
                expect_min_len("SYN_REPLY", &payload, 4)?;
                Frame::SynReply {
                    stream_id: nonzero_stream("SYN_REPLY", &payload)?,
                    fin,
                    headers: ctx.decoder.decode(&payload[4..])?,
                }
            }
            frame_type::HEADERS => {
                expect_min_len("HEADERS", &payload, 4)?;
                Frame::Headers {
                    stream_id: nonzero_stream("HEADERS", &payload)?,
                    fin,
                    headers: ctx.decoder.decode(&payload[4..])?,
                }
            }
            frame_type::RST_STREAM => {
                expect_len("RST_STREAM", &payload, 8)?;
                Frame::RstStream {
                    stream_id: nonzero_stream("RST_STREAM", &payload)?,
                    status: StatusCode::from_u32(read_u32(&payload[4..8])),
                }
            }
            frame_type::SETTINGS => {
                expect_min_len("SETTINGS", &payload, 4)?;
                let count = read_u32(&payload[0..4]) as usize;
                let expected = count
                    .checked_mul(8)
                    .and_then(|n| n.checked_add(4))
                    .ok_or(FrameError::Malformed("SETTINGS"))?;
                expect_len("SETTINGS", &payload, expected)?;
                let settings = payload[4..]
                    .chunks_exact(8)
                    .map(|entry| Setting {
                        flags: entry[0],
                        id: u32::from_be_bytes([0, entry[1], entry[2], entry[3]]),
                        value: read_u32(&entry[4..8]),
                    })
                    .collect();
                Frame::Settings {
                    clear: header.flags & flags::SETTINGS_CLEAR != 0,
                    settings,
                }
            }
            frame_type::PING => {
                expect_len("PING", &payload, 4)?;
                Frame::Ping {
                    id: read_u32(&payload[0..4]),
                }
            }
            frame_type::GOAWAY => {
                expect_len("GOAWAY", &payload, 8)?;
                Frame::GoAway {
                    last_good_stream_id: read_u31(&payload[0..4]),
                    status: GoAwayStatus::from_u32(read_u32(&payload[4..8])),
                }
            }
            frame_type::WINDOW_UPDATE => {
                expect_len("WINDOW_UPDATE", &payload, 8)?;
                let delta = read_u31(&payload[4..8]);
                if delta == 0 {
                    return Err(FrameError::Malformed("WINDOW_UPDATE"));
                }
                Frame::WindowUpdate {
                    stream_id: read_u31(&payload[0..4]),
                    delta,
                }
            }
            frame_type::NOOP | frame_type::CREDENTIAL => {
                tracing::trace!(frame_type = header.frame_type, "skipping obsolete control frame");
                return Ok(None);
            }
            other => return Err(FrameError::UnknownFrameType(other)),
        };
        Ok(Some(frame))
    }

    /// Append the wire form of `frame` to `out`. Header blocks are compressed
    /// with `ctx`, so frames must be encoded in the order they are written.
    /// Nothing is appended when compression fails.
    pub fn encode(
        frame: &Frame,
        ctx: &mut CompressionContext,
        out: &mut Vec<u8>,
    ) -> Result<(), FrameError> {
        match frame {
            Frame::SynStream {
                stream_id,
                associated_stream_id,
                priority,
                unidirectional,
                fin,
                headers,
            } => {
                let block = ctx.encoder.encode(headers)?;
                let mut flag_byte = fin_flag(*fin);
                if *unidirectional {
                    flag_byte |= flags::UNIDIRECTIONAL;
                }
                put_control_header(out, frame_type::SYN_STREAM, flag_byte, 10 + block.len());
                out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&(associated_stream_id & STREAM_ID_MASK).to_be_bytes());
                out.push((priority & 0x07) << 5);
                out.push(0); // slot
                out.extend_from_slice(&block);
            }
            Frame::SynReply {
                stream_id,
                fin,
                headers,
            } => {
                let block = ctx.encoder.encode(headers)?;
                put_control_header(out, frame_type::SYN_REPLY, fin_flag(*fin), 4 + block.len());
                out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&block);
            }
            Frame::Headers {
                stream_id,
                fin,
                headers,
            } => {
                let block = ctx.encoder.encode(headers)?;
                put_control_header(out, frame_type::HEADERS, fin_flag(*fin), 4 + block.len());
                out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&block);
            }
            Frame::RstStream { stream_id, status } => {
                put_control_header(out, frame_type::RST_STREAM, 0, 8);
                out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&status.as_u32().to_be_bytes());
            }
            Frame::Settings { clear, settings } => {
                let flag_byte = if *clear { flags::SETTINGS_CLEAR } else { 0 };
                put_control_header(out, frame_type::SETTINGS, flag_byte, 4 + 8 * settings.len());
                out.extend_from_slice(&(settings.len() as u32).to_be_bytes());
                for setting in settings {
                    out.push(setting.flags);
                    out.extend_from_slice(&setting.id.to_be_bytes()[1..]);
                    out.extend_from_slice(&setting.value.to_be_bytes());
                }
            }
            Frame::Ping { id } => {
                put_control_header(out, frame_type::PING, 0, 4);
                out.extend_from_slice(&id.to_be_bytes());
            }
            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                put_control_header(out, frame_type::GOAWAY, 0, 8);
                out.extend_from_slice(&(last_good_stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&status.as_u32().to_be_bytes());
            }
            Frame::WindowUpdate { stream_id, delta } => {
                put_control_header(out, frame_type::WINDOW_UPDATE, 0, 8);
                out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
                out.extend_from_slice(&(delta & STREAM_ID_MASK).to_be_bytes());
            }
            Frame::Data {
                stream_id,
                fin,
                data,
            } => {
                debug_assert!(data.len() <= MAX_FRAME_LEN);
                out.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
                out.push(fin_flag(*fin));
                put_u24(out, data.len());
                out.extend_from_slice(data);
            }
        }
        Ok(())
    }

    /// Drop any buffered input.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn put_control_header(out: &mut Vec<u8>, frame_type: u16, flag_byte: u8, length: usize) {
    debug_assert!(length <= MAX_FRAME_LEN);
    out.extend_from_slice(&(0x8000 | SPDY_VERSION).to_be_bytes());
    out.extend_from_slice(&frame_type.to_be_bytes());
    out.push(flag_byte);
    put_u24(out, length);
}

fn put_u24(out: &mut Vec<u8>, value: usize) {
    out.push((value >> 16) as u8);
    out.push((value >> 8) as u8);
    out.push(value as u8);
}

fn fin_flag(fin: bool) -> u8 {
    if fin {
        flags::FIN
    } else {
        0
    }
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn read_u31(data: &[u8]) -> u32 {
    read_u32(data) & STREAM_ID_MASK
}

fn nonzero_stream(kind: &'static str, payload: &[u8]) -> Result<u32, FrameError> {
    match read_u31(&payload[0..4]) {
        0 => Err(FrameError::Malformed(kind)),
        id => Ok(id),
    }
}

fn expect_len(kind: &'static str, payload: &[u8], len: usize) -> Result<(), FrameError> {
    if payload.len() != len {
        return Err(FrameError::InvalidLength {
            kind,
            len: payload.len(),
        });
    }
    Ok(())
}

fn expect_min_len(kind: &'static str, payload: &[u8], len: usize) -> Result<(), FrameError> {
    if payload.len() < len {
        return Err(FrameError::InvalidLength {
            kind,
            len: payload.len(),
        });
    }
    Ok(())
}
