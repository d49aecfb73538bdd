//! Connection-scoped header compression.
//!
//! A SPDY/3 header block is a name/value block:
//!
//! ```text
//! | count (32) | name len (32) | name | value len (32) | value | ...
//! ```
//!
//! Repeated names travel once, their values joined by NUL. The block is then
//! run through a zlib stream primed with [`SPDY_DICTIONARY`]. That stream
//! lives for the whole connection and every block is sync-flushed into it,
//! so blocks must be encoded in the exact order they hit the wire and
//! decoded in the exact order they arrive.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::FrameError;
use crate::headers::Headers;

/// Largest decompressed header block accepted from the peer.
pub const MAX_HEADER_BLOCK_LEN: usize = 1 << 20;

/// The zlib dictionary of SPDY/3 (Section 2.6.10.1). Its Adler-32 is
/// `0xe3c6a7c2`.
pub const SPDY_DICTIONARY: &[u8] = b"\
    \x00\x00\x00\x07options\x00\x00\x00\x04head\x00\x00\x00\x04post\x00\x00\x00\x03put\
    \x00\x00\x00\x06delete\x00\x00\x00\x05trace\x00\x00\x00\x06accept\
    \x00\x00\x00\x0eaccept-charset\x00\x00\x00\x0faccept-encoding\
    \x00\x00\x00\x0faccept-language\x00\x00\x00\x0daccept-ranges\x00\x00\x00\x03age\
    \x00\x00\x00\x05allow\x00\x00\x00\x0dauthorization\x00\x00\x00\x0dcache-control\
    \x00\x00\x00\x0aconnection\x00\x00\x00\x0ccontent-base\
    \x00\x00\x00\x10content-encoding\x00\x00\x00\x10content-language\
    \x00\x00\x00\x0econtent-length\x00\x00\x00\x10content-location\
    \x00\x00\x00\x0bcontent-md5\x00\x00\x00\x0dcontent-range\x00\x00\x00\x0ccontent-type\
    \x00\x00\x00\x04date\x00\x00\x00\x04etag\x00\x00\x00\x06expect\
    \x00\x00\x00\x07expires\x00\x00\x00\x04from\x00\x00\x00\x04host\
    \x00\x00\x00\x08if-match\x00\x00\x00\x11if-modified-since\
    \x00\x00\x00\x0dif-none-match\x00\x00\x00\x08if-range\
    \x00\x00\x00\x13if-unmodified-since\x00\x00\x00\x0dlast-modified\
    \x00\x00\x00\x08location\x00\x00\x00\x0cmax-forwards\x00\x00\x00\x06pragma\
    \x00\x00\x00\x12proxy-authenticate\x00\x00\x00\x13proxy-authorization\
    \x00\x00\x00\x05range\x00\x00\x00\x07referer\x00\x00\x00\x0bretry-after\
    \x00\x00\x00\x06server\x00\x00\x00\x02te\x00\x00\x00\x07trailer\
    \x00\x00\x00\x11transfer-encoding\x00\x00\x00\x07upgrade\x00\x00\x00\x0auser-agent\
    \x00\x00\x00\x04vary\x00\x00\x00\x03via\x00\x00\x00\x07warning\
    \x00\x00\x00\x10www-authenticate\x00\x00\x00\x06method\x00\x00\x00\x03get\
    \x00\x00\x00\x06status\x00\x00\x00\x06200 OK\x00\x00\x00\x07version\
    \x00\x00\x00\x08HTTP/1.1\x00\x00\x00\x03url\x00\x00\x00\x06public\
    \x00\x00\x00\x0aset-cookie\x00\x00\x00\x0akeep-alive\x00\x00\x00\x06origin\
    1001012012022052063003023033043053063074024054064074084094104114124134144154\
    16417502504505203 Non-Authoritative Information204 No Content301 Moved Perma\
    nently400 Bad Request401 Unauthorized403 Forbidden404 Not Found500 Internal S\
    erver Error501 Not Implemented503 Service UnavailableJan Feb Mar Apr May Jun J\
    ul Aug Sept Oct Nov Dec 00:00:00 Mon, Tue, Wed, Thu, Fri, Sat, Sun, GMTchunk\
    ed,text/html,image/png,image/jpg,image/gif,application/xml,application/xhtml\
    +xml,text/plain,text/javascript,publicprivatemax-age=gzip,deflate,sdchcharse\
    t=utf-8charset=iso-8859-1,utf-,*,enq=0.";

/// Decoder for inbound header blocks.
pub struct HeaderDecoder {
    inflate: Decompress,
}

impl std::fmt::Debug for HeaderDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecoder")
            .field("total_in", &self.inflate.total_in())
            .finish()
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            inflate: Decompress::new(true),
        }
    }

    /// Decode one header block. A failure leaves the zlib stream in an
    /// unknown state, so callers must treat it as fatal for the connection.
    pub fn decode(&mut self, block: &[u8]) -> Result<Headers, FrameError> {
        let raw = self.inflate_block(block)?;
        parse_block(&raw)
    }

    fn inflate_block(&mut self, block: &[u8]) -> Result<Vec<u8>, FrameError> {
        let start = self.inflate.total_in();
        let mut out = Vec::with_capacity(block.len().saturating_mul(4).max(256));
        loop {
            if out.len() == out.capacity() {
                if out.len() >= MAX_HEADER_BLOCK_LEN {
                    return Err(FrameError::Compression("header block too large".into()));
                }
                out.reserve(out.capacity());
            }
            let consumed = (self.inflate.total_in() - start) as usize;
            let progress = (self.inflate.total_in(), self.inflate.total_out());
            match self
                .inflate
                .decompress_vec(&block[consumed..], &mut out, FlushDecompress::Sync)
            {
                Ok(Status::StreamEnd) => {
                    return Err(FrameError::Compression("peer ended the zlib stream".into()));
                }
                Ok(_) => {}
                Err(e) if e.needs_dictionary().is_some() => {
                    self.inflate
                        .set_dictionary(SPDY_DICTIONARY)
                        .map_err(|e| FrameError::Compression(e.to_string()))?;
                    continue;
                }
                Err(e) => return Err(FrameError::Compression(e.to_string())),
            }

            let consumed = (self.inflate.total_in() - start) as usize;
            if consumed == block.len() && out.len() < out.capacity() {
                return Ok(out);
            }
            if (self.inflate.total_in(), self.inflate.total_out()) == progress {
                return Err(FrameError::Compression("truncated header block".into()));
            }
        }
    }
}

/// Encoder for outbound header blocks.
pub struct HeaderEncoder {
    deflate: Compress,
}

impl std::fmt::Debug for HeaderEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderEncoder")
            .field("total_out", &self.deflate.total_out())
            .finish()
    }
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderEncoder {
    pub fn new() -> Self {
        let mut deflate = Compress::new(Compression::default(), true);
        // Only fails on a stream that already produced output.
        let _ = deflate.set_dictionary(SPDY_DICTIONARY);
        Self { deflate }
    }

    /// Serialize and compress one header block.
    pub fn encode(&mut self, headers: &Headers) -> Result<Vec<u8>, FrameError> {
        let raw = serialize_block(headers);
        let start = self.deflate.total_in();
        let mut out = Vec::with_capacity(raw.len() / 2 + 64);
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let consumed = (self.deflate.total_in() - start) as usize;
            self.deflate
                .compress_vec(&raw[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| FrameError::Compression(e.to_string()))?;
            let consumed = (self.deflate.total_in() - start) as usize;
            if consumed == raw.len() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }
}

fn serialize_block(headers: &Headers) -> Vec<u8> {
    let mut names: Vec<&str> = Vec::new();
    let mut values: Vec<Vec<&str>> = Vec::new();
    for (name, value) in headers.iter() {
        match names.iter().position(|n| *n == name) {
            Some(i) => values[i].push(value),
            None => {
                names.push(name);
                values.push(vec![value]);
            }
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(&(names.len() as u32).to_be_bytes());
    for (name, values) in names.iter().zip(&values) {
        put_chunk(&mut out, name.as_bytes());
        put_chunk(&mut out, values.join("\0").as_bytes());
    }
    out
}

fn put_chunk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn parse_block(raw: &[u8]) -> Result<Headers, FrameError> {
    let mut rest = raw;
    let count = take_u32(&mut rest)?;
    let mut headers = Headers::new();
    for _ in 0..count {
        let name = take_chunk(&mut rest)?;
        let value = take_chunk(&mut rest)?;
        if name.is_empty() || name.iter().any(u8::is_ascii_uppercase) {
            return Err(FrameError::HeaderBlock("header names must be lowercase and non-empty"));
        }
        let name = std::str::from_utf8(name)
            .map_err(|_| FrameError::HeaderBlock("header name is not UTF-8"))?;
        let value = std::str::from_utf8(value)
            .map_err(|_| FrameError::HeaderBlock("header value is not UTF-8"))?;
        if headers.contains(name) {
            return Err(FrameError::HeaderBlock("duplicate header name"));
        }
        if value.is_empty() {
            headers.append(name, "");
            continue;
        }
        for part in value.split('\0') {
            if part.is_empty() {
                return Err(FrameError::HeaderBlock("empty value between NUL separators"));
            }
            headers.append(name, part);
        }
    }
    if !rest.is_empty() {
        return Err(FrameError::HeaderBlock("trailing bytes after the last header"));
    }
    Ok(headers)
}

fn take_u32(rest: &mut &[u8]) -> Result<u32, FrameError> {
    if rest.len() < 4 {
        return Err(FrameError::HeaderBlock("truncated length field"));
    }
    let (head, tail) = rest.split_at(4);
    *rest = tail;
    Ok(u32::from_be_bytes([head[0], head[1], head[2], head[3]]))
}

fn take_chunk<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], FrameError> {
    let len = take_u32(rest)? as usize;
    if rest.len() < len {
        return Err(FrameError::HeaderBlock("length field runs past the block"));
    }
    let (chunk, tail) = rest.split_at(len);
    *rest = tail;
    Ok(chunk)
}

/// Send and receive compression state for one connection.
#[derive(Debug, Default)]
pub struct CompressionContext {
    pub encoder: HeaderEncoder,
    pub decoder: HeaderDecoder,
}

impl CompressionContext {
    pub fn new() -> Self {
        Self::default()
    }
}
