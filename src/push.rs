//! Server push: promising streams on the sending side, vetting promises on
//! the receiving side.
//!
//! A push is a SYN_STREAM with an even id, `FLAG_UNIDIRECTIONAL` and a
//! non-zero associated stream id. Its header block is the synthetic request
//! the client would have sent for the resource. The promise and the new
//! stream's registration happen in one step on both sides, so no pushed
//! frame can be seen before its promise.

use std::time::Instant;

use crate::config::Role;
use crate::error::{Error, StatusCode};
use crate::flow::FlowController;
use crate::frame::Frame;
use crate::headers::{BlockKind, Headers};
use crate::stream::{Stream, StreamState};
use crate::table::StreamTable;

/// Why an inbound promise was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRejection {
    /// Reset the pushed stream with this code; the connection lives on.
    Refuse(StatusCode),
    /// The promise breaks the connection.
    Fatal(Error),
}

#[derive(Debug, Default)]
pub struct PushCoordinator {
    promised: u64,
}

impl PushCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes promised so far on this connection.
    pub fn promised(&self) -> u64 {
        self.promised
    }

    /// Allocate a stream for a push tied to `origin` and build the promise.
    /// `accepting_streams` is false once GOAWAY went either way.
    pub fn push(
        &mut self,
        table: &mut StreamTable,
        flow: &FlowController,
        accepting_streams: bool,
        origin: u32,
        headers: Headers,
        now: Instant,
    ) -> Result<(u32, Frame), Error> {
        if table.role() != Role::Server {
            return Err(Error::InvalidState("only servers push"));
        }
        if !accepting_streams {
            return Err(Error::InvalidState("connection is going away"));
        }
        headers.validate(BlockKind::Initial)?;

        let origin_stream = table.get(origin).ok_or(Error::UnknownStream(origin))?;
        if table.role().is_local_id(origin) {
            return Err(Error::InvalidState("push origin must be client-initiated"));
        }
        if !matches!(
            origin_stream.state(),
            StreamState::Open | StreamState::HalfClosedRemote
        ) {
            return Err(Error::InvalidState("push origin is not open"));
        }
        let priority = origin_stream.priority();

        let stream_id = table.allocate_id()?;
        let mut stream = Stream::new(stream_id, priority, flow.stream_windows(), now);
        stream.reserve_local(origin);
        table.insert(stream);
        self.promised += 1;

        tracing::debug!(stream_id, origin, "push promised");
        Ok((
            stream_id,
            Frame::SynStream {
                stream_id,
                associated_stream_id: origin,
                priority,
                unidirectional: true,
                fin: false,
                headers,
            },
        ))
    }

    /// Vet an inbound push of `stream_id` tied to `origin`.
    pub fn check_incoming(
        &self,
        table: &StreamTable,
        enable_push: bool,
        stream_id: u32,
        origin: u32,
    ) -> Result<(), PushRejection> {
        if table.role() == Role::Server {
            return Err(PushRejection::Fatal(Error::protocol(format!(
                "client pushed stream {stream_id}"
            ))));
        }
        if !enable_push {
            return Err(PushRejection::Refuse(StatusCode::RefusedStream));
        }
        let origin_open = table.role().is_local_id(origin)
            && table.get(origin).is_some_and(|s| s.is_remote_open());
        if !origin_open {
            return Err(PushRejection::Refuse(StatusCode::ProtocolError));
        }
        Ok(())
    }
}
