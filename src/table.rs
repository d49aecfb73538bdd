//! Active streams keyed by id, id allocation and closed-stream memory.

use std::collections::{BTreeMap, VecDeque};

use crate::config::Role;
use crate::error::Error;
use crate::stream::Stream;

const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// Where an id stands relative to this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStatus {
    Active,
    /// Closed `age` received frames ago; late frames are tolerated while the
    /// age is inside the grace window.
    RecentlyClosed { age: u64 },
    /// Used at some point but no longer remembered.
    Closed,
    /// Never opened by either side.
    Idle,
}

#[derive(Debug)]
pub struct StreamTable {
    role: Role,
    streams: BTreeMap<u32, Stream>,
    next_local_id: u32,
    highest_remote_id: u32,
    recently_closed: VecDeque<(u32, u64)>,
    memory: usize,
}

impl StreamTable {
    pub fn new(role: Role, memory: usize) -> Self {
        Self {
            role,
            streams: BTreeMap::new(),
            next_local_id: role.first_stream_id(),
            highest_remote_id: 0,
            recently_closed: VecDeque::new(),
            memory,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Next id of our parity. Ids are never reused; running out means no
    /// more streams on this connection.
    pub fn allocate_id(&mut self) -> Result<u32, Error> {
        let id = self.next_local_id;
        if id > MAX_STREAM_ID {
            return Err(Error::Refused("stream ids exhausted"));
        }
        self.next_local_id += 2;
        Ok(id)
    }

    /// Record a peer-initiated id. It must have the peer's parity and be
    /// higher than every earlier peer id; anything else is a reused or
    /// forged id.
    pub fn accept_remote_id(&mut self, id: u32) -> Result<(), Error> {
        if self.role.is_local_id(id) {
            return Err(Error::protocol(format!("peer opened stream {id} with our parity")));
        }
        if id <= self.highest_remote_id {
            return Err(Error::protocol(format!(
                "peer reused stream id {id} (highest seen {})",
                self.highest_remote_id
            )));
        }
        self.highest_remote_id = id;
        Ok(())
    }

    pub fn highest_remote_id(&self) -> u32 {
        self.highest_remote_id
    }

    pub fn insert(&mut self, stream: Stream) {
        self.streams.insert(stream.id(), stream);
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Drop a stream and remember it as closed at `frame_no`.
    pub fn remove(&mut self, id: u32, frame_no: u64) -> Option<Stream> {
        let stream = self.streams.remove(&id)?;
        self.remember_closed(id, frame_no);
        Some(stream)
    }

    /// Record `id` as closed at `frame_no` without it ever having been in
    /// the table (a refused stream).
    pub fn remember_closed(&mut self, id: u32, frame_no: u64) {
        self.recently_closed.push_back((id, frame_no));
        while self.recently_closed.len() > self.memory {
            self.recently_closed.pop_front();
        }
    }

    /// Remove every stream that is fully closed and flushed.
    pub fn reap(&mut self, frame_no: u64) -> Vec<u32> {
        let done: Vec<u32> = self
            .streams
            .values()
            .filter(|s| s.is_finished())
            .map(|s| s.id())
            .collect();
        for id in &done {
            self.remove(*id, frame_no);
        }
        done
    }

    pub fn status(&self, id: u32, frame_no: u64) -> IdStatus {
        if self.streams.contains_key(&id) {
            return IdStatus::Active;
        }
        if let Some((_, closed_at)) = self.recently_closed.iter().rev().find(|(c, _)| *c == id) {
            return IdStatus::RecentlyClosed {
                age: frame_no.saturating_sub(*closed_at),
            };
        }
        let used = if self.role.is_local_id(id) {
            id < self.next_local_id
        } else {
            id <= self.highest_remote_id
        };
        if used {
            IdStatus::Closed
        } else {
            IdStatus::Idle
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Streams that still count against a concurrency limit, split by who
    /// opened them.
    pub fn active_count(&self, local: bool) -> usize {
        self.streams
            .values()
            .filter(|s| !s.is_closed() && self.role.is_local_id(s.id()) == local)
            .count()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.streams.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }

    /// Ids with queued writes, most urgent priority first, then oldest.
    pub fn pending_write_ids(&self) -> Vec<u32> {
        let mut ids: Vec<(u8, u32)> = self
            .streams
            .values()
            .filter(|s| s.has_pending_writes())
            .map(|s| (s.priority(), s.id()))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }
}
