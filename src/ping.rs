//! Round-trip liveness pings.
//!
//! Ping ids carry the sender's parity (clients odd, servers even), so an
//! inbound PING is either the peer asking (echo it) or the peer answering
//! one of ours.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::Role;
use crate::frame::Frame;

/// What to do with an inbound PING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingAction {
    /// The peer's ping; write this frame back immediately.
    Echo(Frame),
    /// Reply to one of ours.
    Acknowledged { id: u32, rtt: Duration },
    /// A reply nobody is waiting for (late, after a timeout, or bogus).
    Unmatched { id: u32 },
}

#[derive(Debug)]
struct Pending {
    sent_at: Instant,
    deadline: Instant,
}

#[derive(Debug)]
pub struct PingManager {
    role: Role,
    next_id: u32,
    pending: HashMap<u32, Pending>,
    timeout: Duration,
}

impl PingManager {
    pub fn new(role: Role, timeout: Duration) -> Self {
        Self {
            role,
            next_id: role.first_stream_id(),
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Start a ping. Returns its token and the frame to send.
    pub fn ping(&mut self, now: Instant) -> (u32, Frame) {
        let mut id = self.next_id;
        while self.pending.contains_key(&id) {
            id = self.advance(id);
        }
        self.next_id = self.advance(id);
        self.pending.insert(
            id,
            Pending {
                sent_at: now,
                deadline: now + self.timeout,
            },
        );
        (id, Frame::Ping { id })
    }

    fn advance(&self, id: u32) -> u32 {
        match id.checked_add(2) {
            Some(next) => next,
            None => self.role.first_stream_id(),
        }
    }

    pub fn on_ping(&mut self, id: u32, now: Instant) -> PingAction {
        if !self.role.is_local_id(id) {
            return PingAction::Echo(Frame::Ping { id });
        }
        match self.pending.remove(&id) {
            Some(p) => PingAction::Acknowledged {
                id,
                rtt: now.saturating_duration_since(p.sent_at),
            },
            None => PingAction::Unmatched { id },
        }
    }

    /// Drop and return every ping whose deadline has passed.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<u32> {
        let mut expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}
