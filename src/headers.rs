//! Case-insensitive, ordered header multi-map.
//!
//! Names are stored lowercased, which is also how they go on the wire.
//! Insertion order is preserved and a name may appear more than once
//! (e.g. `set-cookie`).

use crate::error::HeaderError;

/// Pseudo-headers a SPDY/3.1 header block may carry.
pub const PSEUDO_HEADERS: &[&str] = &[
    ":method",
    ":path",
    ":scheme",
    ":host",
    ":version",
    ":status",
    ":authority",
];

/// Hop-by-hop headers that have no meaning on a multiplexed stream.
const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
];

/// Where a header block appears in a stream, which decides what is allowed
/// in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// SYN_STREAM / SYN_REPLY, or the first HEADERS of a push response.
    Initial,
    /// HEADERS after the body started.
    Trailers,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Replace every value of `name` with a single value. The new entry takes
    /// the position of the first removed one, or goes last.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut idx = 0;
                self.entries.retain(|(n, _)| {
                    let keep = idx <= first || *n != name;
                    idx += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every value of `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Check the block against the pseudo-header and hop-by-hop rules.
    pub fn validate(&self, kind: BlockKind) -> Result<(), HeaderError> {
        let mut seen_pseudo: Vec<&str> = Vec::new();
        let mut regular_started = false;

        for (name, _) in &self.entries {
            if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b == 0) {
                return Err(HeaderError::InvalidName(name.clone()));
            }
            if let Some(stripped) = name.strip_prefix(':') {
                if stripped.is_empty() || !PSEUDO_HEADERS.contains(&name.as_str()) {
                    return Err(HeaderError::UnknownPseudoHeader(name.clone()));
                }
                if kind == BlockKind::Trailers {
                    return Err(HeaderError::PseudoHeaderInTrailers(name.clone()));
                }
                if regular_started {
                    return Err(HeaderError::MisplacedPseudoHeader(name.clone()));
                }
                if seen_pseudo.contains(&name.as_str()) {
                    return Err(HeaderError::DuplicatePseudoHeader(name.clone()));
                }
                seen_pseudo.push(name);
            } else {
                if CONNECTION_SPECIFIC.contains(&name.as_str()) {
                    return Err(HeaderError::ConnectionSpecific(name.clone()));
                }
                regular_started = true;
            }
        }
        Ok(())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
