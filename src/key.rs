// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Size in bytes of a writer identity key.
pub const KEY_BYTES: usize = 32;

/// `WriterKey` is the identity of one participant's log: an opaque 32-byte
/// string, typically the public key of the underlying replicated log.
///
/// Keys are compared lexicographically as raw bytes. This ordering is the
/// substrate for every deterministic tie-break in the merge: two replicas
/// that disagree on nothing but the order they learned of writers must still
/// compare any pair of keys identically, so the key is kept as raw bytes and
/// never coerced into a text type with encoding-dependent collation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriterKey([u8; KEY_BYTES]);

impl WriterKey {
    pub fn new(bytes: [u8; KEY_BYTES]) -> Self {
        WriterKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }

    /// Lexicographic byte comparison; same relation as `Ord`, spelled out
    /// for call sites that read better with an explicit compare.
    pub fn compare(&self, other: &WriterKey) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl AsRef<[u8]> for WriterKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; KEY_BYTES]> for WriterKey {
    fn from(bytes: [u8; KEY_BYTES]) -> Self {
        WriterKey(bytes)
    }
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

// Abbreviated form for logs: eight hex chars is plenty to tell writers apart.
impl fmt::Debug for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriterKey(")?;
        for b in self.0.iter().take(4) {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}
