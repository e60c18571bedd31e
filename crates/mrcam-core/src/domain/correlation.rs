//! Bounded correlation of in-flight asynchronous reads.
//!
//! When the host submits a read, the destination buffer is known but the
//! data is not; when the completion arrives only the opaque completion token
//! is known.  The table remembers the last [`REQUEST_HISTORY`] submissions so
//! a completion can be matched back to its buffer.
//!
//! Entries are never removed on lookup: the host may query the same
//! completion more than once, and old entries age out as new reads arrive.

use std::sync::{Mutex, PoisonError};

/// Number of submissions remembered.
pub const REQUEST_HISTORY: usize = 32;

/// Destination of a submitted read, as a raw address and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRef {
    pub addr: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    token: usize,
    buffer: BufferRef,
}

struct Ring {
    slots: [Option<Entry>; REQUEST_HISTORY],
    /// Index the next record is written to.
    next: usize,
}

/// Fixed-capacity ring of `{token, buffer}` pairs, newest wins.
pub struct RequestTable {
    ring: Mutex<Ring>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                slots: [None; REQUEST_HISTORY],
                next: 0,
            }),
        }
    }

    /// Records a submission, overwriting the oldest entry when full.  O(1).
    pub fn record(&self, token: usize, buffer: BufferRef) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let index = ring.next;
        ring.slots[index] = Some(Entry { token, buffer });
        ring.next = (index + 1) % REQUEST_HISTORY;
    }

    /// Finds the most recent submission carrying `token`.
    pub fn resolve(&self, token: usize) -> Option<BufferRef> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        (1..=REQUEST_HISTORY)
            .map(|back| (ring.next + REQUEST_HISTORY - back) % REQUEST_HISTORY)
            .filter_map(|index| ring.slots[index])
            .find(|entry| entry.token == token)
            .map(|entry| entry.buffer)
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(addr: usize) -> BufferRef {
        BufferRef { addr, len: 64 }
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        let table = RequestTable::new();
        assert_eq!(table.resolve(1), None);
    }

    #[test]
    fn test_recorded_token_resolves_to_its_buffer() {
        // Arrange
        let table = RequestTable::new();

        // Act
        table.record(0x1000, buf(0xA000));

        // Assert
        assert_eq!(table.resolve(0x1000), Some(buf(0xA000)));
    }

    #[test]
    fn test_resolve_does_not_remove_the_entry() {
        let table = RequestTable::new();
        table.record(7, buf(70));
        assert_eq!(table.resolve(7), Some(buf(70)));
        assert_eq!(table.resolve(7), Some(buf(70)));
    }

    #[test]
    fn test_forty_tokens_evict_the_oldest_eight() {
        // Arrange
        let table = RequestTable::new();

        // Act
        for token in 0..40usize {
            table.record(token, buf(token * 0x100));
        }

        // Assert
        for token in 0..8usize {
            assert_eq!(table.resolve(token), None, "token {token} should be evicted");
        }
        for token in 8..40usize {
            assert_eq!(table.resolve(token), Some(buf(token * 0x100)));
        }
    }

    #[test]
    fn test_reused_token_resolves_to_newest_buffer() {
        // Arrange – token 5 recorded, aged out, then recorded again
        let table = RequestTable::new();
        table.record(5, buf(1));
        for token in 100..140usize {
            table.record(token, buf(token));
        }
        table.record(5, buf(2));

        // Act / Assert
        assert_eq!(table.resolve(5), Some(buf(2)));
    }

    #[test]
    fn test_duplicate_token_within_window_prefers_newest() {
        let table = RequestTable::new();
        table.record(9, buf(1));
        table.record(9, buf(2));
        assert_eq!(table.resolve(9), Some(buf(2)));
    }
}
