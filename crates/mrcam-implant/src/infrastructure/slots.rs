//! All-or-nothing application of queued import-slot writes.
//!
//! A commit rewrites several slots one after another.  If a later write fails
//! the earlier ones are put back, so a failed transaction never leaves the
//! host calling a mix of original and replacement functions.

use std::io;

use tracing::warn;

/// One queued store of `value` into the pointer-sized slot at `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWrite {
    pub slot: usize,
    pub value: usize,
}

/// Memory holding import slots.
pub trait SlotMemory {
    /// Stores `value` at `slot` and returns the value it replaced.
    fn swap(&mut self, slot: usize, value: usize) -> io::Result<usize>;
}

/// Applies `writes` in order, rolling back on the first failure.
///
/// `undo` is scratch space; give it capacity for `writes.len()` entries up
/// front and this function does not allocate.
///
/// # Errors
///
/// Returns the error of the failing write after every slot written before it
/// holds its previous value again.
pub fn apply_all<M: SlotMemory>(
    memory: &mut M,
    writes: &[SlotWrite],
    undo: &mut Vec<SlotWrite>,
) -> io::Result<()> {
    undo.clear();
    for write in writes {
        match memory.swap(write.slot, write.value) {
            Ok(previous) => undo.push(SlotWrite {
                slot: write.slot,
                value: previous,
            }),
            Err(e) => {
                for restore in undo.drain(..).rev() {
                    if let Err(err) = memory.swap(restore.slot, restore.value) {
                        warn!(slot = restore.slot, "could not restore import slot: {err}");
                    }
                }
                return Err(e);
            }
        }
    }
    undo.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Slots are indices into `values`; writing `fail_slot` errors.
    struct FakeSlots {
        values: Vec<usize>,
        fail_slot: Option<usize>,
    }

    impl SlotMemory for FakeSlots {
        fn swap(&mut self, slot: usize, value: usize) -> io::Result<usize> {
            if self.fail_slot == Some(slot) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            Ok(std::mem::replace(&mut self.values[slot], value))
        }
    }

    fn writes(slots: &[usize], value: usize) -> Vec<SlotWrite> {
        slots.iter().map(|&slot| SlotWrite { slot, value }).collect()
    }

    #[test]
    fn test_apply_all_writes_every_slot() {
        // Arrange
        let mut memory = FakeSlots {
            values: vec![1, 2, 3],
            fail_slot: None,
        };
        let mut undo = Vec::with_capacity(3);

        // Act
        let result = apply_all(&mut memory, &writes(&[0, 1, 2], 9), &mut undo);

        // Assert
        assert!(result.is_ok());
        assert_eq!(memory.values, vec![9, 9, 9]);
        assert!(undo.is_empty());
    }

    #[test]
    fn test_failed_write_restores_slots_already_written() {
        // Arrange – the third of four writes fails
        let mut memory = FakeSlots {
            values: vec![10, 11, 12, 13],
            fail_slot: Some(2),
        };
        let mut undo = Vec::with_capacity(4);

        // Act
        let result = apply_all(&mut memory, &writes(&[0, 1, 2, 3], 99), &mut undo);

        // Assert
        assert_eq!(
            result.map_err(|e| e.kind()),
            Err(io::ErrorKind::PermissionDenied)
        );
        assert_eq!(memory.values, vec![10, 11, 12, 13], "no slot left patched");
    }

    #[test]
    fn test_first_write_failing_touches_nothing() {
        let mut memory = FakeSlots {
            values: vec![5, 6],
            fail_slot: Some(0),
        };
        let mut undo = Vec::new();

        assert!(apply_all(&mut memory, &writes(&[0, 1], 7), &mut undo).is_err());
        assert_eq!(memory.values, vec![5, 6]);
    }
}
