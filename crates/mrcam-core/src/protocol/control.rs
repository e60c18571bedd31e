//! Consumer → host control record: feature toggles and shortcut chords.
//!
//! The record is a packed 64-byte block (no implicit padding) carried in a
//! [`SeqRecord`], so the segment is laid out as before counter @0, after
//! counter @32, record @64.

use serde::{Deserialize, Serialize};

use super::seqlock::SeqRecord;
use super::{MAX_KEYS, SHORTCUT_COUNT};
use crate::keymap::windows_vk::{
    VK_DOWN, VK_LEFT, VK_LWIN, VK_MENU, VK_NEXT, VK_PRIOR, VK_RIGHT, VK_SPACE, VK_UP,
};
use crate::shm::SharedLayout;

/// Named shortcut slots, in record order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shortcut {
    Recenter = 0,
    Increase = 1,
    Decrease = 2,
    AltIncrease = 3,
    AltDecrease = 4,
    PanLeft = 5,
    PanRight = 6,
}

impl Shortcut {
    /// All slots in record order.
    pub const ALL: [Shortcut; SHORTCUT_COUNT] = [
        Shortcut::Recenter,
        Shortcut::Increase,
        Shortcut::Decrease,
        Shortcut::AltIncrease,
        Shortcut::AltDecrease,
        Shortcut::PanLeft,
        Shortcut::PanRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Shortcut::Recenter => "Recenter",
            Shortcut::Increase => "Increase",
            Shortcut::Decrease => "Decrease",
            Shortcut::AltIncrease => "AltIncrease",
            Shortcut::AltDecrease => "AltDecrease",
            Shortcut::PanLeft => "PanLeft",
            Shortcut::PanRight => "PanRight",
        }
    }

    /// Built-in chord for this slot.
    pub fn default_keys(self) -> &'static [u8] {
        match self {
            Shortcut::Recenter => &[VK_LWIN, VK_SPACE],
            Shortcut::Increase => &[VK_LWIN, VK_NEXT],
            Shortcut::Decrease => &[VK_LWIN, VK_PRIOR],
            Shortcut::AltIncrease => &[VK_LWIN, VK_MENU, VK_UP],
            Shortcut::AltDecrease => &[VK_LWIN, VK_MENU, VK_DOWN],
            Shortcut::PanLeft => &[VK_LWIN, VK_MENU, VK_LEFT],
            Shortcut::PanRight => &[VK_LWIN, VK_MENU, VK_RIGHT],
        }
    }
}

/// The control record, byte-compatible with the UI process.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Process id of the UI that owns the consumer.
    pub ui_parent_pid: u32,
    /// Nonzero: dismiss the Win+Y "mixed reality input" prompt.
    pub disable_win_y: u8,
    /// Nonzero: show the camera passthrough.
    pub enable_passthrough: u8,
    /// Nonzero: apply the blue-light filter.
    pub enable_blue_light_filter: u8,
    /// Nonzero: the consumer should exit.
    pub terminate: u8,
    /// One zero-terminated key chord per [`Shortcut`].
    pub shortcuts: [[u8; MAX_KEYS]; SHORTCUT_COUNT],
}

const _: () = {
    use std::mem::{offset_of, size_of};
    assert!(size_of::<ControlRecord>() == 64);
    assert!(offset_of!(ControlRecord, disable_win_y) == 4);
    assert!(offset_of!(ControlRecord, terminate) == 7);
    assert!(offset_of!(ControlRecord, shortcuts) == 8);
};

impl ControlRecord {
    /// The record the service publishes when it creates the segment.
    pub fn with_defaults() -> Self {
        let mut record = Self {
            enable_passthrough: 1,
            ..Self::default()
        };
        for shortcut in Shortcut::ALL {
            record.set_keys(shortcut, shortcut.default_keys());
        }
        record
    }

    /// Raw key codes of `shortcut`, zero-terminated.
    pub fn keys(&self, shortcut: Shortcut) -> &[u8; MAX_KEYS] {
        &self.shortcuts[shortcut as usize]
    }

    /// Stores `keys` in `shortcut`'s slot; extra keys beyond [`MAX_KEYS`] are
    /// dropped and the remainder is zero-filled.
    pub fn set_keys(&mut self, shortcut: Shortcut, keys: &[u8]) {
        let slot = &mut self.shortcuts[shortcut as usize];
        *slot = [0; MAX_KEYS];
        let n = keys.len().min(MAX_KEYS);
        slot[..n].copy_from_slice(&keys[..n]);
    }

    pub fn passthrough_enabled(&self) -> bool {
        self.enable_passthrough != 0
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate != 0
    }
}

/// Binary layout of [`CONTROL_SEGMENT_NAME`](super::CONTROL_SEGMENT_NAME).
pub type ControlLayout = SeqRecord<ControlRecord>;

// SAFETY: counters at zero and an all-zero record are the initial state.
unsafe impl SharedLayout for SeqRecord<ControlRecord> {}

const _: () = assert!(std::mem::size_of::<ControlLayout>() == 128);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedSegment;

    #[test]
    fn test_defaults_enable_passthrough_and_leave_win_y_alone() {
        let record = ControlRecord::with_defaults();
        assert!(record.passthrough_enabled());
        assert_eq!(record.disable_win_y, 0);
        assert!(!record.terminate_requested());
    }

    #[test]
    fn test_defaults_fill_every_shortcut_slot() {
        // Arrange / Act
        let record = ControlRecord::with_defaults();

        // Assert
        assert_eq!(record.keys(Shortcut::Recenter)[..3], [VK_LWIN, VK_SPACE, 0]);
        assert_eq!(
            record.keys(Shortcut::PanRight)[..4],
            [VK_LWIN, VK_MENU, VK_RIGHT, 0]
        );
        for shortcut in Shortcut::ALL {
            assert_ne!(record.keys(shortcut)[0], 0, "{} is empty", shortcut.name());
        }
    }

    #[test]
    fn test_set_keys_truncates_to_max_keys() {
        let mut record = ControlRecord::default();
        record.set_keys(Shortcut::Increase, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(*record.keys(Shortcut::Increase), [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_set_keys_clears_previous_longer_chord() {
        let mut record = ControlRecord::with_defaults();
        record.set_keys(Shortcut::AltIncrease, &[0x41]);
        assert_eq!(record.keys(Shortcut::AltIncrease)[..2], [0x41, 0]);
    }

    #[test]
    fn test_control_segment_publish_and_consume_returns_epoch() {
        // Arrange
        let seg = SharedSegment::<ControlLayout>::anonymous().expect("segment");
        let mut record = ControlRecord::with_defaults();
        record.ui_parent_pid = 4242;

        // Act
        seg.publish(&record);
        let (epoch, read) = seg.consume().expect("consistent snapshot");

        // Assert
        assert_eq!(epoch, 1);
        assert_eq!(read, record);
    }

    #[test]
    fn test_control_record_round_trips_through_toml() {
        let record = ControlRecord::with_defaults();
        let text = toml::to_string(&record).expect("serialize");
        let back: ControlRecord = toml::from_str(&text).expect("deserialize");
        assert_eq!(back, record);
    }
}
