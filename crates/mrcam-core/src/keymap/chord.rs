//! Live shortcut chord matching.
//!
//! A low-level keyboard hook feeds every key-down and key-up into
//! [`ChordMatcher`], which answers "suppress this event?" and latches a
//! per-shortcut *pressed* flag once every key of the chord is held.  The
//! render loop collects and clears those latches with
//! [`ChordMatcher::test_shortcuts`].
//!
//! # Matching rules
//!
//! - A key that no chord uses is only remembered as held; this is the fast
//!   path for ordinary typing.
//! - Auto-repeat (a down for a key already held) is ignored.
//! - Modifiers are matched by family: holding Left Alt and then pressing
//!   Right Alt counts once, and the family counts as released only when every
//!   variant is up.
//! - When a chord completes on a non-modifier key, that key's down and up
//!   are suppressed so the host application never sees them.  Modifier keys
//!   are never suppressed.
//!
//! The matcher is plain state; callers share it between the hook thread and
//! the render thread behind a mutex.

use tracing::info;

use super::windows_vk::{canonical_vk, describe_vk, Modifier};
use crate::protocol::control::{ControlRecord, Shortcut};
use crate::protocol::{MAX_KEYS, SHORTCUT_COUNT};

/// The keys of one chord, modifiers already folded to canonical codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShortcutKeys {
    vks: [u8; MAX_KEYS],
    count: usize,
}

impl ShortcutKeys {
    /// Replaces the chord with `vks`, stopping at the first zero code.
    ///
    /// An empty list (or one starting with zero) leaves the chord unchanged.
    /// Returns `true` when the stored chord changed.
    pub fn set_vks(&mut self, vks: &[u8]) -> bool {
        let count = vks
            .iter()
            .take(MAX_KEYS)
            .position(|&vk| vk == 0)
            .unwrap_or(vks.len().min(MAX_KEYS));
        if count == 0 {
            return false;
        }

        let mut changed = count != self.count;
        for (slot, &vk) in self.vks.iter_mut().zip(&vks[..count]) {
            let vk = canonical_vk(vk);
            changed |= *slot != vk;
            *slot = vk;
        }
        self.count = count;
        changed
    }

    pub fn vks(&self) -> &[u8] {
        &self.vks[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Set of key codes a chord (or any chord) reacts to.
#[derive(Clone)]
pub struct KeyFilter {
    used: [bool; 256],
}

impl KeyFilter {
    fn empty() -> Self {
        Self { used: [false; 256] }
    }

    /// Adds `vk`, including every variant when it is a modifier.
    fn insert(&mut self, vk: u8) {
        match Modifier::of(vk) {
            Some(family) => {
                for variant in family.variants() {
                    self.used[variant as usize] = true;
                }
            }
            None => self.used[vk as usize] = true,
        }
    }

    pub fn contains(&self, vk: u8) -> bool {
        self.used[vk as usize]
    }
}

#[derive(Clone)]
struct ShortcutState {
    keys: ShortcutKeys,
    filter: KeyFilter,
    matching: usize,
    was_pressed: bool,
}

impl ShortcutState {
    fn new() -> Self {
        Self {
            keys: ShortcutKeys::default(),
            filter: KeyFilter::empty(),
            matching: 0,
            was_pressed: false,
        }
    }
}

/// Which shortcuts fired since the previous [`ChordMatcher::test_shortcuts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShortcutTest {
    pressed: [bool; SHORTCUT_COUNT],
}

impl ShortcutTest {
    pub fn was_pressed(&self, shortcut: Shortcut) -> bool {
        self.pressed[shortcut as usize]
    }

    pub fn any(&self) -> bool {
        self.pressed.iter().any(|&p| p)
    }
}

/// Matches key events against the seven shortcut chords.
pub struct ChordMatcher {
    shortcuts: [ShortcutState; SHORTCUT_COUNT],
    /// Union of all shortcut filters.
    filter: KeyFilter,
    /// Keys currently held, by raw code.
    keys_down: [bool; 256],
    /// Keys whose down event was suppressed; their up is suppressed too.
    filtered: [bool; 256],
}

impl ChordMatcher {
    /// A matcher with the built-in chords.
    pub fn new() -> Self {
        let mut matcher = Self {
            shortcuts: std::array::from_fn(|_| ShortcutState::new()),
            filter: KeyFilter::empty(),
            keys_down: [false; 256],
            filtered: [false; 256],
        };
        for shortcut in Shortcut::ALL {
            matcher.shortcuts[shortcut as usize]
                .keys
                .set_vks(shortcut.default_keys());
        }
        matcher.update_filters();
        matcher
    }

    pub fn keys(&self, shortcut: Shortcut) -> &ShortcutKeys {
        &self.shortcuts[shortcut as usize].keys
    }

    /// Reconfigures one chord.  Returns `true` when it changed.
    pub fn set_shortcut(&mut self, shortcut: Shortcut, vks: &[u8]) -> bool {
        let changed = self.shortcuts[shortcut as usize].keys.set_vks(vks);
        if changed {
            self.update_filters();
        }
        changed
    }

    /// Reconfigures every chord from a control record.
    ///
    /// Empty slots keep their current chord.  Returns `true` when any chord
    /// changed.
    pub fn update_from_record(&mut self, record: &ControlRecord) -> bool {
        let mut changed = false;
        for shortcut in Shortcut::ALL {
            changed |= self.shortcuts[shortcut as usize]
                .keys
                .set_vks(record.keys(shortcut));
        }
        if changed {
            self.update_filters();
        }
        changed
    }

    /// Human-readable chord, e.g. `"Win Key + Space"`.
    pub fn describe(&self, shortcut: Shortcut) -> String {
        let keys = self.keys(shortcut);
        if keys.is_empty() {
            return "(none)".to_string();
        }
        keys.vks()
            .iter()
            .map(|&vk| describe_vk(vk))
            .collect::<Vec<_>>()
            .join(" + ")
    }

    /// Rebuilds the filters and re-derives each chord's match count from the
    /// keys held right now, so a chord changed mid-press starts consistent.
    fn update_filters(&mut self) {
        let mut global = KeyFilter::empty();
        for shortcut in Shortcut::ALL {
            let held = self.held_count(&self.shortcuts[shortcut as usize].keys);
            let state = &mut self.shortcuts[shortcut as usize];
            let mut filter = KeyFilter::empty();
            for &vk in state.keys.vks() {
                filter.insert(vk);
                global.insert(vk);
            }
            state.filter = filter;
            state.matching = held;
            info!("Shortcut {}: {}", shortcut.name(), self.describe(shortcut));
        }
        self.filter = global;
        self.filtered = [false; 256];
    }

    /// Number of chord keys currently down, one per modifier family.
    fn held_count(&self, keys: &ShortcutKeys) -> usize {
        keys.vks()
            .iter()
            .filter(|&&vk| match Modifier::of(vk) {
                Some(family) => self.family_held(family),
                None => self.keys_down[vk as usize],
            })
            .count()
    }

    fn family_held(&self, family: Modifier) -> bool {
        family
            .variants()
            .iter()
            .any(|&variant| self.keys_down[variant as usize])
    }

    /// Feeds a key-down.  Returns `true` when the event must be suppressed.
    pub fn on_key_down(&mut self, vk_code: u32) -> bool {
        let Ok(vk) = u8::try_from(vk_code) else {
            return false;
        };
        if self.keys_down[vk as usize] {
            return false;
        }
        if !self.filter.contains(vk) {
            self.keys_down[vk as usize] = true;
            return false;
        }

        let modifier = Modifier::of(vk);
        if let Some(family) = modifier {
            if self.family_held(family) {
                // Another variant already counted for this family.
                self.keys_down[vk as usize] = true;
                return false;
            }
        }
        self.keys_down[vk as usize] = true;

        let mut suppress = false;
        for state in self.shortcuts.iter_mut() {
            if !state.filter.contains(vk) {
                continue;
            }
            state.matching += 1;
            if state.matching >= state.keys.len() {
                state.was_pressed = true;
                if modifier.is_none() {
                    self.filtered[vk as usize] = true;
                    suppress = true;
                }
            }
        }
        suppress
    }

    /// Feeds a key-up.  Returns `true` when the event must be suppressed.
    pub fn on_key_up(&mut self, vk_code: u32) -> bool {
        let Ok(vk) = u8::try_from(vk_code) else {
            return false;
        };
        if !self.keys_down[vk as usize] {
            return false;
        }
        self.keys_down[vk as usize] = false;

        if !self.filter.contains(vk) {
            return false;
        }

        let suppress = std::mem::replace(&mut self.filtered[vk as usize], false);

        if let Some(family) = Modifier::of(vk) {
            if self.family_held(family) {
                return suppress;
            }
        }

        for state in self.shortcuts.iter_mut() {
            if state.filter.contains(vk) {
                state.matching = state.matching.saturating_sub(1);
            }
        }
        suppress
    }

    /// Returns and clears every shortcut's pressed latch.
    pub fn test_shortcuts(&mut self) -> ShortcutTest {
        let mut test = ShortcutTest::default();
        for (pressed, state) in test.pressed.iter_mut().zip(self.shortcuts.iter_mut()) {
            *pressed = std::mem::replace(&mut state.was_pressed, false);
        }
        test
    }
}

impl Default for ChordMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::windows_vk::*;

    fn press(m: &mut ChordMatcher, vk: u8) -> bool {
        m.on_key_down(vk as u32)
    }

    fn release(m: &mut ChordMatcher, vk: u8) -> bool {
        m.on_key_up(vk as u32)
    }

    // ── ShortcutKeys ──────────────────────────────────────────────────────────

    #[test]
    fn test_set_vks_stops_at_first_zero_and_folds_modifiers() {
        // Arrange
        let mut keys = ShortcutKeys::default();

        // Act
        let changed = keys.set_vks(&[VK_RWIN, VK_LSHIFT, VK_SPACE, 0, VK_UP, 0, 0, 0]);

        // Assert
        assert!(changed);
        assert_eq!(keys.vks(), &[VK_APPS, VK_SHIFT, VK_SPACE]);
    }

    #[test]
    fn test_set_vks_empty_list_leaves_chord_unchanged() {
        let mut keys = ShortcutKeys::default();
        keys.set_vks(&[VK_LWIN, VK_SPACE]);
        assert!(!keys.set_vks(&[0; MAX_KEYS]));
        assert!(!keys.set_vks(&[]));
        assert_eq!(keys.vks(), &[VK_APPS, VK_SPACE]);
    }

    #[test]
    fn test_set_vks_reports_no_change_for_equivalent_chord() {
        // Arrange – Left Win and Right Win fold to the same chord
        let mut keys = ShortcutKeys::default();
        keys.set_vks(&[VK_LWIN, VK_SPACE]);

        // Act / Assert
        assert!(!keys.set_vks(&[VK_RWIN, VK_SPACE, 0]));
    }

    #[test]
    fn test_set_vks_reports_change_when_only_length_differs() {
        let mut keys = ShortcutKeys::default();
        keys.set_vks(&[VK_LWIN, VK_MENU, VK_UP]);
        assert!(keys.set_vks(&[VK_LWIN, VK_MENU]));
        assert_eq!(keys.len(), 2);
    }

    // ── Matching ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_recenter_chord_fires_and_suppresses_final_key() {
        // Arrange
        let mut m = ChordMatcher::new();

        // Act
        let win_suppressed = press(&mut m, VK_LWIN);
        let space_suppressed = press(&mut m, VK_SPACE);
        let test = m.test_shortcuts();

        // Assert
        assert!(!win_suppressed, "modifiers are never suppressed");
        assert!(space_suppressed, "final key is suppressed");
        assert!(test.was_pressed(Shortcut::Recenter));
        assert!(!test.was_pressed(Shortcut::Increase));
    }

    #[test]
    fn test_key_up_of_suppressed_key_is_suppressed_too() {
        let mut m = ChordMatcher::new();
        press(&mut m, VK_LWIN);
        press(&mut m, VK_SPACE);
        assert!(release(&mut m, VK_SPACE));
        assert!(!release(&mut m, VK_LWIN));
    }

    #[test]
    fn test_pressed_latch_clears_after_test() {
        let mut m = ChordMatcher::new();
        press(&mut m, VK_LWIN);
        press(&mut m, VK_SPACE);
        assert!(m.test_shortcuts().any());
        assert!(!m.test_shortcuts().any());
    }

    #[test]
    fn test_unrelated_keys_pass_through() {
        let mut m = ChordMatcher::new();
        assert!(!press(&mut m, 0x41));
        assert!(!release(&mut m, 0x41));
        assert!(!m.test_shortcuts().any());
    }

    #[test]
    fn test_key_repeat_is_ignored() {
        // Arrange – Win held, Space held and repeating
        let mut m = ChordMatcher::new();
        press(&mut m, VK_LWIN);
        assert!(press(&mut m, VK_SPACE));
        m.test_shortcuts();

        // Act
        let repeat = press(&mut m, VK_SPACE);

        // Assert
        assert!(!repeat);
        assert!(!m.test_shortcuts().any());
    }

    #[test]
    fn test_second_modifier_variant_does_not_count_twice() {
        // Arrange – Win+Alt+Up is three keys; Left Win + Right Win + Up must
        // not complete it.
        let mut m = ChordMatcher::new();

        // Act
        press(&mut m, VK_LWIN);
        press(&mut m, VK_RWIN);
        press(&mut m, VK_UP);

        // Assert
        assert!(!m.test_shortcuts().was_pressed(Shortcut::AltIncrease));
    }

    #[test]
    fn test_modifier_released_only_when_all_variants_up() {
        // Arrange – both Alt keys held together with Win
        let mut m = ChordMatcher::new();
        press(&mut m, VK_LWIN);
        press(&mut m, VK_LMENU);
        press(&mut m, VK_RMENU);

        // Act – releasing one Alt keeps the family held
        release(&mut m, VK_LMENU);
        let suppressed = press(&mut m, VK_LEFT);

        // Assert
        assert!(suppressed);
        assert!(m.test_shortcuts().was_pressed(Shortcut::PanLeft));
    }

    #[test]
    fn test_released_modifier_breaks_the_chord() {
        let mut m = ChordMatcher::new();
        press(&mut m, VK_LWIN);
        release(&mut m, VK_LWIN);
        assert!(!press(&mut m, VK_SPACE));
        assert!(!m.test_shortcuts().any());
    }

    #[test]
    fn test_match_count_never_goes_negative() {
        // Arrange – "A" is held before it becomes part of a chord, so its
        // release decrements a count it never incremented
        let mut m = ChordMatcher::new();
        press(&mut m, 0x41);
        m.set_shortcut(Shortcut::Recenter, &[VK_LCONTROL, 0x41]);
        release(&mut m, 0x41);

        // Act – the chord must still need both keys
        press(&mut m, VK_LCONTROL);
        let after_ctrl = m.test_shortcuts();
        let suppressed = press(&mut m, 0x41);

        // Assert
        assert!(!after_ctrl.any());
        assert!(suppressed);
        assert!(m.test_shortcuts().was_pressed(Shortcut::Recenter));
    }

    #[test]
    fn test_out_of_range_vk_is_ignored() {
        let mut m = ChordMatcher::new();
        assert!(!m.on_key_down(300));
        assert!(!m.on_key_up(300));
    }

    // ── Reconfiguration ───────────────────────────────────────────────────────

    #[test]
    fn test_update_from_record_rebinds_and_keeps_empty_slots() {
        // Arrange
        let mut m = ChordMatcher::new();
        let mut record = ControlRecord::default();
        record.set_keys(Shortcut::Recenter, &[VK_LCONTROL, VK_Y]);

        // Act
        let changed = m.update_from_record(&record);

        // Assert
        assert!(changed);
        assert_eq!(m.keys(Shortcut::Recenter).vks(), &[VK_CONTROL, VK_Y]);
        assert_eq!(m.keys(Shortcut::Increase).vks(), &[VK_APPS, VK_NEXT]);

        press(&mut m, VK_RCONTROL);
        assert!(press(&mut m, VK_Y));
        assert!(m.test_shortcuts().was_pressed(Shortcut::Recenter));
    }

    #[test]
    fn test_reconfigure_while_modifier_held_drops_stale_count() {
        // Arrange – Win is held under the default Win+Space chord
        let mut m = ChordMatcher::new();
        press(&mut m, VK_LWIN);

        // Act – rebind to Ctrl+Space, let go of Win, then press Space alone
        m.set_shortcut(Shortcut::Recenter, &[VK_CONTROL, VK_SPACE]);
        release(&mut m, VK_LWIN);
        let suppressed = press(&mut m, VK_SPACE);

        // Assert
        assert!(!suppressed);
        assert!(!m.test_shortcuts().was_pressed(Shortcut::Recenter));
    }

    #[test]
    fn test_reconfigure_counts_keys_already_held() {
        // Arrange – Right Ctrl is down before the chord is bound to Ctrl+Y
        let mut m = ChordMatcher::new();
        press(&mut m, VK_RCONTROL);
        m.set_shortcut(Shortcut::Recenter, &[VK_LCONTROL, VK_Y]);

        // Act
        let suppressed = press(&mut m, VK_Y);

        // Assert
        assert!(suppressed);
        assert!(m.test_shortcuts().was_pressed(Shortcut::Recenter));
    }

    #[test]
    fn test_update_from_record_with_defaults_reports_no_change() {
        let mut m = ChordMatcher::new();
        assert!(!m.update_from_record(&ControlRecord::with_defaults()));
    }

    #[test]
    fn test_describe_lists_keys_by_name() {
        let m = ChordMatcher::new();
        assert_eq!(m.describe(Shortcut::AltDecrease), "Win Key + Alt + Down");
    }
}
