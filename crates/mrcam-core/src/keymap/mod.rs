//! Keyboard helpers for the shortcut system.
//!
//! # Sub-modules
//!
//! - **`windows_vk`** – Windows virtual-key constants, modifier variant
//!   groups, and display names.
//! - **`chord`** – The live shortcut matcher fed by a low-level keyboard
//!   hook.  The hook itself belongs to the UI; the matcher is pure state and
//!   is tested without any OS.

pub mod chord;
pub mod windows_vk;

pub use chord::{ChordMatcher, ShortcutKeys, ShortcutTest};
pub use windows_vk::{canonical_vk, parse_chord, vk_from_name, vk_name, Modifier};
