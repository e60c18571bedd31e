//! Windows Virtual Key (VK) codes used by the shortcut system.
//!
//! # Modifier variants (for beginners)
//!
//! Windows reports the left and right modifier keys with distinct codes
//! (`VK_LSHIFT`, `VK_RSHIFT`) and also has a generic code (`VK_SHIFT`).  A
//! shortcut written as "Shift+X" should fire whichever physical Shift key is
//! used, so every modifier is folded onto one *canonical* code before chords
//! are compared.  The Windows keys fold onto `VK_APPS`, which is how the UI
//! stores "Win" in a chord.
//!
//! Reference: https://learn.microsoft.com/windows/win32/inputdev/virtual-key-codes

pub const VK_BACK: u8 = 0x08;
pub const VK_TAB: u8 = 0x09;
pub const VK_RETURN: u8 = 0x0D;
pub const VK_SHIFT: u8 = 0x10;
pub const VK_CONTROL: u8 = 0x11;
pub const VK_MENU: u8 = 0x12;
pub const VK_PAUSE: u8 = 0x13;
pub const VK_CAPITAL: u8 = 0x14;
pub const VK_ESCAPE: u8 = 0x1B;
pub const VK_SPACE: u8 = 0x20;
pub const VK_PRIOR: u8 = 0x21;
pub const VK_NEXT: u8 = 0x22;
pub const VK_END: u8 = 0x23;
pub const VK_HOME: u8 = 0x24;
pub const VK_LEFT: u8 = 0x25;
pub const VK_UP: u8 = 0x26;
pub const VK_RIGHT: u8 = 0x27;
pub const VK_DOWN: u8 = 0x28;
pub const VK_SNAPSHOT: u8 = 0x2C;
pub const VK_INSERT: u8 = 0x2D;
pub const VK_DELETE: u8 = 0x2E;
pub const VK_Y: u8 = 0x59;
pub const VK_LWIN: u8 = 0x5B;
pub const VK_RWIN: u8 = 0x5C;
pub const VK_APPS: u8 = 0x5D;
pub const VK_NUMPAD0: u8 = 0x60;
pub const VK_MULTIPLY: u8 = 0x6A;
pub const VK_ADD: u8 = 0x6B;
pub const VK_SUBTRACT: u8 = 0x6D;
pub const VK_DECIMAL: u8 = 0x6E;
pub const VK_DIVIDE: u8 = 0x6F;
pub const VK_F1: u8 = 0x70;
pub const VK_NUMLOCK: u8 = 0x90;
pub const VK_SCROLL: u8 = 0x91;
pub const VK_LSHIFT: u8 = 0xA0;
pub const VK_RSHIFT: u8 = 0xA1;
pub const VK_LCONTROL: u8 = 0xA2;
pub const VK_RCONTROL: u8 = 0xA3;
pub const VK_LMENU: u8 = 0xA4;
pub const VK_RMENU: u8 = 0xA5;

/// A modifier family whose left, right, and generic codes compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Alt,
    Win,
    Ctrl,
    Shift,
}

impl Modifier {
    /// The family `vk` belongs to, if it is a modifier.
    pub fn of(vk: u8) -> Option<Self> {
        match vk {
            VK_LMENU | VK_RMENU | VK_MENU => Some(Modifier::Alt),
            VK_LWIN | VK_RWIN | VK_APPS => Some(Modifier::Win),
            VK_LCONTROL | VK_RCONTROL | VK_CONTROL => Some(Modifier::Ctrl),
            VK_LSHIFT | VK_RSHIFT | VK_SHIFT => Some(Modifier::Shift),
            _ => None,
        }
    }

    /// Every code that reports this modifier.
    pub fn variants(self) -> [u8; 3] {
        match self {
            Modifier::Alt => [VK_LMENU, VK_RMENU, VK_MENU],
            Modifier::Win => [VK_LWIN, VK_RWIN, VK_APPS],
            Modifier::Ctrl => [VK_LCONTROL, VK_RCONTROL, VK_CONTROL],
            Modifier::Shift => [VK_LSHIFT, VK_RSHIFT, VK_SHIFT],
        }
    }

    /// The code chords store for this modifier.
    pub fn canonical(self) -> u8 {
        match self {
            Modifier::Alt => VK_MENU,
            Modifier::Win => VK_APPS,
            Modifier::Ctrl => VK_CONTROL,
            Modifier::Shift => VK_SHIFT,
        }
    }
}

/// Folds left/right modifier codes onto their canonical code.
///
/// Non-modifiers are returned unchanged.
pub fn canonical_vk(vk: u8) -> u8 {
    Modifier::of(vk).map_or(vk, Modifier::canonical)
}

/// Display name of `vk`, or `None` when the table has no entry.
pub fn vk_name(vk: u8) -> Option<&'static str> {
    let name = VK_NAME_TABLE[vk as usize];
    (!name.is_empty()).then_some(name)
}

/// Display name of `vk`, falling back to its hex code.
pub fn describe_vk(vk: u8) -> String {
    vk_name(vk).map_or_else(|| format!("VK 0x{vk:02X}"), str::to_string)
}

/// Looks up a key by display name, ignoring case and spaces.
///
/// `"Win"` is accepted for the left Windows key, so `"Win+Space"` parses to
/// the same codes as the built-in chords.
pub fn vk_from_name(name: &str) -> Option<u8> {
    let wanted: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if wanted == "win" {
        return Some(VK_LWIN);
    }
    (0..=u8::MAX).find(|&vk| {
        let candidate = VK_NAME_TABLE[vk as usize];
        !candidate.is_empty()
            && candidate
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| c.to_ascii_lowercase())
                .eq(wanted.chars())
    })
}

/// Parses a `+`-separated chord such as `"Win+Alt+Up"`.
///
/// Returns `None` if any key name is unknown.
pub fn parse_chord(text: &str) -> Option<Vec<u8>> {
    text.split('+')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(vk_from_name)
        .collect()
}

/// Human-readable names indexed by VK code; `""` when unnamed.
const VK_NAME_TABLE: [&str; 256] = {
    let mut t = [""; 256];

    // ── Editing and navigation ───────────────────────────────────────────────
    t[VK_BACK as usize] = "Backspace";
    t[VK_TAB as usize] = "Tab";
    t[VK_RETURN as usize] = "Enter";
    t[VK_PAUSE as usize] = "Pause";
    t[VK_CAPITAL as usize] = "Caps Lock";
    t[VK_ESCAPE as usize] = "Esc";
    t[VK_SPACE as usize] = "Space";
    t[VK_PRIOR as usize] = "Page Up";
    t[VK_NEXT as usize] = "Page Down";
    t[VK_END as usize] = "End";
    t[VK_HOME as usize] = "Home";
    t[VK_LEFT as usize] = "Left";
    t[VK_UP as usize] = "Up";
    t[VK_RIGHT as usize] = "Right";
    t[VK_DOWN as usize] = "Down";
    t[VK_SNAPSHOT as usize] = "Print Screen";
    t[VK_INSERT as usize] = "Insert";
    t[VK_DELETE as usize] = "Delete";

    // ── Modifiers ────────────────────────────────────────────────────────────
    t[VK_SHIFT as usize] = "Shift";
    t[VK_CONTROL as usize] = "Ctrl";
    t[VK_MENU as usize] = "Alt";
    t[VK_LWIN as usize] = "Left Win Key";
    t[VK_RWIN as usize] = "Right Win Key";
    // Chords store "Win" as VK_APPS.
    t[VK_APPS as usize] = "Win Key";
    t[VK_LSHIFT as usize] = "Left Shift";
    t[VK_RSHIFT as usize] = "Right Shift";
    t[VK_LCONTROL as usize] = "Left Ctrl";
    t[VK_RCONTROL as usize] = "Right Ctrl";
    t[VK_LMENU as usize] = "Left Alt";
    t[VK_RMENU as usize] = "Right Alt";

    // ── Digits and letters (VK code == ASCII) ────────────────────────────────
    const DIGITS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];
    let mut i = 0;
    while i < 10 {
        t[0x30 + i] = DIGITS[i];
        i += 1;
    }
    const LETTERS: [&str; 26] = [
        "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
        "S", "T", "U", "V", "W", "X", "Y", "Z",
    ];
    let mut i = 0;
    while i < 26 {
        t[0x41 + i] = LETTERS[i];
        i += 1;
    }

    // ── Numpad ───────────────────────────────────────────────────────────────
    const NUMPAD: [&str; 10] = [
        "Num 0", "Num 1", "Num 2", "Num 3", "Num 4", "Num 5", "Num 6", "Num 7", "Num 8", "Num 9",
    ];
    let mut i = 0;
    while i < 10 {
        t[VK_NUMPAD0 as usize + i] = NUMPAD[i];
        i += 1;
    }
    t[VK_MULTIPLY as usize] = "Num *";
    t[VK_ADD as usize] = "Num +";
    t[VK_SUBTRACT as usize] = "Num -";
    t[VK_DECIMAL as usize] = "Num Del";
    t[VK_DIVIDE as usize] = "Divide";
    t[VK_NUMLOCK as usize] = "NumLock";
    t[VK_SCROLL as usize] = "Scroll Lock";

    // ── Function keys ────────────────────────────────────────────────────────
    const FKEYS: [&str; 24] = [
        "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
        "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
    ];
    let mut i = 0;
    while i < 24 {
        t[VK_F1 as usize + i] = FKEYS[i];
        i += 1;
    }

    t
};
