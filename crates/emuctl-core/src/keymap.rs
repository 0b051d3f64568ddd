//! Named scancodes accepted by the emulated keyboard peripheral.
//!
//! The monitor's `Press` and `Release` commands take a scancode *name*
//! (`Down`, `Home`, `A`, `Number1`, ...), not a numeric code.  [`KeyName`]
//! is the closed set of names emuctl knows how to send, and
//! [`KeyName::as_scancode`] is the exact spelling used on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a string does not name a known scancode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown key name: {0:?}")]
pub struct KeyNameError(pub String);

/// A scancode name understood by the emulated keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyName {
    // ── Navigation ────────────────────────────────────────────────────────────
    Up,
    Down,
    Left,
    Right,
    /// The device's menu / select key.
    Home,
    Return,
    Space,
    Escape,
    Backspace,
    Tab,
    // ── Letters ───────────────────────────────────────────────────────────────
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    // ── Digits ────────────────────────────────────────────────────────────────
    Number0,
    Number1,
    Number2,
    Number3,
    Number4,
    Number5,
    Number6,
    Number7,
    Number8,
    Number9,
    // ── Modifiers ─────────────────────────────────────────────────────────────
    ShiftL,
    CtrlL,
    AltL,
    // ── Function keys ─────────────────────────────────────────────────────────
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

/// Every key name, in declaration order.
const ALL_KEYS: [KeyName; 61] = [
    KeyName::Up,
    KeyName::Down,
    KeyName::Left,
    KeyName::Right,
    KeyName::Home,
    KeyName::Return,
    KeyName::Space,
    KeyName::Escape,
    KeyName::Backspace,
    KeyName::Tab,
    KeyName::A,
    KeyName::B,
    KeyName::C,
    KeyName::D,
    KeyName::E,
    KeyName::F,
    KeyName::G,
    KeyName::H,
    KeyName::I,
    KeyName::J,
    KeyName::K,
    KeyName::L,
    KeyName::M,
    KeyName::N,
    KeyName::O,
    KeyName::P,
    KeyName::Q,
    KeyName::R,
    KeyName::S,
    KeyName::T,
    KeyName::U,
    KeyName::V,
    KeyName::W,
    KeyName::X,
    KeyName::Y,
    KeyName::Z,
    KeyName::Number0,
    KeyName::Number1,
    KeyName::Number2,
    KeyName::Number3,
    KeyName::Number4,
    KeyName::Number5,
    KeyName::Number6,
    KeyName::Number7,
    KeyName::Number8,
    KeyName::Number9,
    KeyName::ShiftL,
    KeyName::CtrlL,
    KeyName::AltL,
    KeyName::F1,
    KeyName::F2,
    KeyName::F3,
    KeyName::F4,
    KeyName::F5,
    KeyName::F6,
    KeyName::F7,
    KeyName::F8,
    KeyName::F9,
    KeyName::F10,
    KeyName::F11,
    KeyName::F12,
];

const LETTERS: [KeyName; 26] = [
    KeyName::A,
    KeyName::B,
    KeyName::C,
    KeyName::D,
    KeyName::E,
    KeyName::F,
    KeyName::G,
    KeyName::H,
    KeyName::I,
    KeyName::J,
    KeyName::K,
    KeyName::L,
    KeyName::M,
    KeyName::N,
    KeyName::O,
    KeyName::P,
    KeyName::Q,
    KeyName::R,
    KeyName::S,
    KeyName::T,
    KeyName::U,
    KeyName::V,
    KeyName::W,
    KeyName::X,
    KeyName::Y,
    KeyName::Z,
];

const DIGITS: [KeyName; 10] = [
    KeyName::Number0,
    KeyName::Number1,
    KeyName::Number2,
    KeyName::Number3,
    KeyName::Number4,
    KeyName::Number5,
    KeyName::Number6,
    KeyName::Number7,
    KeyName::Number8,
    KeyName::Number9,
];

impl KeyName {
    /// Returns the scancode name exactly as the monitor expects it.
    pub fn as_scancode(self) -> &'static str {
        match self {
            KeyName::Up => "Up",
            KeyName::Down => "Down",
            KeyName::Left => "Left",
            KeyName::Right => "Right",
            KeyName::Home => "Home",
            KeyName::Return => "Return",
            KeyName::Space => "Space",
            KeyName::Escape => "Escape",
            KeyName::Backspace => "BackSpace",
            KeyName::Tab => "Tab",
            KeyName::A => "A",
            KeyName::B => "B",
            KeyName::C => "C",
            KeyName::D => "D",
            KeyName::E => "E",
            KeyName::F => "F",
            KeyName::G => "G",
            KeyName::H => "H",
            KeyName::I => "I",
            KeyName::J => "J",
            KeyName::K => "K",
            KeyName::L => "L",
            KeyName::M => "M",
            KeyName::N => "N",
            KeyName::O => "O",
            KeyName::P => "P",
            KeyName::Q => "Q",
            KeyName::R => "R",
            KeyName::S => "S",
            KeyName::T => "T",
            KeyName::U => "U",
            KeyName::V => "V",
            KeyName::W => "W",
            KeyName::X => "X",
            KeyName::Y => "Y",
            KeyName::Z => "Z",
            KeyName::Number0 => "Number0",
            KeyName::Number1 => "Number1",
            KeyName::Number2 => "Number2",
            KeyName::Number3 => "Number3",
            KeyName::Number4 => "Number4",
            KeyName::Number5 => "Number5",
            KeyName::Number6 => "Number6",
            KeyName::Number7 => "Number7",
            KeyName::Number8 => "Number8",
            KeyName::Number9 => "Number9",
            KeyName::ShiftL => "ShiftL",
            KeyName::CtrlL => "CtrlL",
            KeyName::AltL => "AltL",
            KeyName::F1 => "F1",
            KeyName::F2 => "F2",
            KeyName::F3 => "F3",
            KeyName::F4 => "F4",
            KeyName::F5 => "F5",
            KeyName::F6 => "F6",
            KeyName::F7 => "F7",
            KeyName::F8 => "F8",
            KeyName::F9 => "F9",
            KeyName::F10 => "F10",
            KeyName::F11 => "F11",
            KeyName::F12 => "F12",
        }
    }

    /// Maps a typed character to the key that produces it without modifiers.
    ///
    /// Only lowercase letters map to letter keys, since an unmodified press
    /// types lowercase; `' '` is `Space` and `'\n'`/`'\r'` are `Return`.
    /// Anything else, uppercase included, returns `None` and must be injected
    /// by character code instead.
    pub fn for_char(c: char) -> Option<KeyName> {
        match c {
            'a'..='z' => Some(LETTERS[(c as u8 - b'a') as usize]),
            '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
            ' ' => Some(KeyName::Space),
            '\n' | '\r' => Some(KeyName::Return),
            _ => None,
        }
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_scancode())
    }
}

impl FromStr for KeyName {
    type Err = KeyNameError;

    /// Parses a scancode name, ignoring ASCII case (`down`, `Down`, `DOWN`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KEYS
            .iter()
            .copied()
            .find(|k| k.as_scancode().eq_ignore_ascii_case(s))
            .ok_or_else(|| KeyNameError(s.to_string()))
    }
}

impl TryFrom<String> for KeyName {
    type Error = KeyNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyName> for String {
    fn from(key: KeyName) -> Self {
        key.as_scancode().to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_parses_back_from_its_scancode() {
        for key in ALL_KEYS {
            assert_eq!(key.as_scancode().parse::<KeyName>(), Ok(key));
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("down".parse::<KeyName>(), Ok(KeyName::Down));
        assert_eq!("HOME".parse::<KeyName>(), Ok(KeyName::Home));
        assert_eq!("backspace".parse::<KeyName>(), Ok(KeyName::Backspace));
    }

    #[test]
    fn test_parse_unknown_name_returns_error() {
        // Arrange / Act
        let result = "Hyper".parse::<KeyName>();

        // Assert
        assert_eq!(result, Err(KeyNameError("Hyper".to_string())));
    }

    #[test]
    fn test_backspace_uses_monitor_spelling() {
        assert_eq!(KeyName::Backspace.as_scancode(), "BackSpace");
    }

    #[test]
    fn test_for_char_maps_letters_digits_and_whitespace() {
        assert_eq!(KeyName::for_char('a'), Some(KeyName::A));
        assert_eq!(KeyName::for_char('7'), Some(KeyName::Number7));
        assert_eq!(KeyName::for_char(' '), Some(KeyName::Space));
        assert_eq!(KeyName::for_char('\n'), Some(KeyName::Return));
        assert_eq!(KeyName::for_char('+'), None);
    }

    #[test]
    fn test_for_char_leaves_uppercase_to_injection() {
        assert_eq!(KeyName::for_char('Q'), None);
        assert_eq!(KeyName::for_char('A'), None);
    }

    #[test]
    fn test_all_keys_table_has_no_duplicates() {
        let mut names: Vec<&str> = ALL_KEYS.iter().map(|k| k.as_scancode()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_KEYS.len());
    }
}
