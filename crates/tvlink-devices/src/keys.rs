/*!
 * Remote-control keys.
 *
 * The key set is closed. Adapters implementing `KeyControl` map every key
 * to their own wire representation with an exhaustive match.
 */
use std::fmt;

use serde::{Deserialize, Serialize};

/// A remote-control key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Navigate up
    Up,
    /// Navigate down
    Down,
    /// Navigate left
    Left,
    /// Navigate right
    Right,
    /// Confirm the current selection
    Ok,
    /// Go back
    Back,
    /// Go to the home screen
    Home,
    /// Open the menu
    Menu,
    /// Show information about the current content
    Info,
    /// Leave the current application
    Exit,
    /// Digit 0
    Num0,
    /// Digit 1
    Num1,
    /// Digit 2
    Num2,
    /// Digit 3
    Num3,
    /// Digit 4
    Num4,
    /// Digit 5
    Num5,
    /// Digit 6
    Num6,
    /// Digit 7
    Num7,
    /// Digit 8
    Num8,
    /// Digit 9
    Num9,
    /// Toggle closed captions
    ClosedCaptions,
    /// Open the channel or content list
    List,
}

impl Key {
    /// Every key
    pub const ALL: [Key; 22] = [
        Key::Up,
        Key::Down,
        Key::Left,
        Key::Right,
        Key::Ok,
        Key::Back,
        Key::Home,
        Key::Menu,
        Key::Info,
        Key::Exit,
        Key::Num0,
        Key::Num1,
        Key::Num2,
        Key::Num3,
        Key::Num4,
        Key::Num5,
        Key::Num6,
        Key::Num7,
        Key::Num8,
        Key::Num9,
        Key::ClosedCaptions,
        Key::List,
    ];

    /// Name of the `KeyControl` operation pressing this key
    pub fn operation(&self) -> &'static str {
        match self {
            Key::Up => "Up",
            Key::Down => "Down",
            Key::Left => "Left",
            Key::Right => "Right",
            Key::Ok => "OK",
            Key::Back => "Back",
            Key::Home => "Home",
            Key::Menu => "Menu",
            Key::Info => "Info",
            Key::Exit => "Exit",
            Key::Num0 => "Num0",
            Key::Num1 => "Num1",
            Key::Num2 => "Num2",
            Key::Num3 => "Num3",
            Key::Num4 => "Num4",
            Key::Num5 => "Num5",
            Key::Num6 => "Num6",
            Key::Num7 => "Num7",
            Key::Num8 => "Num8",
            Key::Num9 => "Num9",
            Key::ClosedCaptions => "ClosedCaptions",
            Key::List => "List",
        }
    }

    /// Look a key up by its operation name
    pub fn from_operation(operation: &str) -> Option<Key> {
        Self::ALL.into_iter().find(|k| k.operation() == operation)
    }

    /// The digit key for `n`, if `n` is a single decimal digit
    pub fn digit(n: u8) -> Option<Key> {
        match n {
            0..=9 => Some(Self::ALL[10 + n as usize]),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityGroup;

    #[test]
    fn test_every_key_is_a_key_control_operation() {
        for key in Key::ALL {
            assert!(
                CapabilityGroup::KeyControl.exports(key.operation()),
                "{} missing from KeyControl",
                key
            );
        }
    }

    #[test]
    fn test_operation_lookup() {
        for key in Key::ALL {
            assert_eq!(Key::from_operation(key.operation()), Some(key));
        }
        assert_eq!(Key::from_operation("Send.KeyCode"), None);
    }

    #[test]
    fn test_digits() {
        assert_eq!(Key::digit(0), Some(Key::Num0));
        assert_eq!(Key::digit(5), Some(Key::Num5));
        assert_eq!(Key::digit(9), Some(Key::Num9));
        assert_eq!(Key::digit(10), None);
    }
}
