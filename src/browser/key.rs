//! Named key tokens for `keyPress` actions.
//!
//! A `keyPress` argument is either a single character, sent as-is, or one of
//! these named tokens, translated to the WebDriver key code point before
//! being dispatched to the focused element.

use std::ops::Deref;
use std::str::FromStr;

/// A named key understood by the `keyPress` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Backspace key
    Backspace,
    /// Tab key
    Tab,
    /// Clear
    Clear,
    /// Return key
    Return,
    /// Enter key
    Enter,
    /// Shift key
    Shift,
    /// Control key
    Control,
    /// Alt key
    Alt,
    /// Pause key
    Pause,
    /// Escape key
    Escape,
    /// Space bar
    Space,
    /// Page Up key
    PageUp,
    /// Page Down key
    PageDown,
    /// End key
    End,
    /// Home key
    Home,
    /// Left arrow key
    Left,
    /// Up arrow key
    Up,
    /// Right arrow key
    Right,
    /// Down arrow key
    Down,
    /// Insert key
    Insert,
    /// Delete key
    Delete,
}

impl Deref for Key {
    type Target = str;

    fn deref(&self) -> &str {
        match self {
            Key::Backspace => "\u{e003}",
            Key::Tab => "\u{e004}",
            Key::Clear => "\u{e005}",
            Key::Return => "\u{e006}",
            Key::Enter => "\u{e007}",
            Key::Shift => "\u{e008}",
            Key::Control => "\u{e009}",
            Key::Alt => "\u{e00a}",
            Key::Pause => "\u{e00b}",
            Key::Escape => "\u{e00c}",
            Key::Space => "\u{e00d}",
            Key::PageUp => "\u{e00e}",
            Key::PageDown => "\u{e00f}",
            Key::End => "\u{e010}",
            Key::Home => "\u{e011}",
            Key::Left => "\u{e012}",
            Key::Up => "\u{e013}",
            Key::Right => "\u{e014}",
            Key::Down => "\u{e015}",
            Key::Insert => "\u{e016}",
            Key::Delete => "\u{e017}",
        }
    }
}

impl FromStr for Key {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s {
            "Backspace" => Key::Backspace,
            "Tab" => Key::Tab,
            "Clear" => Key::Clear,
            "Return" => Key::Return,
            "Enter" => Key::Enter,
            "Shift" => Key::Shift,
            "Control" => Key::Control,
            "Alt" => Key::Alt,
            "Pause" => Key::Pause,
            "Escape" => Key::Escape,
            "Space" => Key::Space,
            "PageUp" => Key::PageUp,
            "PageDown" => Key::PageDown,
            "End" => Key::End,
            "Home" => Key::Home,
            "Left" | "ArrowLeft" => Key::Left,
            "Up" | "ArrowUp" => Key::Up,
            "Right" | "ArrowRight" => Key::Right,
            "Down" | "ArrowDown" => Key::Down,
            "Insert" => Key::Insert,
            "Delete" => Key::Delete,
            _ => return Err(()),
        };
        Ok(key)
    }
}

/// Translate a `keyPress` argument to the text to send to the focused
/// element.
///
/// Single characters pass through unchanged; multi-character arguments must
/// name a key token.
pub fn key_text(arg: &str) -> Option<String> {
    if arg.chars().count() == 1 {
        return Some(arg.to_string());
    }
    arg.parse::<Key>().ok().map(|key| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_characters_pass_through() {
        assert_eq!(key_text("a").as_deref(), Some("a"));
        assert_eq!(key_text("ä").as_deref(), Some("ä"));
    }

    #[test]
    fn named_tokens_translate_to_code_points() {
        assert_eq!(key_text("Enter").as_deref(), Some("\u{e007}"));
        assert_eq!(key_text("Tab").as_deref(), Some("\u{e004}"));
        assert_eq!(key_text("Escape").as_deref(), Some("\u{e00c}"));
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert_eq!(key_text("Bogus"), None);
    }
}
