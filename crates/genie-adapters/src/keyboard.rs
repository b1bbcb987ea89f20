//! Raw key sequences for driving the chat CLI's interactive pickers.

use std::time::Duration;

use genie_proto::{BridgeError, BridgeResult};
use tracing::{debug, info};

use crate::channel::ChildProcessChannel;

/// Pause between repeated presses of the same key.
pub const KEY_DELAY: Duration = Duration::from_millis(50);

/// Pause between navigation steps and before confirming a selection.
pub const STEP_DELAY: Duration = Duration::from_millis(100);

/// A named key and the bytes a terminal sends for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
}

impl Key {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Key::Up => b"\x1b[A",
            Key::Down => b"\x1b[B",
            Key::Right => b"\x1b[C",
            Key::Left => b"\x1b[D",
            Key::Enter => b"\r",
            Key::Escape => b"\x1b",
            Key::Tab => b"\t",
            Key::Backspace => b"\x7f",
            Key::Delete => b"\x1b[3~",
            Key::Home => b"\x1b[H",
            Key::End => b"\x1b[F",
            Key::PageUp => b"\x1b[5~",
            Key::PageDown => b"\x1b[6~",
        }
    }
}

/// The control code for ctrl+`letter`.
///
/// Case-insensitive; anything but an ASCII letter is rejected.
pub fn ctrl_code(letter: char) -> BridgeResult<u8> {
    if !letter.is_ascii_alphabetic() {
        return Err(BridgeError::InvalidKey(letter));
    }
    Ok(letter.to_ascii_lowercase() as u8 - b'a' + 1)
}

/// Sends keystrokes to a channel.
pub struct Keyboard<'a> {
    channel: &'a mut dyn ChildProcessChannel,
    delay: Duration,
}

impl<'a> Keyboard<'a> {
    pub fn new(channel: &'a mut dyn ChildProcessChannel) -> Self {
        Self::with_delay(channel, KEY_DELAY)
    }

    pub fn with_delay(channel: &'a mut dyn ChildProcessChannel, delay: Duration) -> Self {
        Self { channel, delay }
    }

    pub fn press(&mut self, key: Key) -> BridgeResult<()> {
        debug!(?key, "Pressing key");
        self.channel.send_raw(key.bytes())?;
        Ok(())
    }

    /// Presses `key` `count` times, pausing between presses.
    pub async fn press_n(&mut self, key: Key, count: usize) -> BridgeResult<()> {
        for i in 0..count {
            self.press(key)?;
            if i + 1 < count {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(())
    }

    pub fn ctrl(&mut self, letter: char) -> BridgeResult<()> {
        let code = ctrl_code(letter)?;
        debug!(key = %letter.to_ascii_uppercase(), "Pressing ctrl");
        self.channel.send_raw(&[code])?;
        Ok(())
    }

    /// Clears the current input line (ctrl+u).
    pub fn clear_line(&mut self) -> BridgeResult<()> {
        self.ctrl('u')
    }

    /// Types `text` one character at a time.
    pub async fn type_text(&mut self, text: &str) -> BridgeResult<()> {
        let mut buf = [0u8; 4];
        for c in text.chars() {
            self.channel.send_raw(c.encode_utf8(&mut buf).as_bytes())?;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(())
    }

    /// Moves down `down` and up `up` entries, then optionally confirms.
    pub async fn navigate_menu(&mut self, down: usize, up: usize, select: bool) -> BridgeResult<()> {
        info!(down, up, select, "Navigating menu");
        if down > 0 {
            self.press_n(Key::Down, down).await?;
            tokio::time::sleep(STEP_DELAY).await;
        }
        if up > 0 {
            self.press_n(Key::Up, up).await?;
            tokio::time::sleep(STEP_DELAY).await;
        }
        if select {
            self.press(Key::Enter)?;
        }
        Ok(())
    }

    /// Selects the 1-based `option` of a menu whose first entry is highlighted.
    pub async fn select_option(&mut self, option: usize) -> BridgeResult<()> {
        if option == 0 {
            return Err(BridgeError::InvalidOption(option));
        }
        info!(option, "Selecting menu option");
        self.navigate_menu(option - 1, 0, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;

    #[test]
    fn test_ctrl_codes() {
        assert_eq!(ctrl_code('a').unwrap(), 1);
        assert_eq!(ctrl_code('C').unwrap(), 3);
        assert_eq!(ctrl_code('z').unwrap(), 26);
        assert!(matches!(ctrl_code('1'), Err(BridgeError::InvalidKey('1'))));
        assert!(matches!(ctrl_code('é'), Err(BridgeError::InvalidKey('é'))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_option_moves_then_confirms() {
        let mut channel = ScriptedChannel::new();
        let log = channel.clone();

        Keyboard::new(&mut channel).select_option(3).await.unwrap();

        assert_eq!(log.sent(), vec!["\x1b[B", "\x1b[B", "\r"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_first_option_only_confirms() {
        let mut channel = ScriptedChannel::new();
        let log = channel.clone();

        Keyboard::new(&mut channel).select_option(1).await.unwrap();

        assert_eq!(log.sent(), vec!["\r"]);
    }

    #[tokio::test]
    async fn test_select_option_zero_is_rejected() {
        let mut channel = ScriptedChannel::new();
        let log = channel.clone();

        let err = Keyboard::new(&mut channel).select_option(0).await.unwrap_err();

        assert!(matches!(err, BridgeError::InvalidOption(0)));
        assert!(log.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_without_select() {
        let mut channel = ScriptedChannel::new();
        let log = channel.clone();

        Keyboard::new(&mut channel).navigate_menu(1, 2, false).await.unwrap();

        assert_eq!(log.sent(), vec!["\x1b[B", "\x1b[A", "\x1b[A"]);
    }

    #[tokio::test]
    async fn test_ctrl_and_named_keys() {
        let mut channel = ScriptedChannel::new();
        let log = channel.clone();

        let mut keyboard = Keyboard::with_delay(&mut channel, Duration::ZERO);
        keyboard.ctrl('c').unwrap();
        keyboard.press(Key::Escape).unwrap();
        keyboard.press(Key::PageDown).unwrap();
        keyboard.type_text("hi").await.unwrap();

        assert_eq!(log.sent(), vec!["\x03", "\x1b", "\x1b[6~", "h", "i"]);
    }
}
