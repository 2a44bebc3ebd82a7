use std::{
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use anyhow::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Ctrl,
    Alt,
    Shift,
    Space,
    Enter,
    Tab,
    Esc,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Delete,
    Backspace,
    /// Function keys F1 through F12.
    F(u8),
}

impl NamedKey {
    pub fn parse(name: &str) -> Option<Self> {
        let key = match name.trim().to_ascii_lowercase().as_str() {
            "ctrl" => NamedKey::Ctrl,
            "alt" => NamedKey::Alt,
            "shift" => NamedKey::Shift,
            "space" => NamedKey::Space,
            "enter" => NamedKey::Enter,
            "tab" => NamedKey::Tab,
            "esc" => NamedKey::Esc,
            "up" => NamedKey::Up,
            "down" => NamedKey::Down,
            "left" => NamedKey::Left,
            "right" => NamedKey::Right,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "page_up" => NamedKey::PageUp,
            "page_down" => NamedKey::PageDown,
            "delete" => NamedKey::Delete,
            "backspace" => NamedKey::Backspace,
            other => {
                let number = other.strip_prefix('f')?.parse::<u8>().ok()?;
                if !(1..=12).contains(&number) {
                    return None;
                }
                NamedKey::F(number)
            }
        };
        Some(key)
    }

    pub fn name(self) -> String {
        match self {
            NamedKey::Ctrl => "ctrl".into(),
            NamedKey::Alt => "alt".into(),
            NamedKey::Shift => "shift".into(),
            NamedKey::Space => "space".into(),
            NamedKey::Enter => "enter".into(),
            NamedKey::Tab => "tab".into(),
            NamedKey::Esc => "esc".into(),
            NamedKey::Up => "up".into(),
            NamedKey::Down => "down".into(),
            NamedKey::Left => "left".into(),
            NamedKey::Right => "right".into(),
            NamedKey::Home => "home".into(),
            NamedKey::End => "end".into(),
            NamedKey::PageUp => "page_up".into(),
            NamedKey::PageDown => "page_down".into(),
            NamedKey::Delete => "delete".into(),
            NamedKey::Backspace => "backspace".into(),
            NamedKey::F(n) => format!("f{n}"),
        }
    }

    pub fn all_names() -> Vec<String> {
        let mut names: Vec<String> = [
            "ctrl", "alt", "shift", "space", "enter", "tab", "esc", "up", "down", "left", "right",
            "home", "end", "page_up", "page_down", "delete", "backspace",
        ]
        .iter()
        .map(|name| name.to_string())
        .collect();
        names.extend((1..=12).map(|n| format!("f{n}")));
        names
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Named(NamedKey),
    Char(char),
}

impl Key {
    /// A named key or a single character.
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(named) = NamedKey::parse(token) {
            return Some(Key::Named(named));
        }
        let mut chars = token.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(Key::Char(c.to_ascii_lowercase())),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Named(named) => f.write_str(&named.name()),
            Key::Char(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn label(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// OS-level keyboard and mouse injection. Implementations are called from
/// the single action thread.
pub trait InputBackend: Send + Sync + fmt::Debug {
    /// Presses `keys` in order, then releases them in reverse.
    fn press_keys(&self, keys: &[Key]) -> Result<()>;
    fn hold_key(&self, key: Key, duration: Duration) -> Result<()>;
    fn type_text(&self, text: &str) -> Result<()>;
    fn click(&self, button: MouseButton, count: u32) -> Result<()>;
    fn hold_button(&self, button: MouseButton, duration: Duration) -> Result<()>;
    fn cursor_position(&self) -> Result<(i32, i32)>;
    fn move_cursor(&self, x: i32, y: i32) -> Result<()>;
    fn scroll(&self, dx: i32, dy: i32) -> Result<()>;
    /// Left-button drag from the current position to `(x, y)`.
    fn drag_to(&self, x: i32, y: i32) -> Result<()>;
    fn screen_size(&self) -> (i32, i32);
}

/// Backend that only logs the injection it would perform and tracks a
/// virtual cursor.
#[derive(Debug)]
pub struct LogBackend {
    screen: (i32, i32),
    cursor: Mutex<(i32, i32)>,
}

impl Default for LogBackend {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl LogBackend {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            screen: (width, height),
            cursor: Mutex::new((width / 2, height / 2)),
        }
    }

    fn set_cursor(&self, x: i32, y: i32) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = (x, y);
    }
}

impl InputBackend for LogBackend {
    fn press_keys(&self, keys: &[Key]) -> Result<()> {
        let combo: Vec<String> = keys.iter().map(Key::to_string).collect();
        log::info!("input: press {}", combo.join("+"));
        Ok(())
    }

    fn hold_key(&self, key: Key, duration: Duration) -> Result<()> {
        log::info!("input: hold {key} for {duration:?}");
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        log::info!("input: type {text:?}");
        Ok(())
    }

    fn click(&self, button: MouseButton, count: u32) -> Result<()> {
        log::info!("input: {} click x{count}", button.label());
        Ok(())
    }

    fn hold_button(&self, button: MouseButton, duration: Duration) -> Result<()> {
        log::info!("input: hold {} button for {duration:?}", button.label());
        Ok(())
    }

    fn cursor_position(&self) -> Result<(i32, i32)> {
        Ok(*self.cursor.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
        log::info!("input: move cursor to ({x}, {y})");
        self.set_cursor(x, y);
        Ok(())
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        log::info!("input: scroll ({dx}, {dy})");
        Ok(())
    }

    fn drag_to(&self, x: i32, y: i32) -> Result<()> {
        log::info!("input: drag to ({x}, {y})");
        self.set_cursor(x, y);
        Ok(())
    }

    fn screen_size(&self) -> (i32, i32) {
        self.screen
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    events: Mutex<Vec<String>>,
    cursor: Mutex<(i32, i32)>,
    fail: bool,
}

#[cfg(test)]
impl RecordingBackend {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_cursor(x: i32, y: i32) -> Self {
        Self {
            cursor: Mutex::new((x, y)),
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, event: String) -> Result<()> {
        if self.fail {
            anyhow::bail!("injection rejected");
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
impl InputBackend for RecordingBackend {
    fn press_keys(&self, keys: &[Key]) -> Result<()> {
        let combo: Vec<String> = keys.iter().map(Key::to_string).collect();
        self.push(format!("keys {}", combo.join("+")))
    }

    fn hold_key(&self, key: Key, duration: Duration) -> Result<()> {
        self.push(format!("hold {key} {}ms", duration.as_millis()))
    }

    fn type_text(&self, text: &str) -> Result<()> {
        self.push(format!("type {text}"))
    }

    fn click(&self, button: MouseButton, count: u32) -> Result<()> {
        self.push(format!("click {} x{count}", button.label()))
    }

    fn hold_button(&self, button: MouseButton, duration: Duration) -> Result<()> {
        let millis = duration.as_millis();
        self.push(format!("hold-button {} {millis}ms", button.label()))
    }

    fn cursor_position(&self) -> Result<(i32, i32)> {
        Ok(*self.cursor.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = (x, y);
        self.push(format!("move {x},{y}"))
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.push(format!("scroll {dx},{dy}"))
    }

    fn drag_to(&self, x: i32, y: i32) -> Result<()> {
        self.push(format!("drag {x},{y}"))
    }

    fn screen_size(&self) -> (i32, i32) {
        (800, 600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_keys_and_function_keys() {
        assert_eq!(NamedKey::parse("Ctrl"), Some(NamedKey::Ctrl));
        assert_eq!(NamedKey::parse("page_down"), Some(NamedKey::PageDown));
        assert_eq!(NamedKey::parse("f12"), Some(NamedKey::F(12)));
        assert_eq!(NamedKey::parse("f13"), None);
        assert_eq!(NamedKey::parse("hello"), None);
        assert_eq!(NamedKey::all_names().len(), 29);
    }

    #[test]
    fn parses_single_characters() {
        assert_eq!(Key::parse("C"), Some(Key::Char('c')));
        assert_eq!(Key::parse("tab"), Some(Key::Named(NamedKey::Tab)));
        assert_eq!(Key::parse("ab"), None);
        assert_eq!(Key::parse(""), None);
    }

    #[test]
    fn log_backend_tracks_cursor() {
        let backend = LogBackend::new(100, 50);
        assert_eq!(backend.cursor_position().ok(), Some((50, 25)));
        backend.move_cursor(10, 20).ok();
        assert_eq!(backend.cursor_position().ok(), Some((10, 20)));
        assert_eq!(backend.screen_size(), (100, 50));
    }
}
