//! Copy to the system clipboard: arboard first, OSC 52 when arboard can't
//! reach a clipboard (headless, SSH). Blocking; run through the dispatcher.
//!
//! The OSC 52 fallback only builds the escape sequence. The terminal belongs to
//! the render loop, so the sequence is written there between frames.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub trait ClipboardTransport {
    fn write_text(&self, text: &str) -> Result<(), String>;
}

pub struct NativeClipboard;

impl ClipboardTransport for NativeClipboard {
    fn write_text(&self, text: &str) -> Result<(), String> {
        let mut cb = arboard::Clipboard::new().map_err(|e| e.to_string())?;
        cb.set_text(text.to_string()).map_err(|e| e.to_string())
    }
}

/// Terminal escape sequence; works over SSH when the terminal supports it.
pub struct Osc52;

impl Osc52 {
    pub fn sequence(text: &str) -> String {
        format!("\x1b]52;c;{}\x07", STANDARD.encode(text.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Copied {
    Native,
    /// Still has to be written to the terminal.
    Terminal(String),
}

impl Copied {
    pub fn via(&self) -> &'static str {
        match self {
            Copied::Native => "system clipboard",
            Copied::Terminal(_) => "terminal (OSC 52)",
        }
    }
}

pub fn copy_with(native: &dyn ClipboardTransport, text: &str) -> Copied {
    match native.write_text(text) {
        Ok(()) => Copied::Native,
        Err(e) => {
            tracing::debug!("system clipboard unavailable, falling back to OSC 52: {e}");
            Copied::Terminal(Osc52::sequence(text))
        }
    }
}

pub fn copy(text: &str) -> Copied {
    copy_with(&NativeClipboard, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Fake {
        ok: bool,
        seen: RefCell<Vec<String>>,
    }

    impl ClipboardTransport for Fake {
        fn write_text(&self, text: &str) -> Result<(), String> {
            self.seen.borrow_mut().push(text.to_string());
            if self.ok { Ok(()) } else { Err("unavailable".into()) }
        }
    }

    fn fake(ok: bool) -> Fake {
        Fake { ok, seen: RefCell::new(Vec::new()) }
    }

    #[test]
    fn test_native_success_needs_no_terminal_write() {
        let native = fake(true);
        assert_eq!(copy_with(&native, "hi"), Copied::Native);
        assert_eq!(native.seen.borrow().as_slice(), ["hi"]);
    }

    #[test]
    fn test_fallback_hands_back_sequence_instead_of_writing() {
        let native = fake(false);
        let copied = copy_with(&native, "hello");
        assert_eq!(copied, Copied::Terminal("\x1b]52;c;aGVsbG8=\x07".into()));
        assert_eq!(copied.via(), "terminal (OSC 52)");
    }

    #[test]
    fn test_osc52_sequence() {
        assert_eq!(Osc52::sequence("hello"), "\x1b]52;c;aGVsbG8=\x07");
    }
}
