//! One-shot rendering of a turn's raw output into plain lines.

use std::borrow::Cow;

use crate::terminal::VtTerminal;

/// Default screen height, matching the PTY the session allocates.
pub const DEFAULT_ROWS: u16 = 24;
/// Default screen width.
pub const DEFAULT_COLS: u16 = 80;

/// Renders raw terminal output onto a fixed-size screen.
///
/// Every call starts from a blank screen: a turn's output is bounded by the
/// previous and current prompt, so nothing needs to survive between calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Renderer {
    rows: u16,
    cols: u16,
}

impl Renderer {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Render `bytes` and return exactly `rows` lines, trailing blanks trimmed.
    ///
    /// Each screen position holds its last write, so redrawn prompts and
    /// progress bars collapse to their final state. Output taller than the
    /// screen scrolls off the top and is lost.
    pub fn render(&self, bytes: &[u8]) -> Vec<String> {
        let mut term = VtTerminal::new(self.cols, self.rows);
        term.write(&normalize_newlines(bytes));
        let lines = term.screen().lines();
        log::trace!(
            "rendered {} bytes onto {}x{} screen",
            bytes.len(),
            self.cols,
            self.rows
        );
        lines
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

/// Render `bytes` onto a fresh `rows` x `cols` screen.
pub fn render(bytes: &[u8], rows: u16, cols: u16) -> Vec<String> {
    Renderer::new(rows, cols).render(bytes)
}

/// Turn every bare `LF` into `CR LF`, as the tty's ONLCR output mode does.
///
/// PTY output already carries `CR LF`, so it comes back borrowed.
fn normalize_newlines(bytes: &[u8]) -> Cow<'_, [u8]> {
    let bare = bytes
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\n' && (i == 0 || bytes[i - 1] != b'\r'));
    if !bare {
        return Cow::Borrowed(bytes);
    }

    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 8);
    let mut prev = 0u8;
    for &b in bytes {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    Cow::Owned(out)
}
