use alacritty_terminal::event::VoidListener;
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::term::{Config, Term};
use alacritty_terminal::vte::ansi;

use crate::screen::ScreenView;

/// Dimensions helper for creating the terminal.
///
/// `total_lines` equals `screen_lines`, so nothing is kept above the top
/// of the visible window.
struct TermSize {
    columns: usize,
    screen_lines: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }

    fn screen_lines(&self) -> usize {
        self.screen_lines
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

/// A fixed-size virtual screen.
///
/// Wraps `alacritty_terminal::Term` and a VTE parser. Terminal events
/// (title changes, bell, device status replies) are discarded: the screen
/// is only ever read back as text.
pub struct VtTerminal {
    term: Term<VoidListener>,
    parser: ansi::Processor,
}

impl VtTerminal {
    /// Create a blank terminal with the given dimensions and no scrollback.
    ///
    /// Zero dimensions are bumped to one so the grid is never empty.
    pub fn new(cols: u16, rows: u16) -> Self {
        let config = Config {
            scrolling_history: 0,
            ..Config::default()
        };

        let size = TermSize {
            columns: cols.max(1) as usize,
            screen_lines: rows.max(1) as usize,
        };

        Self {
            term: Term::new(config, &size, VoidListener),
            parser: ansi::Processor::new(),
        }
    }

    /// Feed raw PTY output bytes into the terminal.
    pub fn write(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.term, bytes);
    }

    /// Get a read-only view of the terminal screen.
    pub fn screen(&self) -> ScreenView<'_> {
        ScreenView::new(&self.term)
    }

    /// Current cursor position as `(row, col)`, row 0 being the top line.
    pub fn cursor_position(&self) -> (u16, u16) {
        let point = self.term.grid().cursor.point;
        (point.line.0.max(0) as u16, point.column.0 as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_terminal_dimensions() {
        let term = VtTerminal::new(80, 24);
        let screen = term.screen();
        assert_eq!(screen.cols(), 80);
        assert_eq!(screen.rows(), 24);
    }

    #[test]
    fn test_zero_dimensions_are_clamped() {
        let term = VtTerminal::new(0, 0);
        assert_eq!(term.screen().cols(), 1);
        assert_eq!(term.screen().rows(), 1);
    }

    #[test]
    fn test_write_hello() {
        let mut term = VtTerminal::new(80, 24);
        term.write(b"hello");
        assert_eq!(term.screen().line(0), "hello");
        assert_eq!(term.cursor_position(), (0, 5));
    }

    #[test]
    fn test_carriage_return_moves_cursor_home() {
        let mut term = VtTerminal::new(10, 1);
        term.write(b"AAA\r");
        assert_eq!(term.cursor_position(), (0, 0));
        term.write(b"BB");
        assert_eq!(term.screen().line(0), "BBA");
    }

    #[test]
    fn test_cursor_wraps_to_next_line() {
        let mut term = VtTerminal::new(10, 5);
        term.write(b"0123456789AB");

        assert_eq!(term.cursor_position(), (1, 2));
        assert_eq!(term.screen().line(0), "0123456789");
        assert_eq!(term.screen().line(1), "AB");
    }

    #[test]
    fn test_no_scrollback_above_window() {
        let mut term = VtTerminal::new(10, 2);
        term.write(b"one\r\ntwo\r\nthree");
        assert_eq!(term.screen().lines(), vec!["two", "three"]);
    }
}
