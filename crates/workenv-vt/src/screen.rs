use alacritty_terminal::event::VoidListener;
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::Term;

/// A read-only view into the terminal screen.
pub struct ScreenView<'a> {
    term: &'a Term<VoidListener>,
}

impl<'a> ScreenView<'a> {
    pub(crate) fn new(term: &'a Term<VoidListener>) -> Self {
        Self { term }
    }

    /// Number of visible rows.
    pub fn rows(&self) -> u16 {
        self.term.screen_lines() as u16
    }

    /// Number of columns.
    pub fn cols(&self) -> u16 {
        self.term.columns() as u16
    }

    /// Plain text of a single row with trailing blanks trimmed.
    ///
    /// Row 0 is the top of the visible screen. Out-of-range rows are empty.
    /// Spacer cells behind wide characters are skipped; combining marks
    /// stored on a cell are kept after its base character.
    pub fn line(&self, row: u16) -> String {
        if row as usize >= self.term.screen_lines() {
            return String::new();
        }

        let grid = self.term.grid();
        let row = &grid[Line(row as i32)];
        let mut text = String::with_capacity(self.term.columns());

        for col in 0..self.term.columns() {
            let cell = &row[Column(col)];
            if cell
                .flags
                .intersects(Flags::WIDE_CHAR_SPACER | Flags::LEADING_WIDE_CHAR_SPACER)
            {
                continue;
            }
            // A tab stop's first cell holds '\t'; the rest are already blank.
            text.push(if cell.c == '\t' { ' ' } else { cell.c });
            if let Some(marks) = cell.zerowidth() {
                text.extend(marks.iter());
            }
        }

        let trimmed = text.trim_end_matches(' ').len();
        text.truncate(trimmed);
        text
    }

    /// Every visible row, top to bottom. Always exactly `rows()` entries.
    pub fn lines(&self) -> Vec<String> {
        (0..self.rows()).map(|row| self.line(row)).collect()
    }
}
