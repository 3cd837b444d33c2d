//! workenv-vt: Plain-text terminal rendering for the work environment.
//!
//! Provides a small API over `alacritty_terminal`. Raw PTY output (cursor
//! motion, colors, carriage-return redraws) goes in, and the final visible
//! screen comes out as rows of plain text.

pub mod render;
pub mod screen;
pub mod terminal;

pub use render::{render, Renderer, DEFAULT_COLS, DEFAULT_ROWS};
pub use screen::ScreenView;
pub use terminal::VtTerminal;
