//! workenv-pty: Container shell sessions behind a pseudo-terminal.
//!
//! Spawns a container runtime (`docker run --rm -i -t ...`) attached to a
//! PTY, drains its output on a dedicated reader thread, and exposes a
//! send / receive-until-prompt surface over it.
//!
//! # Architecture
//!
//! - [`SpawnSpec`]: Image, command, mounts, and environment for one session.
//! - [`PtyHandle`]: Low-level PTY process management (spawn, write, wait, kill).
//! - [`Mailbox`]: Ordered byte chunks handed from the reader thread to the caller.
//! - [`Session`]: The `Unstarted → Running → Stopped` lifecycle over all of the above.

pub mod decode;
pub mod error;
pub mod mailbox;
pub mod mount;
pub mod pty;
pub mod session;
pub mod spec;

pub use decode::{Decoder, Encoding};
pub use error::PtyError;
pub use mailbox::Mailbox;
pub use mount::Mount;
pub use pty::PtyHandle;
pub use session::{AbortHandle, Session, SessionId, SessionState};
pub use spec::SpawnSpec;
