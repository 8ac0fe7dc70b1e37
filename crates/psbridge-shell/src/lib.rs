//! Bridge to an interactive, text-oriented management shell.
//!
//! The shell exposes no machine API, only a line-buffered console, so this
//! crate drives it the hard way: commands are wrapped in sentinel markers
//! ([`script`]), pushed through a child process ([`transport`]), and the
//! scraped reply is parsed back into structured records ([`output`]) or a
//! structured error ([`error_output`]). A [`Session`] ties one logged-in
//! process to one parsing strategy.

pub mod error;
pub mod error_output;
pub mod output;
pub mod script;
pub mod session;
pub mod transport;

pub use error::{ParseError, ShellError, TransportError};
pub use output::{CommandOutput, OutputLayout, OutputStrategy};
pub use session::{Session, SessionBuilder};
pub use transport::{Capture, CommandTransport, PowerShellTransport};
