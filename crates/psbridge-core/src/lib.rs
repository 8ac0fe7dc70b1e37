//! Domain types shared across the psbridge workspace.
//!
//! Everything the shell bridge produces or is keyed by lives here:
//! ordered [`Record`]s of tagged [`Value`]s, opaque [`Credentials`] with
//! their canonical pool key, and the structured [`ExecutionError`] a failed
//! remote command is parsed into.

pub mod credentials;
pub mod error;
pub mod value;

pub use credentials::Credentials;
pub use error::ExecutionError;
pub use value::{Record, Value};
