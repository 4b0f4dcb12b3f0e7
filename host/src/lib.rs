//! Host side of the language bridge.
//!
//! [`Session::start`] runs the startup sequence: wait for the engine module,
//! mirror the workspace, construct the engine with the mirror's accessor and
//! the transport's relay, then bind it. [`serve`] exposes the resulting
//! transport over a framed byte stream.

pub mod logging;

mod serve;
mod session;

pub use serve::{serve, serve_stdio};
pub use session::{Session, StartupError};
