//! # adjimg
//!
//! A minimal Wayland client: it maps one 640×480 toplevel filled with random
//! noise from a shared-memory buffer, and exits when `q` is pressed or the
//! compositor hangs up.
//!
//! ## Architecture
//!
//! - `registry`: watch-list of compositor globals and their bindings
//! - `shm`: the memfd-backed pixel pool and its single buffer
//! - `shell`: xdg-shell configure/ack negotiation
//! - `input`: seat capabilities, XKB keymap and quit-key detection
//! - `session`: the state owner and the event sink / request seams
//! - `wayland`: `wayland-client` adapter routing events into the session
//! - `dispatch`: connect, discover, then block on events
//! - `config`, `error`, `logging`: ambient plumbing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use adjimg::{run, ClientConfig};
//!
//! fn main() -> Result<(), adjimg::ClientError> {
//!     let reason = run(ClientConfig::default())?;
//!     println!("stopped: {:?}", reason);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod logging;
pub mod registry;
pub mod session;
pub mod shell;
pub mod shm;
pub mod wayland;

pub use config::ClientConfig;
pub use dispatch::run;
pub use error::{ClientError, FATAL_EXIT_STATUS};
pub use session::{ClientSession, ExitReason};

/// Crate version, as reported by `--version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
