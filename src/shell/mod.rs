//! XDG-Shell surface negotiation
//!
//! Drives the handshake that turns a bare `wl_surface` into a visible
//! toplevel window.
//!
//! # State Machine
//!
//! 1. **Created**: `wl_surface` exists, no role yet
//! 2. **AwaitingConfigure**: `xdg_surface` created, compositor owes a configure
//! 3. **Configured**: configure acknowledged, nothing presented yet
//! 4. **Committed**: buffer attached, damaged and committed
//!
//! # Configure Sequence
//!
//! - Compositor sends configure with serial N
//! - Client acks serial N before it attaches anything
//! - Attach, damage and commit always go out in that order
//!
//! Later configures are acked and answered by re-presenting the same buffer;
//! there is no resize handling.

use log::{debug, info, warn};
use thiserror::Error;

use crate::error::ClientError;
use crate::session::SurfaceRequests;

/// Surface state in the negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// Surface created but no shell role yet
    Created,
    /// Shell surface exists, waiting for the first configure
    AwaitingConfigure,
    /// Configure acknowledged but no buffer committed yet
    Configured,
    /// Buffer committed, window is visible
    Committed,
}

/// Violations of the configure/ack ordering
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    #[error("configure serial {serial} arrived before the shell surface existed")]
    ConfigureBeforeShellSurface { serial: u32 },

    #[error("buffer attach attempted before any configure was acknowledged")]
    BufferBeforeAck,

    #[error("configure serial {serial} arrived before the buffer was filled")]
    BufferNotReady { serial: u32 },
}

/// Negotiation state for the single toplevel
#[derive(Debug)]
pub struct ShellNegotiator {
    state: ShellState,
    width: i32,
    height: i32,
    /// Last acknowledged configure serial
    last_acked_serial: Option<u32>,
    configure_count: u64,
    commit_count: u64,
}

impl ShellNegotiator {
    /// Creates surface, shell surface and toplevel in protocol order
    ///
    /// Finishes with a buffer-less commit so the compositor sends the first
    /// configure.
    pub fn create<R>(title: &str, width: i32, height: i32, requests: &mut R) -> Result<Self, ClientError>
    where
        R: SurfaceRequests + ?Sized,
    {
        requests.create_surface()?;
        let mut negotiator = Self {
            state: ShellState::Created,
            width,
            height,
            last_acked_serial: None,
            configure_count: 0,
            commit_count: 0,
        };

        requests.create_shell_surface()?;
        negotiator.transition_state(ShellState::AwaitingConfigure);

        requests.create_toplevel()?;
        negotiator.set_title(title, requests)?;

        requests.commit()?;
        negotiator.commit_count += 1;

        info!("🪟 Created {}x{} toplevel \"{}\"", width, height, title);
        Ok(negotiator)
    }

    pub fn set_title<R>(&mut self, title: &str, requests: &mut R) -> Result<(), ClientError>
    where
        R: SurfaceRequests + ?Sized,
    {
        requests.set_title(title)
    }

    /// Handles `xdg_surface.configure`
    ///
    /// `buffer_ready` must only be true once every visible pixel is written.
    pub fn configure<R>(&mut self, serial: u32, buffer_ready: bool, requests: &mut R) -> Result<(), ClientError>
    where
        R: SurfaceRequests + ?Sized,
    {
        if self.state == ShellState::Created {
            return Err(ShellError::ConfigureBeforeShellSurface { serial }.into());
        }

        self.configure_count += 1;
        requests.ack_configure(serial)?;
        self.last_acked_serial = Some(serial);
        debug!("Acknowledged configure serial {}", serial);

        if self.state == ShellState::AwaitingConfigure {
            self.transition_state(ShellState::Configured);
        }

        if !buffer_ready {
            return Err(ShellError::BufferNotReady { serial }.into());
        }

        if self.state == ShellState::Committed {
            debug!("Re-presenting buffer for configure serial {}", serial);
        }
        self.present(requests)
    }

    /// Handles `xdg_wm_base.ping`, valid in every state
    pub fn ping<R>(serial: u32, requests: &mut R) -> Result<(), ClientError>
    where
        R: SurfaceRequests + ?Sized,
    {
        debug!("Answering ping serial {}", serial);
        requests.pong(serial)
    }

    fn present<R>(&mut self, requests: &mut R) -> Result<(), ClientError>
    where
        R: SurfaceRequests + ?Sized,
    {
        if self.last_acked_serial.is_none() {
            warn!("Refusing to attach a buffer before ack_configure");
            return Err(ShellError::BufferBeforeAck.into());
        }

        requests.attach(0, 0)?;
        requests.damage(0, 0, self.width, self.height)?;
        requests.commit()?;
        self.commit_count += 1;

        if self.state != ShellState::Committed {
            self.transition_state(ShellState::Committed);
            info!("✨ Window is visible");
        }
        Ok(())
    }

    fn transition_state(&mut self, new_state: ShellState) {
        if self.state != new_state {
            debug!("Shell surface state transition: {:?} -> {:?}", self.state, new_state);
            self.state = new_state;
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn last_acked_serial(&self) -> Option<u32> {
        self.last_acked_serial
    }

    pub fn configure_count(&self) -> u64 {
        self.configure_count
    }

    /// Commits sent so far, including the initial buffer-less one
    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }
}

#[cfg(test)]
mod tests;
