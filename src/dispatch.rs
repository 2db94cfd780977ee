//! Dispatch loop
//!
//! Connects, runs the discovery round-trip, builds the window and then blocks
//! on the event queue until the session finishes or the compositor goes away.

use log::{debug, info};
use wayland_client::backend::WaylandError;
use wayland_client::{Connection, DispatchError};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::{ClientSession, ExitReason};
use crate::wayland::WaylandClient;

/// Runs the client to completion
///
/// Returns the reason for a clean stop; any error is fatal. The connection is
/// dropped, and therefore closed, on every path.
pub fn run(config: ClientConfig) -> Result<ExitReason> {
    let session = ClientSession::new(config)?;

    let connection = Connection::connect_to_env()?;
    info!("🔌 Connected to Wayland display");

    let mut event_queue = connection.new_event_queue();
    let qh = event_queue.handle();
    let registry = connection.display().get_registry(&qh, ());
    let mut client = WaylandClient::new(session, registry, qh);

    if let Err(err) = event_queue.roundtrip(&mut client) {
        return classify(err);
    }
    debug!("Initial round-trip complete");
    client.finish_discovery()?;

    loop {
        if let Err(err) = event_queue.blocking_dispatch(&mut client) {
            return classify(err);
        }
        if let Some(outcome) = client.session.outcome() {
            if let Err(e) = connection.flush() {
                debug!("Flush before disconnect failed: {}", e);
            }
            return outcome;
        }
    }
}

/// Maps a dispatch failure to a clean stop or a fatal error
///
/// An I/O failure on the socket means the compositor closed the connection.
/// Everything else, including a protocol error, is fatal.
pub fn classify(err: DispatchError) -> Result<ExitReason> {
    match err {
        DispatchError::Backend(WaylandError::Io(io_err)) => {
            info!("🔌 Compositor closed the connection ({})", io_err);
            Ok(ExitReason::ConnectionClosed)
        }
        other => Err(ClientError::Dispatch(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_socket_closure_is_a_clean_stop() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = DispatchError::Backend(WaylandError::Io(io::Error::from(kind)));
            assert_eq!(classify(err).unwrap(), ExitReason::ConnectionClosed);
        }
    }

    #[test]
    fn test_malformed_message_is_fatal() {
        let err = DispatchError::BadMessage {
            sender_id: wayland_client::backend::ObjectId::null(),
            interface: "wl_keyboard",
            opcode: 0,
        };
        assert!(matches!(classify(err), Err(ClientError::Dispatch(_))));
    }
}
