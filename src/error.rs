//! Error tiers for the adjimg client
//!
//! Everything in [`ClientError`] is fatal: it ends the process with
//! [`FATAL_EXIT_STATUS`] after a diagnostic on stderr. Recoverable protocol
//! conditions (missing seat, unsupported keymap) never become errors; they are
//! logged as warnings and degrade keyboard input instead.

use std::io;

use thiserror::Error;
use wayland_client::{ConnectError, DispatchError};

use crate::shell::ShellError;

/// Exit status for every fatal path (`-1` as seen by the parent process).
pub const FATAL_EXIT_STATUS: u8 = 255;

/// Unrecoverable setup and protocol failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to open wayland display: {0}")]
    Connect(#[from] ConnectError),

    #[error("wayland dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("failed to bind {interface} (name {name}, version {version})")]
    Bind {
        interface: String,
        name: u32,
        version: u32,
    },

    #[error("compositor does not advertise required global {0}")]
    MissingGlobal(&'static str),

    #[error("failed to create shared memory object: {0}")]
    ShmCreate(#[source] io::Error),

    #[error("failed to resize shared memory object: {0}")]
    ShmResize(#[source] io::Error),

    #[error("failed to mmap shared memory object: {0}")]
    ShmMap(#[source] io::Error),

    #[error("invalid buffer layout: {0}")]
    Layout(String),

    #[error("failed to create {0}")]
    ObjectCreation(&'static str),

    #[error("shell negotiation failed: {0}")]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
