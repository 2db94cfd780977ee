//! Configuration for the adjimg client
//!
//! The client has no runtime configurability: the binary always runs with
//! [`ClientConfig::default`], which carries the fixed window geometry, pool
//! capacity and quit key. The struct exists so those values live in one
//! validated place and can be described in TOML for tests and tooling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use xkbcommon::xkb;

/// Bytes per XRGB8888 pixel
pub const BYTES_PER_PIXEL: u32 = 4;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientConfig {
    /// Toplevel window settings
    #[serde(default)]
    pub window: WindowConfig,

    /// Shared memory pool settings
    #[serde(default)]
    pub shm: ShmConfig,

    /// Keyboard handling
    #[serde(default)]
    pub input: InputConfig,
}

/// Toplevel window geometry and title
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Title set once on the toplevel
    pub title: String,

    /// Buffer width in pixels
    pub width: u32,

    /// Buffer height in pixels
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShmConfig {
    /// Size of the shared memory pool in bytes
    pub pool_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// XKB keysym name that terminates the client
    pub quit_keysym: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "adjimg".to_string(),
            width: 640,
            height: 480,
        }
    }
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 16 * 1024 * 1024,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            quit_keysym: "q".to_string(),
        }
    }
}

impl WindowConfig {
    /// Row pitch of the buffer in bytes
    pub fn stride(&self) -> u32 {
        self.width * BYTES_PER_PIXEL
    }

    /// Bytes covered by the visible width x height rectangle
    pub fn buffer_size(&self) -> usize {
        self.stride() as usize * self.height as usize
    }
}

impl InputConfig {
    /// Resolves the quit keysym name to its raw keysym value
    pub fn quit_keysym(&self) -> Option<u32> {
        let sym = u32::from(xkb::keysym_from_name(&self.quit_keysym, xkb::KEYSYM_NO_FLAGS));
        (sym != xkb::keysyms::KEY_NoSymbol).then_some(sym)
    }
}

impl ClientConfig {
    /// Renders the configuration as TOML for the startup log
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize client configuration")
    }

    /// Parse and validate a TOML document
    #[cfg(test)]
    pub(crate) fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(contents).context("Failed to parse client configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let window = &self.window;

        if window.width == 0 || window.height == 0 {
            anyhow::bail!(
                "Invalid window size {}x{}: both dimensions must be non-zero",
                window.width,
                window.height
            );
        }

        // Geometry travels as i32 on the wire
        if window.width > i32::MAX as u32 / BYTES_PER_PIXEL || window.height > i32::MAX as u32 {
            anyhow::bail!(
                "Invalid window size {}x{}: exceeds protocol limits",
                window.width,
                window.height
            );
        }

        if self.shm.pool_capacity > i32::MAX as usize {
            anyhow::bail!(
                "Invalid pool_capacity {}: must fit in a signed 32-bit size",
                self.shm.pool_capacity
            );
        }

        if window.buffer_size() > self.shm.pool_capacity {
            anyhow::bail!(
                "Invalid pool_capacity {}: a {}x{} buffer needs {} bytes",
                self.shm.pool_capacity,
                window.width,
                window.height,
                window.buffer_size()
            );
        }

        if self.input.quit_keysym().is_none() {
            anyhow::bail!("Unknown quit keysym: {}", self.input.quit_keysym);
        }

        Ok(())
    }
}


#[cfg(test)]
mod property_tests;
