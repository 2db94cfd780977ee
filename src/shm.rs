//! Shared pixel buffer
//!
//! One anonymous memfd is mapped read/write for the lifetime of the process,
//! handed to the compositor as a `wl_shm_pool`, and a single XRGB8888 buffer
//! is carved from its start. There is no recycling or double-buffering: the
//! buffer is filled exactly once before it is first attached, and the
//! compositor reads it concurrently with nothing but the commit as a barrier.
//! Drawing more than one frame would need a pool of buffers gated on
//! `wl_buffer.release`.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use log::{debug, info, warn};
use memmap2::{MmapMut, MmapOptions};
use rand::Rng;

use crate::error::{ClientError, Result};
use crate::session::PoolRequests;

/// Pixel formats the client can describe to `wl_shm`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit little-endian, top byte ignored, then R, G, B
    Xrgb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Geometry of the buffer carved from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl BufferLayout {
    /// Tightly packed layout at the start of the pool
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            offset: 0,
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
        }
    }

    /// Bytes from the pool start to the end of the last row
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.height as u64 * self.stride as u64
    }

    /// Checks the layout against a pool of `capacity` bytes
    pub fn validate(&self, capacity: usize) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ClientError::Layout(format!(
                "empty buffer {}x{}",
                self.width, self.height
            )));
        }
        if self.stride as u64 != self.width as u64 * self.format.bytes_per_pixel() as u64 {
            return Err(ClientError::Layout(format!(
                "stride {} does not match width {} at {} bytes per pixel",
                self.stride,
                self.width,
                self.format.bytes_per_pixel()
            )));
        }
        if self.end() > capacity as u64 {
            return Err(ClientError::Layout(format!(
                "buffer ends at byte {} but the pool holds {}",
                self.end(),
                capacity
            )));
        }
        Ok(())
    }
}

/// The mapped shared memory region and the single buffer carved from it
#[derive(Debug)]
pub struct SharedPixelBuffer {
    file: File,
    map: MmapMut,
    capacity: usize,
    pool_registered: bool,
    layout: Option<BufferLayout>,
    filled: bool,
}

impl SharedPixelBuffer {
    /// Creates a sealable memfd of exactly `capacity` bytes and maps it
    pub fn provision(capacity: usize) -> Result<Self> {
        let fd = create_memfd("wl_buffer_shm").map_err(ClientError::ShmCreate)?;
        let file = File::from(fd);

        file.set_len(capacity as u64)
            .map_err(ClientError::ShmResize)?;

        // The pool size is fixed, so forbid the compositor from seeing it change
        let sealed = unsafe {
            libc::fcntl(
                file.as_raw_fd(),
                libc::F_ADD_SEALS,
                libc::F_SEAL_SHRINK | libc::F_SEAL_GROW,
            )
        };
        if sealed < 0 {
            warn!(
                "Could not seal shared memory object: {}",
                io::Error::last_os_error()
            );
        }

        let map = unsafe { MmapOptions::new().len(capacity).map_mut(&file) }
            .map_err(ClientError::ShmMap)?;

        info!("🧠 Mapped {} byte shared memory pool", capacity);

        Ok(Self {
            file,
            map,
            capacity,
            pool_registered: false,
            layout: None,
            filled: false,
        })
    }

    /// Hands the memory object to the compositor as a pool
    pub fn register_pool<R>(&mut self, requests: &mut R) -> Result<()>
    where
        R: PoolRequests + ?Sized,
    {
        requests.create_pool(self.file.as_fd(), self.capacity)?;
        self.pool_registered = true;
        debug!("Registered {} byte wl_shm_pool", self.capacity);
        Ok(())
    }

    /// Requests the one buffer view this client ever uses
    pub fn carve_buffer<R>(&mut self, layout: BufferLayout, requests: &mut R) -> Result<()>
    where
        R: PoolRequests + ?Sized,
    {
        if !self.pool_registered {
            return Err(ClientError::ObjectCreation("wl_buffer (no wl_shm_pool)"));
        }
        if self.layout.is_some() {
            return Err(ClientError::Layout("a buffer was already carved from the pool".into()));
        }
        layout.validate(self.capacity)?;

        requests.create_buffer(&layout)?;
        debug!(
            "Carved {}x{} buffer at offset {} (stride {})",
            layout.width, layout.height, layout.offset, layout.stride
        );
        self.layout = Some(layout);
        Ok(())
    }

    /// Writes `pattern(x, y)` into every visible pixel of the carved buffer
    pub fn fill<F>(&mut self, mut pattern: F) -> Result<()>
    where
        F: FnMut(u32, u32) -> u32,
    {
        let layout = self
            .layout
            .ok_or_else(|| ClientError::Layout("no buffer carved to fill".into()))?;
        let bpp = layout.format.bytes_per_pixel() as usize;
        let row_bytes = layout.width as usize * bpp;

        for y in 0..layout.height {
            let start = layout.offset as usize + y as usize * layout.stride as usize;
            let row = &mut self.map[start..start + row_bytes];
            for (x, cell) in row.chunks_exact_mut(bpp).enumerate() {
                cell.copy_from_slice(&pattern(x as u32, y).to_le_bytes());
            }
        }

        self.filled = true;
        Ok(())
    }

    /// Fills the buffer with random noise
    pub fn fill_noise<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        self.fill(|_, _| rng.gen::<u32>())
    }

    /// Reads back one pixel of the carved buffer
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        let layout = self.layout?;
        if x >= layout.width || y >= layout.height {
            return None;
        }
        let start = layout.offset as usize
            + y as usize * layout.stride as usize
            + x as usize * layout.format.bytes_per_pixel() as usize;
        let bytes: [u8; 4] = self.map[start..start + 4].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Whether every visible pixel has been written
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn layout(&self) -> Option<&BufferLayout> {
        self.layout.as_ref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

fn create_memfd(name: &str) -> io::Result<OwnedFd> {
    let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
