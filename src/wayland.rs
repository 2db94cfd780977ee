//! Wayland transport adapter
//!
//! Implements [`Requests`](crate::session::Requests) on live `wayland-client` proxies and routes every
//! incoming event, by object type, into the session's sink traits.

use std::os::fd::BorrowedFd;

use log::{debug, trace};
use wayland_client::protocol::{
    wl_buffer, wl_compositor, wl_keyboard, wl_registry, wl_seat, wl_shm, wl_shm_pool, wl_surface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};

use crate::error::{ClientError, Result};
use crate::input::ModifierState;
use crate::registry::{Capability, GlobalBinding};
use crate::session::{
    ClientSession, KeyboardSink, PoolRequests, RegistryRequests, RegistrySink, SeatRequests,
    SeatSink, ShellSink, SurfaceRequests,
};
use crate::shm::{BufferLayout, PixelFormat};

/// Dispatch state: the session plus the proxies it talks through
pub struct WaylandClient {
    pub session: ClientSession,
    pub objects: WaylandObjects,
}

impl WaylandClient {
    pub fn new(
        session: ClientSession,
        registry: wl_registry::WlRegistry,
        qh: QueueHandle<WaylandClient>,
    ) -> Self {
        Self {
            session,
            objects: WaylandObjects::new(registry, qh),
        }
    }

    /// Runs the post-round-trip setup against the live proxies
    pub fn finish_discovery(&mut self) -> Result<()> {
        self.session.finish_discovery(&mut self.objects)
    }
}

/// Every proxy the client owns
pub struct WaylandObjects {
    qh: QueueHandle<WaylandClient>,
    registry: wl_registry::WlRegistry,
    compositor: Option<wl_compositor::WlCompositor>,
    shm: Option<wl_shm::WlShm>,
    wm_base: Option<xdg_wm_base::XdgWmBase>,
    seat: Option<wl_seat::WlSeat>,
    pool: Option<wl_shm_pool::WlShmPool>,
    buffer: Option<wl_buffer::WlBuffer>,
    surface: Option<wl_surface::WlSurface>,
    xdg_surface: Option<xdg_surface::XdgSurface>,
    toplevel: Option<xdg_toplevel::XdgToplevel>,
    keyboard: Option<wl_keyboard::WlKeyboard>,
}

impl WaylandObjects {
    fn new(registry: wl_registry::WlRegistry, qh: QueueHandle<WaylandClient>) -> Self {
        Self {
            qh,
            registry,
            compositor: None,
            shm: None,
            wm_base: None,
            seat: None,
            pool: None,
            buffer: None,
            surface: None,
            xdg_surface: None,
            toplevel: None,
            keyboard: None,
        }
    }

    fn bind_proxy<I>(&self, binding: &GlobalBinding) -> Result<I>
    where
        I: Proxy + 'static,
        WaylandClient: Dispatch<I, ()>,
    {
        let version = binding.version.min(I::interface().version);
        let proxy: I = self.registry.bind(binding.name, version, &self.qh, ());
        if proxy.id().is_null() {
            return Err(ClientError::Bind {
                interface: binding.interface.clone(),
                name: binding.name,
                version,
            });
        }
        debug!("Bound {} v{}", binding.interface, version);
        Ok(proxy)
    }

    fn require<'a, T>(object: &'a Option<T>, name: &'static str) -> Result<&'a T> {
        object.as_ref().ok_or(ClientError::ObjectCreation(name))
    }
}

impl RegistryRequests for WaylandObjects {
    fn bind(&mut self, binding: &GlobalBinding) -> Result<()> {
        match binding.capability {
            Capability::Compositor => self.compositor = Some(self.bind_proxy(binding)?),
            Capability::Shm => self.shm = Some(self.bind_proxy(binding)?),
            Capability::WmBase => self.wm_base = Some(self.bind_proxy(binding)?),
            Capability::Seat => self.seat = Some(self.bind_proxy(binding)?),
        }
        Ok(())
    }
}

impl PoolRequests for WaylandObjects {
    fn create_pool(&mut self, fd: BorrowedFd<'_>, capacity: usize) -> Result<()> {
        let shm = Self::require(&self.shm, "wl_shm_pool (no wl_shm)")?;
        let size = i32::try_from(capacity)
            .map_err(|_| ClientError::Layout(format!("pool of {} bytes is too large", capacity)))?;
        self.pool = Some(shm.create_pool(fd, size, &self.qh, ()));
        Ok(())
    }

    fn create_buffer(&mut self, layout: &BufferLayout) -> Result<()> {
        let pool = Self::require(&self.pool, "wl_buffer (no wl_shm_pool)")?;
        let format = match layout.format {
            PixelFormat::Xrgb8888 => wl_shm::Format::Xrgb8888,
        };
        self.buffer = Some(pool.create_buffer(
            layout.offset as i32,
            layout.width as i32,
            layout.height as i32,
            layout.stride as i32,
            format,
            &self.qh,
            (),
        ));
        Ok(())
    }
}

impl SurfaceRequests for WaylandObjects {
    fn create_surface(&mut self) -> Result<()> {
        let compositor = Self::require(&self.compositor, "wl_surface")?;
        self.surface = Some(compositor.create_surface(&self.qh, ()));
        Ok(())
    }

    fn create_shell_surface(&mut self) -> Result<()> {
        let wm_base = Self::require(&self.wm_base, "xdg_surface")?;
        let surface = Self::require(&self.surface, "xdg_surface (no wl_surface)")?;
        self.xdg_surface = Some(wm_base.get_xdg_surface(surface, &self.qh, ()));
        Ok(())
    }

    fn create_toplevel(&mut self) -> Result<()> {
        let xdg_surface = Self::require(&self.xdg_surface, "xdg_toplevel")?;
        self.toplevel = Some(xdg_surface.get_toplevel(&self.qh, ()));
        Ok(())
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        Self::require(&self.toplevel, "xdg_toplevel")?.set_title(title.to_string());
        Ok(())
    }

    fn ack_configure(&mut self, serial: u32) -> Result<()> {
        Self::require(&self.xdg_surface, "xdg_surface")?.ack_configure(serial);
        Ok(())
    }

    fn attach(&mut self, x: i32, y: i32) -> Result<()> {
        let surface = Self::require(&self.surface, "wl_surface")?;
        let buffer = Self::require(&self.buffer, "wl_buffer")?;
        surface.attach(Some(buffer), x, y);
        Ok(())
    }

    fn damage(&mut self, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        Self::require(&self.surface, "wl_surface")?.damage(x, y, width, height);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Self::require(&self.surface, "wl_surface")?.commit();
        Ok(())
    }

    fn pong(&mut self, serial: u32) -> Result<()> {
        Self::require(&self.wm_base, "xdg_wm_base")?.pong(serial);
        Ok(())
    }
}

impl SeatRequests for WaylandObjects {
    fn get_keyboard(&mut self) -> Result<()> {
        let seat = Self::require(&self.seat, "wl_keyboard (no wl_seat)")?;
        self.keyboard = Some(seat.get_keyboard(&self.qh, ()));
        Ok(())
    }

    fn release_keyboard(&mut self) -> Result<()> {
        if let Some(keyboard) = self.keyboard.take() {
            // wl_keyboard.release needs v3
            if keyboard.version() >= 3 {
                keyboard.release();
            }
        }
        Ok(())
    }

    fn release_seat(&mut self) -> Result<()> {
        if let Some(seat) = self.seat.take() {
            // wl_seat.release needs v5
            if seat.version() >= 5 {
                seat.release();
            }
        }
        Ok(())
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandClient {
    fn event(
        state: &mut Self,
        _: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                trace!("Global: {} v{} (name={})", interface, version, name);
                state
                    .session
                    .global(name, &interface, version, &mut state.objects);
            }
            wl_registry::Event::GlobalRemove { name } => state.session.global_remove(name),
            _ => {}
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for WaylandClient {
    fn event(
        state: &mut Self,
        _: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            state.session.ping(serial, &mut state.objects);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for WaylandClient {
    fn event(
        state: &mut Self,
        _: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            state.session.configure(serial, &mut state.objects);
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for WaylandClient {
    fn event(
        _: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                debug!("Toplevel configure {}x{} ignored, size is fixed", width, height);
            }
            xdg_toplevel::Event::Close => debug!("Toplevel close request ignored"),
            _ => {}
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for WaylandClient {
    fn event(
        state: &mut Self,
        _: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities {
                capabilities: WEnum::Value(capabilities),
            } => {
                let keyboard = capabilities.contains(wl_seat::Capability::Keyboard);
                state.session.capabilities(keyboard, &mut state.objects);
            }
            wl_seat::Event::Name { name } => debug!("Seat name: {}", name),
            _ => {}
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for WaylandClient {
    fn event(
        state: &mut Self,
        _: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                let format = match format {
                    WEnum::Value(format) => u32::from(format),
                    WEnum::Unknown(raw) => raw,
                };
                state.session.keymap(format, fd, size, &mut state.objects);
            }
            wl_keyboard::Event::Key { key, state: key_state, .. } => {
                let pressed = key_state == WEnum::Value(wl_keyboard::KeyState::Pressed);
                state.session.key(key, pressed);
            }
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => state.session.modifiers(ModifierState {
                depressed: mods_depressed,
                latched: mods_latched,
                locked: mods_locked,
                group,
            }),
            _ => {}
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ()> for WaylandClient {
    fn event(
        _: &mut Self,
        _: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            // Single static frame: nothing is redrawn, so release is informational
            trace!("Compositor released the buffer");
        }
    }
}

delegate_noop!(WaylandClient: wl_compositor::WlCompositor);
delegate_noop!(WaylandClient: wl_shm_pool::WlShmPool);
delegate_noop!(WaylandClient: ignore wl_shm::WlShm);
delegate_noop!(WaylandClient: ignore wl_surface::WlSurface);
