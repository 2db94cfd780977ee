//! Session context and protocol seams
//!
//! [`ClientSession`] owns every piece of client state: the capability
//! registry, the shared pixel buffer, the shell negotiator and the input
//! translator. The transport adapter never touches them directly. It forwards
//! each incoming event to the matching sink trait ([`RegistrySink`],
//! [`ShellSink`], [`SeatSink`], [`KeyboardSink`]) and hands the session a
//! [`Requests`] implementation for everything that goes back out.

use std::os::fd::{BorrowedFd, OwnedFd};

use log::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::input::{DeviceChange, InputTranslator, KeyOutcome, KeymapOutcome, ModifierState};
use crate::registry::{CapabilityRegistry, GlobalBinding};
use crate::shell::{ShellError, ShellNegotiator};
use crate::shm::{BufferLayout, PixelFormat, SharedPixelBuffer};

/// Binds advertised globals
pub trait RegistryRequests {
    fn bind(&mut self, binding: &GlobalBinding) -> Result<()>;
}

/// `wl_shm` pool and buffer creation
pub trait PoolRequests {
    fn create_pool(&mut self, fd: BorrowedFd<'_>, capacity: usize) -> Result<()>;
    fn create_buffer(&mut self, layout: &BufferLayout) -> Result<()>;
}

/// Surface, shell and toplevel requests
#[cfg_attr(test, mockall::automock)]
pub trait SurfaceRequests {
    fn create_surface(&mut self) -> Result<()>;
    fn create_shell_surface(&mut self) -> Result<()>;
    fn create_toplevel(&mut self) -> Result<()>;
    fn set_title(&mut self, title: &str) -> Result<()>;
    fn ack_configure(&mut self, serial: u32) -> Result<()>;
    /// Attaches the single carved buffer
    fn attach(&mut self, x: i32, y: i32) -> Result<()>;
    fn damage(&mut self, x: i32, y: i32, width: i32, height: i32) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn pong(&mut self, serial: u32) -> Result<()>;
}

/// Seat and keyboard device requests
pub trait SeatRequests {
    fn get_keyboard(&mut self) -> Result<()>;
    fn release_keyboard(&mut self) -> Result<()>;
    fn release_seat(&mut self) -> Result<()>;
}

/// Every request the client can send
pub trait Requests: RegistryRequests + PoolRequests + SurfaceRequests + SeatRequests {}

impl<T> Requests for T where T: RegistryRequests + PoolRequests + SurfaceRequests + SeatRequests {}

/// `wl_registry` events
pub trait RegistrySink {
    fn global(&mut self, name: u32, interface: &str, version: u32, requests: &mut dyn Requests);
    fn global_remove(&mut self, name: u32);
}

/// `xdg_wm_base` and `xdg_surface` events
pub trait ShellSink {
    fn configure(&mut self, serial: u32, requests: &mut dyn Requests);
    fn ping(&mut self, serial: u32, requests: &mut dyn Requests);
}

/// `wl_seat` events
pub trait SeatSink {
    fn capabilities(&mut self, keyboard: bool, requests: &mut dyn Requests);
}

/// `wl_keyboard` events
pub trait KeyboardSink {
    fn keymap(&mut self, format: u32, fd: OwnedFd, size: u32, requests: &mut dyn Requests);
    fn key(&mut self, scan_code: u32, pressed: bool);
    fn modifiers(&mut self, modifiers: ModifierState);
}

/// Why the client stopped without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The quit key was pressed
    QuitKey,
    /// The compositor closed the connection
    ConnectionClosed,
}

#[derive(Debug)]
enum Status {
    Running,
    Quit,
    Failed(ClientError),
    /// The fatal error was handed out by [`ClientSession::outcome`]
    Reported,
}

/// Sole owner of all client state
#[derive(Debug)]
pub struct ClientSession {
    config: ClientConfig,
    registry: CapabilityRegistry,
    buffer: Option<SharedPixelBuffer>,
    shell: Option<ShellNegotiator>,
    input: InputTranslator,
    status: Status,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let quit_keysym = config
            .input
            .quit_keysym()
            .ok_or_else(|| anyhow::anyhow!("Unknown quit keysym: {}", config.input.quit_keysym))?;

        Ok(Self {
            config,
            registry: CapabilityRegistry::new(),
            buffer: None,
            shell: None,
            input: InputTranslator::new(quit_keysym),
            status: Status::Running,
        })
    }

    /// Runs once the initial round-trip has delivered every advertisement
    ///
    /// Checks the required globals, provisions and fills the pixel buffer, and
    /// creates the toplevel.
    pub fn finish_discovery<R>(&mut self, requests: &mut R) -> Result<()>
    where
        R: Requests + ?Sized,
    {
        if let Some(Err(err)) = self.outcome() {
            return Err(err);
        }
        self.registry.verify()?;

        let window = self.config.window.clone();
        let mut buffer = SharedPixelBuffer::provision(self.config.shm.pool_capacity)?;
        buffer.register_pool(requests)?;
        buffer.carve_buffer(
            BufferLayout::packed(window.width, window.height, PixelFormat::Xrgb8888),
            requests,
        )?;
        buffer.fill_noise(&mut rand::thread_rng())?;
        self.buffer = Some(buffer);

        let shell = ShellNegotiator::create(
            &window.title,
            window.width as i32,
            window.height as i32,
            requests,
        )?;
        self.shell = Some(shell);
        Ok(())
    }

    /// Whether a quit or fatal error was recorded; later events are dropped
    pub fn is_finished(&self) -> bool {
        !matches!(self.status, Status::Running)
    }

    /// Takes the recorded outcome, if any
    ///
    /// A fatal error is handed out once; the session stays finished.
    pub fn outcome(&mut self) -> Option<Result<ExitReason>> {
        match std::mem::replace(&mut self.status, Status::Reported) {
            Status::Running => {
                self.status = Status::Running;
                None
            }
            Status::Quit => {
                self.status = Status::Quit;
                Some(Ok(ExitReason::QuitKey))
            }
            Status::Failed(err) => Some(Err(err)),
            Status::Reported => None,
        }
    }

    fn fail(&mut self, err: ClientError) {
        debug!("Recording fatal error: {}", err);
        if !self.is_finished() {
            self.status = Status::Failed(err);
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> Option<&SharedPixelBuffer> {
        self.buffer.as_ref()
    }

    pub fn shell(&self) -> Option<&ShellNegotiator> {
        self.shell.as_ref()
    }

    pub fn input(&self) -> &InputTranslator {
        &self.input
    }

    fn disable_keyboard(&mut self, requests: &mut dyn Requests) {
        if let Err(e) = requests.release_keyboard() {
            warn!("Failed to release keyboard: {}", e);
        }
        if let Err(e) = requests.release_seat() {
            warn!("Failed to release seat: {}", e);
        }
        self.registry.release_seat();
        warn!("Keyboard input disabled");
    }
}

impl RegistrySink for ClientSession {
    fn global(&mut self, name: u32, interface: &str, version: u32, requests: &mut dyn Requests) {
        if self.is_finished() {
            return;
        }
        let Some(binding) = self.registry.offer(name, interface, version) else {
            return;
        };
        if let Err(err) = requests.bind(&binding) {
            self.fail(err);
        }
    }

    fn global_remove(&mut self, name: u32) {
        if !self.is_finished() {
            self.registry.remove(name);
        }
    }
}

impl ShellSink for ClientSession {
    fn configure(&mut self, serial: u32, requests: &mut dyn Requests) {
        if self.is_finished() {
            return;
        }
        let buffer_ready = self.buffer.as_ref().is_some_and(SharedPixelBuffer::is_filled);
        let result = match self.shell.as_mut() {
            Some(shell) => shell.configure(serial, buffer_ready, requests),
            None => Err(ShellError::ConfigureBeforeShellSurface { serial }.into()),
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }

    fn ping(&mut self, serial: u32, requests: &mut dyn Requests) {
        if self.is_finished() {
            return;
        }
        if let Err(err) = ShellNegotiator::ping(serial, requests) {
            self.fail(err);
        }
    }
}

impl SeatSink for ClientSession {
    fn capabilities(&mut self, keyboard: bool, requests: &mut dyn Requests) {
        if self.is_finished() || !self.registry.has_seat() {
            return;
        }
        let result = match self.input.on_capabilities(keyboard) {
            DeviceChange::Acquire => requests.get_keyboard(),
            DeviceChange::Release => requests.release_keyboard(),
            DeviceChange::Unchanged => Ok(()),
        };
        if let Err(err) = result {
            self.fail(err);
        }
    }
}

impl KeyboardSink for ClientSession {
    fn keymap(&mut self, format: u32, fd: OwnedFd, size: u32, requests: &mut dyn Requests) {
        if self.is_finished() {
            return;
        }
        if self.input.on_keymap(format, fd, size) == KeymapOutcome::Rejected {
            self.disable_keyboard(requests);
        }
    }

    fn key(&mut self, scan_code: u32, pressed: bool) {
        if self.is_finished() {
            return;
        }
        if self.input.on_key(scan_code, pressed) == KeyOutcome::Quit {
            info!("👋 Quit requested from keyboard");
            self.status = Status::Quit;
        }
    }

    fn modifiers(&mut self, modifiers: ModifierState) {
        if !self.is_finished() {
            self.input.on_modifiers(modifiers);
        }
    }
}

/// Recording [`Requests`] for driving a session without a compositor
#[doc(hidden)]
pub mod testing {
    use super::*;

    /// One outgoing request as seen by [`RecordingRequests`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Request {
        Bind { interface: String, name: u32, version: u32 },
        CreatePool { capacity: usize },
        CreateBuffer(BufferLayout),
        CreateSurface,
        CreateShellSurface,
        CreateToplevel,
        SetTitle(String),
        AckConfigure(u32),
        Attach(i32, i32),
        Damage(i32, i32, i32, i32),
        Commit,
        Pong(u32),
        GetKeyboard,
        ReleaseKeyboard,
        ReleaseSeat,
    }

    #[derive(Debug, Default)]
    pub struct RecordingRequests {
        pub calls: Vec<Request>,
        /// Interface whose bind should fail
        pub fail_bind: Option<String>,
    }

    impl RecordingRequests {
        pub fn position(&self, request: &Request) -> Option<usize> {
            self.calls.iter().position(|call| call == request)
        }

        pub fn count(&self, request: &Request) -> usize {
            self.calls.iter().filter(|call| *call == request).count()
        }
    }

    impl RegistryRequests for RecordingRequests {
        fn bind(&mut self, binding: &GlobalBinding) -> Result<()> {
            if self.fail_bind.as_deref() == Some(binding.interface.as_str()) {
                return Err(ClientError::Bind {
                    interface: binding.interface.clone(),
                    name: binding.name,
                    version: binding.version,
                });
            }
            self.calls.push(Request::Bind {
                interface: binding.interface.clone(),
                name: binding.name,
                version: binding.version,
            });
            Ok(())
        }
    }

    impl PoolRequests for RecordingRequests {
        fn create_pool(&mut self, _fd: BorrowedFd<'_>, capacity: usize) -> Result<()> {
            self.calls.push(Request::CreatePool { capacity });
            Ok(())
        }

        fn create_buffer(&mut self, layout: &BufferLayout) -> Result<()> {
            self.calls.push(Request::CreateBuffer(*layout));
            Ok(())
        }
    }

    impl SurfaceRequests for RecordingRequests {
        fn create_surface(&mut self) -> Result<()> {
            self.calls.push(Request::CreateSurface);
            Ok(())
        }

        fn create_shell_surface(&mut self) -> Result<()> {
            self.calls.push(Request::CreateShellSurface);
            Ok(())
        }

        fn create_toplevel(&mut self) -> Result<()> {
            self.calls.push(Request::CreateToplevel);
            Ok(())
        }

        fn set_title(&mut self, title: &str) -> Result<()> {
            self.calls.push(Request::SetTitle(title.to_string()));
            Ok(())
        }

        fn ack_configure(&mut self, serial: u32) -> Result<()> {
            self.calls.push(Request::AckConfigure(serial));
            Ok(())
        }

        fn attach(&mut self, x: i32, y: i32) -> Result<()> {
            self.calls.push(Request::Attach(x, y));
            Ok(())
        }

        fn damage(&mut self, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
            self.calls.push(Request::Damage(x, y, width, height));
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.calls.push(Request::Commit);
            Ok(())
        }

        fn pong(&mut self, serial: u32) -> Result<()> {
            self.calls.push(Request::Pong(serial));
            Ok(())
        }
    }

    impl SeatRequests for RecordingRequests {
        fn get_keyboard(&mut self) -> Result<()> {
            self.calls.push(Request::GetKeyboard);
            Ok(())
        }

        fn release_keyboard(&mut self) -> Result<()> {
            self.calls.push(Request::ReleaseKeyboard);
            Ok(())
        }

        fn release_seat(&mut self) -> Result<()> {
            self.calls.push(Request::ReleaseSeat);
            Ok(())
        }
    }
}
