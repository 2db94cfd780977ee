//! Keyboard input translation
//!
//! Turns `wl_keyboard` traffic into keysyms using the keymap the compositor
//! hands over. Lifecycle:
//!
//! `NoKeyboard -> AwaitingKeymap -> Ready -> Disabled`
//!
//! Raw evdev scan codes are offset by [`EVDEV_OFFSET`] into XKB keycodes
//! before lookup. A rejected keymap disables the keyboard for good.

use std::fmt;
use std::fs::File;
use std::os::fd::OwnedFd;

use log::{debug, info, trace, warn};
use memmap2::MmapOptions;
use xkbcommon::xkb;

/// Offset between evdev scan codes and XKB keycodes
pub const EVDEV_OFFSET: u32 = 8;

/// `wl_keyboard.keymap_format.xkb_v1`
pub const KEYMAP_FORMAT_XKB_V1: u32 = 1;

/// Compiled keymap plus the live key/modifier state derived from it
pub struct XkbSession {
    keymap: xkb::Keymap,
    state: xkb::State,
}

impl fmt::Debug for XkbSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XkbSession")
            .field("layouts", &self.keymap.num_layouts())
            .finish_non_exhaustive()
    }
}

impl XkbSession {
    fn compile(context: &xkb::Context, text: String) -> Option<Self> {
        let keymap = xkb::Keymap::new_from_string(
            context,
            text,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )?;
        let state = xkb::State::new(&keymap);
        Some(Self { keymap, state })
    }

    /// Whether `keycode` produces `keysym` now or on its base level
    fn produces(&self, keycode: u32, keysym: u32) -> bool {
        if u32::from(self.state.key_get_one_sym(keycode.into())) == keysym {
            return true;
        }
        let layout = self.state.key_get_layout(keycode.into());
        self.keymap
            .key_get_syms_by_level(keycode.into(), layout, 0)
            .iter()
            .any(|sym| u32::from(*sym) == keysym)
    }
}

/// Keyboard lifecycle
#[derive(Debug)]
pub enum KeyboardState {
    /// No keyboard device requested
    NoKeyboard,
    /// Device requested, keymap not yet received
    AwaitingKeymap,
    /// Keymap compiled, translating keys
    Ready(Box<XkbSession>),
    /// Keymap rejected, device and seat released
    Disabled,
}

impl KeyboardState {
    fn phase(&self) -> KeyboardPhase {
        match self {
            KeyboardState::NoKeyboard => KeyboardPhase::NoKeyboard,
            KeyboardState::AwaitingKeymap => KeyboardPhase::AwaitingKeymap,
            KeyboardState::Ready(_) => KeyboardPhase::Ready,
            KeyboardState::Disabled => KeyboardPhase::Disabled,
        }
    }
}

/// Data-free view of [`KeyboardState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardPhase {
    NoKeyboard,
    AwaitingKeymap,
    Ready,
    Disabled,
}

impl KeyboardPhase {
    fn can_transition_to(self, next: KeyboardPhase) -> bool {
        use KeyboardPhase::*;
        matches!(
            (self, next),
            (NoKeyboard, AwaitingKeymap)
                | (AwaitingKeymap, Ready)
                | (AwaitingKeymap, Disabled)
                | (AwaitingKeymap, NoKeyboard)
                | (Ready, Ready)
                | (Ready, Disabled)
                | (Ready, NoKeyboard)
        )
    }
}

/// What the seat's capability change requires from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    /// Request a `wl_keyboard` from the seat
    Acquire,
    /// Release the current `wl_keyboard`
    Release,
    Unchanged,
}

/// Result of a keymap event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeymapOutcome {
    Loaded,
    /// Keyboard is now disabled; release the device and the seat
    Rejected,
    /// Keymap arrived in a state that does not accept one
    Ignored,
}

/// Result of a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The quit key was pressed
    Quit,
    Pressed { keycode: u32, keysym: u32 },
    Released { keycode: u32, keysym: u32 },
    /// No keymap, or keyboard disabled
    Ignored,
}

/// Modifier masks from `wl_keyboard.modifiers`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// Consumes keyboard events and produces keysyms
#[derive(Debug)]
pub struct InputTranslator {
    context: XkbContext,
    state: KeyboardState,
    quit_keysym: u32,
    modifiers: ModifierState,
}

struct XkbContext(xkb::Context);

impl fmt::Debug for XkbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("XkbContext")
    }
}

impl InputTranslator {
    pub fn new(quit_keysym: u32) -> Self {
        Self {
            context: XkbContext(xkb::Context::new(xkb::CONTEXT_NO_FLAGS)),
            state: KeyboardState::NoKeyboard,
            quit_keysym,
            modifiers: ModifierState::default(),
        }
    }

    pub fn phase(&self) -> KeyboardPhase {
        self.state.phase()
    }

    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    fn transition(&mut self, next: KeyboardState) -> bool {
        let (from, to) = (self.state.phase(), next.phase());
        if !from.can_transition_to(to) {
            debug!("Rejected keyboard transition {:?} -> {:?}", from, to);
            return false;
        }
        if from != to {
            debug!("Keyboard state transition: {:?} -> {:?}", from, to);
        }
        self.state = next;
        true
    }

    /// Handles `wl_seat.capabilities`
    pub fn on_capabilities(&mut self, has_keyboard: bool) -> DeviceChange {
        match (self.phase(), has_keyboard) {
            (KeyboardPhase::NoKeyboard, true) => {
                self.transition(KeyboardState::AwaitingKeymap);
                info!("⌨️ Seat has a keyboard, requesting device");
                DeviceChange::Acquire
            }
            (KeyboardPhase::AwaitingKeymap | KeyboardPhase::Ready, false) => {
                self.transition(KeyboardState::NoKeyboard);
                info!("⌨️ Seat lost its keyboard");
                DeviceChange::Release
            }
            _ => DeviceChange::Unchanged,
        }
    }

    /// Handles `wl_keyboard.keymap`
    ///
    /// Takes ownership of `fd` and closes it before returning.
    pub fn on_keymap(&mut self, format: u32, fd: OwnedFd, size: u32) -> KeymapOutcome {
        if !matches!(self.phase(), KeyboardPhase::AwaitingKeymap | KeyboardPhase::Ready) {
            debug!("Ignoring keymap in {:?}", self.phase());
            return KeymapOutcome::Ignored;
        }

        if format != KEYMAP_FORMAT_XKB_V1 {
            warn!("Unsupported keymap format {}, disabling keyboard", format);
            self.transition(KeyboardState::Disabled);
            return KeymapOutcome::Rejected;
        }

        match self.load_keymap(fd, size) {
            Some(session) => {
                self.transition(KeyboardState::Ready(Box::new(session)));
                info!("⌨️ Keymap loaded ({} bytes)", size);
                KeymapOutcome::Loaded
            }
            None => {
                self.transition(KeyboardState::Disabled);
                KeymapOutcome::Rejected
            }
        }
    }

    fn load_keymap(&self, fd: OwnedFd, size: u32) -> Option<XkbSession> {
        let file = File::from(fd);
        let map = match unsafe { MmapOptions::new().len(size as usize).map_copy_read_only(&file) } {
            Ok(map) => map,
            Err(e) => {
                warn!("Failed to map keymap: {}, disabling keyboard", e);
                return None;
            }
        };

        let text = match std::str::from_utf8(&map) {
            Ok(text) => text.trim_end_matches('\0').to_string(),
            Err(e) => {
                warn!("Keymap is not valid UTF-8: {}, disabling keyboard", e);
                return None;
            }
        };

        let session = XkbSession::compile(&self.context.0, text);
        if session.is_none() {
            warn!("Failed to compile keymap, disabling keyboard");
        }
        session
    }

    /// Handles `wl_keyboard.key`
    pub fn on_key(&mut self, scan_code: u32, pressed: bool) -> KeyOutcome {
        let quit_keysym = self.quit_keysym;
        let phase = self.phase();
        let KeyboardState::Ready(session) = &mut self.state else {
            trace!("Ignoring scan code {} in {:?}", scan_code, phase);
            return KeyOutcome::Ignored;
        };

        let Some(keycode) = scan_code.checked_add(EVDEV_OFFSET) else {
            debug!("Ignoring out-of-range scan code {}", scan_code);
            return KeyOutcome::Ignored;
        };
        if session.produces(keycode, quit_keysym) {
            info!("🛑 Quit key pressed");
            return KeyOutcome::Quit;
        }

        let keysym = u32::from(session.state.key_get_one_sym(keycode.into()));
        let direction = if pressed {
            xkb::KeyDirection::Down
        } else {
            xkb::KeyDirection::Up
        };
        session.state.update_key(keycode.into(), direction);
        trace!(
            "Key {} ({}) {}",
            keycode,
            xkb::keysym_get_name(keysym.into()),
            if pressed { "pressed" } else { "released" }
        );

        if pressed {
            KeyOutcome::Pressed { keycode, keysym }
        } else {
            KeyOutcome::Released { keycode, keysym }
        }
    }

    /// Handles `wl_keyboard.modifiers`
    ///
    /// The single group value fills the depressed, latched and locked layout
    /// slots alike.
    pub fn on_modifiers(&mut self, modifiers: ModifierState) {
        let KeyboardState::Ready(session) = &mut self.state else {
            return;
        };
        session.state.update_mask(
            modifiers.depressed,
            modifiers.latched,
            modifiers.locked,
            modifiers.group,
            modifiers.group,
            modifiers.group,
        );
        self.modifiers = modifiers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::OwnedFd;

    const TEST_KEYMAP: &str = r#"xkb_keymap {
    xkb_keycodes "adjimg" {
        minimum = 8;
        maximum = 255;
        <AD01> = 24;
        <AD02> = 25;
    };
    xkb_types "adjimg" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
    };
    xkb_compatibility "adjimg" {
    };
    xkb_symbols "adjimg" {
        key <AD01> { [ q ] };
        key <AD02> { [ w ] };
    };
};
"#;

    fn keymap_fd(text: &str) -> (OwnedFd, u32) {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.write_all(&[0]).unwrap();
        (OwnedFd::from(file), text.len() as u32 + 1)
    }

    fn ready_translator() -> InputTranslator {
        let mut translator = InputTranslator::new(xkb::keysyms::KEY_q);
        assert_eq!(translator.on_capabilities(true), DeviceChange::Acquire);
        let (fd, size) = keymap_fd(TEST_KEYMAP);
        assert_eq!(
            translator.on_keymap(KEYMAP_FORMAT_XKB_V1, fd, size),
            KeymapOutcome::Loaded
        );
        translator
    }

    #[test]
    fn test_keyboard_capability_requests_device_once() {
        let mut translator = InputTranslator::new(xkb::keysyms::KEY_q);
        assert_eq!(translator.phase(), KeyboardPhase::NoKeyboard);

        assert_eq!(translator.on_capabilities(false), DeviceChange::Unchanged);
        assert_eq!(translator.on_capabilities(true), DeviceChange::Acquire);
        assert_eq!(translator.on_capabilities(true), DeviceChange::Unchanged);
        assert_eq!(translator.phase(), KeyboardPhase::AwaitingKeymap);
    }

    #[test]
    fn test_keys_before_keymap_are_ignored() {
        let mut translator = InputTranslator::new(xkb::keysyms::KEY_q);
        translator.on_capabilities(true);
        assert_eq!(translator.on_key(16, true), KeyOutcome::Ignored);
    }

    #[test]
    fn test_unsupported_format_disables_keyboard() {
        let mut translator = InputTranslator::new(xkb::keysyms::KEY_q);
        translator.on_capabilities(true);

        let (fd, size) = keymap_fd(TEST_KEYMAP);
        assert_eq!(translator.on_keymap(99, fd, size), KeymapOutcome::Rejected);
        assert_eq!(translator.phase(), KeyboardPhase::Disabled);

        // Disabled is terminal
        assert_eq!(translator.on_key(16, true), KeyOutcome::Ignored);
        assert_eq!(translator.on_capabilities(true), DeviceChange::Unchanged);
        let (fd, size) = keymap_fd(TEST_KEYMAP);
        assert_eq!(
            translator.on_keymap(KEYMAP_FORMAT_XKB_V1, fd, size),
            KeymapOutcome::Ignored
        );
        assert_eq!(translator.phase(), KeyboardPhase::Disabled);
    }

    #[test]
    fn test_garbage_keymap_disables_keyboard() {
        let mut translator = InputTranslator::new(xkb::keysyms::KEY_q);
        translator.on_capabilities(true);

        let (fd, size) = keymap_fd("this is not a keymap");
        assert_eq!(
            translator.on_keymap(KEYMAP_FORMAT_XKB_V1, fd, size),
            KeymapOutcome::Rejected
        );
        assert_eq!(translator.phase(), KeyboardPhase::Disabled);
    }

    #[test]
    fn test_scan_code_is_offset_by_eight() {
        let mut translator = ready_translator();

        // Scan code 17 -> keycode 25 -> w
        assert_eq!(
            translator.on_key(17, true),
            KeyOutcome::Pressed {
                keycode: 25,
                keysym: xkb::keysyms::KEY_w
            }
        );
        assert_eq!(
            translator.on_key(17, false),
            KeyOutcome::Released {
                keycode: 25,
                keysym: xkb::keysyms::KEY_w
            }
        );
    }

    #[test]
    fn test_quit_key_regardless_of_modifiers() {
        let mut translator = ready_translator();
        translator.on_modifiers(ModifierState {
            depressed: 0x1,
            latched: 0,
            locked: 0x2,
            group: 0,
        });
        assert_eq!(translator.on_key(16, true), KeyOutcome::Quit);
    }

    #[test]
    fn test_modifiers_only_apply_when_ready() {
        let mut translator = InputTranslator::new(xkb::keysyms::KEY_q);
        let mods = ModifierState {
            depressed: 1,
            latched: 0,
            locked: 0,
            group: 0,
        };
        translator.on_modifiers(mods);
        assert_eq!(translator.modifiers(), ModifierState::default());

        let mut translator = ready_translator();
        translator.on_modifiers(mods);
        assert_eq!(translator.modifiers(), mods);
    }

    #[test]
    fn test_losing_keyboard_returns_to_no_keyboard() {
        let mut translator = ready_translator();
        assert_eq!(translator.on_capabilities(false), DeviceChange::Release);
        assert_eq!(translator.phase(), KeyboardPhase::NoKeyboard);
        assert_eq!(translator.on_key(16, true), KeyOutcome::Ignored);
    }

    #[test]
    fn test_keymap_replacement_while_ready() {
        let mut translator = ready_translator();
        let (fd, size) = keymap_fd(TEST_KEYMAP);
        assert_eq!(
            translator.on_keymap(KEYMAP_FORMAT_XKB_V1, fd, size),
            KeymapOutcome::Loaded
        );
        assert_eq!(translator.phase(), KeyboardPhase::Ready);
    }

    #[test]
    fn test_out_of_range_scan_code_is_ignored() {
        let mut translator = ready_translator();
        assert_eq!(translator.on_key(u32::MAX, true), KeyOutcome::Ignored);
        assert_eq!(translator.on_key(u32::MAX - 7, false), KeyOutcome::Ignored);
        assert_eq!(translator.phase(), KeyboardPhase::Ready);
        assert_eq!(translator.on_key(16, true), KeyOutcome::Quit);
    }
}
