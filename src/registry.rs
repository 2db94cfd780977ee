//! Capability registry
//!
//! Watches `wl_registry` advertisements and decides which globals the client
//! binds. Only four interfaces are of interest; everything else is ignored.
//! Each watched interface is bound once, for the first advertisement seen.

use log::{debug, info, warn};

use crate::error::{ClientError, Result};

/// Globals on the client's watch-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `wl_compositor`, creates surfaces
    Compositor,
    /// `wl_shm`, shared memory pools
    Shm,
    /// `xdg_wm_base`, shell base
    WmBase,
    /// `wl_seat`, optional input grouping
    Seat,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Compositor,
        Capability::Shm,
        Capability::WmBase,
        Capability::Seat,
    ];

    /// Matches an advertised interface string against the watch-list
    pub fn from_interface(interface: &str) -> Option<Self> {
        match interface {
            "wl_compositor" => Some(Capability::Compositor),
            "wl_shm" => Some(Capability::Shm),
            "xdg_wm_base" => Some(Capability::WmBase),
            "wl_seat" => Some(Capability::Seat),
            _ => None,
        }
    }

    pub fn interface(&self) -> &'static str {
        match self {
            Capability::Compositor => "wl_compositor",
            Capability::Shm => "wl_shm",
            Capability::WmBase => "xdg_wm_base",
            Capability::Seat => "wl_seat",
        }
    }

    /// Whether the client can run without this global
    pub fn is_required(&self) -> bool {
        !matches!(self, Capability::Seat)
    }

    /// Protocol version requested when binding
    ///
    /// `wl_shm` is pinned to version 1 since only the base format set is used.
    pub fn bind_version(&self, advertised: u32) -> u32 {
        match self {
            Capability::Shm => 1,
            _ => advertised,
        }
    }

    fn slot(&self) -> usize {
        match self {
            Capability::Compositor => 0,
            Capability::Shm => 1,
            Capability::WmBase => 2,
            Capability::Seat => 3,
        }
    }
}

/// A global the client decided to bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalBinding {
    /// Server-assigned global name
    pub name: u32,
    /// Advertised interface string
    pub interface: String,
    /// Version requested at bind time
    pub version: u32,
    pub capability: Capability,
}

/// Tracks the bound subset of advertised globals
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    bindings: [Option<GlobalBinding>; 4],
    /// Set once the seat was handed back; no later seat is bound
    seat_released: bool,
    ignored: usize,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one advertisement
    ///
    /// Returns the binding the caller must perform, or `None` when the global
    /// is not watched or its slot is already taken.
    pub fn offer(&mut self, name: u32, interface: &str, version: u32) -> Option<GlobalBinding> {
        let Some(capability) = Capability::from_interface(interface) else {
            self.ignored += 1;
            return None;
        };

        if capability == Capability::Seat && self.seat_released {
            debug!("Ignoring wl_seat (name {}), keyboard input was disabled", name);
            return None;
        }

        let slot = &mut self.bindings[capability.slot()];
        if let Some(existing) = slot {
            if capability == Capability::Seat {
                debug!(
                    "Ignoring additional wl_seat (name {}), only seat {} is used",
                    name, existing.name
                );
            } else {
                debug!(
                    "Ignoring duplicate {} advertisement (name {})",
                    interface, name
                );
            }
            return None;
        }

        let binding = GlobalBinding {
            name,
            interface: interface.to_string(),
            version: capability.bind_version(version),
            capability,
        };
        debug!(
            "Binding {} (name {}, advertised v{}, requested v{})",
            interface, name, version, binding.version
        );
        *slot = Some(binding.clone());
        Some(binding)
    }

    /// Handles a `global_remove` event
    pub fn remove(&mut self, name: u32) {
        if let Some(binding) = self.bindings.iter().flatten().find(|b| b.name == name) {
            warn!(
                "Compositor removed bound global {} (name {}), keeping the stale handle",
                binding.interface, name
            );
        }
    }

    /// Checks the bound set once the advertisement stream has been flushed
    pub fn verify(&self) -> Result<()> {
        for capability in Capability::ALL {
            if self.get(capability).is_some() {
                continue;
            }
            if capability.is_required() {
                return Err(ClientError::MissingGlobal(capability.interface()));
            }
            warn!("No seat found, keyboard input is unavailable");
        }

        info!(
            "🔗 Bound {} globals ({} unrelated advertisements ignored)",
            self.bindings.iter().flatten().count(),
            self.ignored
        );
        Ok(())
    }

    pub fn get(&self, capability: Capability) -> Option<&GlobalBinding> {
        self.bindings[capability.slot()].as_ref()
    }

    pub fn has_seat(&self) -> bool {
        self.get(Capability::Seat).is_some()
    }

    /// Forgets the seat binding after it was released to the compositor
    ///
    /// Later seat advertisements are ignored for the rest of the session.
    pub fn release_seat(&mut self) -> Option<GlobalBinding> {
        self.seat_released = true;
        self.bindings[Capability::Seat.slot()].take()
    }

    pub fn seat_released(&self) -> bool {
        self.seat_released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn advertise_core(registry: &mut CapabilityRegistry) {
        registry.offer(1, "wl_compositor", 6);
        registry.offer(2, "wl_shm", 2);
        registry.offer(3, "xdg_wm_base", 5);
    }

    #[test]
    fn test_binds_watch_list_only() {
        let mut registry = CapabilityRegistry::new();

        assert!(registry.offer(10, "wl_output", 4).is_none());
        assert!(registry.offer(11, "zwp_linux_dmabuf_v1", 4).is_none());

        let compositor = registry.offer(1, "wl_compositor", 6).unwrap();
        assert_eq!(compositor.capability, Capability::Compositor);
        assert_eq!(compositor.version, 6);
    }

    #[test]
    fn test_shm_is_pinned_to_version_one() {
        let mut registry = CapabilityRegistry::new();
        let shm = registry.offer(2, "wl_shm", 2).unwrap();
        assert_eq!(shm.version, 1);
    }

    #[test]
    fn test_first_seat_wins() {
        let mut registry = CapabilityRegistry::new();

        let first = registry.offer(7, "wl_seat", 8).unwrap();
        assert!(registry.offer(9, "wl_seat", 8).is_none());

        assert_eq!(registry.get(Capability::Seat), Some(&first));
        assert_eq!(registry.get(Capability::Seat).unwrap().name, 7);
    }

    #[test]
    fn test_verify_requires_core_globals() {
        let mut registry = CapabilityRegistry::new();
        registry.offer(1, "wl_compositor", 6);
        registry.offer(3, "xdg_wm_base", 5);

        match registry.verify() {
            Err(ClientError::MissingGlobal(interface)) => assert_eq!(interface, "wl_shm"),
            other => panic!("expected missing wl_shm, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_seat_is_not_fatal() {
        let mut registry = CapabilityRegistry::new();
        advertise_core(&mut registry);

        assert!(registry.verify().is_ok());
        assert!(!registry.has_seat());
    }

    #[test]
    fn test_released_seat_is_never_rebound() {
        let mut registry = CapabilityRegistry::new();
        advertise_core(&mut registry);
        registry.offer(4, "wl_seat", 7);

        assert!(registry.release_seat().is_some());
        assert!(!registry.has_seat());
        assert!(registry.seat_released());

        assert!(registry.offer(9, "wl_seat", 7).is_none());
        assert!(!registry.has_seat());
    }

    proptest! {
        #[test]
        fn test_unwatched_interfaces_are_never_bound(
            interfaces in prop::collection::vec("[a-z_]{1,24}", 0..32),
        ) {
            let mut registry = CapabilityRegistry::new();
            for (name, interface) in interfaces.iter().enumerate() {
                let bound = registry.offer(name as u32, interface, 1);
                if Capability::from_interface(interface).is_none() {
                    prop_assert!(bound.is_none());
                }
            }
            for capability in Capability::ALL {
                if let Some(binding) = registry.get(capability) {
                    prop_assert_eq!(binding.interface.as_str(), capability.interface());
                }
            }
        }
    }
}
