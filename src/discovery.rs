//! Network discovery contract and glue between discovery events and the
//! device registry.
//!
//! Turns an externally-observed device (a zeroconf announcement, or a
//! statically-configured entry) into a registry entry keyed by name, with
//! its advertised endpoints queued for probing.

use std::sync::Arc;

use crate::config::Config;
use crate::device::registry::Registry;
use crate::protocol::Endpoint;

/// External contract a discovery backend (mDNS/Bonjour in production,
/// a fake in tests) must satisfy. The registry glue below only calls the
/// three `device_event_*` hooks; `zeroconf_init_scan` is this module's way
/// of asking discovery to kick off its initial scan.
pub trait Zeroconf: Send + Sync {
    /// Start (or restart) the initial network scan. Found/removed devices
    /// are reported by calling back into `DiscoveryGlue` as they arrive;
    /// this call itself does not block on the scan completing.
    fn zeroconf_init_scan(&self);
}

/// A single found-device announcement.
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

/// Glues discovery events to the registry: add devices as they are found,
/// remove them as they vanish, and release the registry's readiness
/// barrier once the first full scan has completed.
pub struct DiscoveryGlue {
    registry: Arc<Registry>,
}

impl DiscoveryGlue {
    pub fn new(registry: Arc<Registry>) -> Self {
        DiscoveryGlue { registry }
    }

    /// Seed the registry with statically-configured devices before any
    /// network discovery happens, for deployments where zeroconf is
    /// unavailable or the scanner's address is already known.
    pub fn import_static(&self, config: &Config) {
        for device in &config.devices {
            let endpoint = Endpoint::new(device.proto, device.uri.clone());
            self.device_event_found(FoundDevice { name: device.name.clone(), endpoints: vec![endpoint] });
        }
    }

    /// Called by a `Zeroconf` implementation when a device's endpoint set
    /// is observed (first announcement, or a change to an existing one).
    pub fn device_event_found(&self, found: FoundDevice) {
        self.registry.add(found.name, found.endpoints);
    }

    /// Called by a `Zeroconf` implementation when a device stops
    /// advertising.
    pub fn device_event_removed(&self, name: &str) {
        self.registry.del(name);
    }

    /// Called once a `Zeroconf` implementation's initial scan has
    /// enumerated every device it's going to find at startup.
    pub fn device_event_init_scan_finished(&self) {
        self.registry.mark_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtoId;

    #[test]
    fn static_import_adds_devices_before_any_scan() {
        let registry = Registry::new();
        let glue = DiscoveryGlue::new(registry.clone());
        let config = Config::load_str(
            r#"
            [[devices]]
            name = "kitchen"
            uri = "http://192.168.1.50/eSCL"
            proto = "escl"
            "#,
        )
        .unwrap();
        glue.import_static(&config);
        assert!(registry.find("kitchen").is_some());
    }

    #[test]
    fn found_then_removed_round_trips() {
        let registry = Registry::new();
        let glue = DiscoveryGlue::new(registry.clone());
        let endpoint = Endpoint::new(ProtoId::Escl, "http://scanner.local/eSCL");
        glue.device_event_found(FoundDevice { name: "printer".into(), endpoints: vec![endpoint] });
        assert!(registry.find("printer").is_some());
        glue.device_event_removed("printer");
        assert!(registry.find("printer").is_none());
    }

    #[test]
    fn init_scan_finished_releases_readiness_barrier() {
        let registry = Registry::new();
        let glue = DiscoveryGlue::new(registry.clone());
        assert!(!registry.is_ready());
        glue.device_event_init_scan_finished();
        assert!(registry.is_ready());
    }
}
