//! Device descriptor catalog.
//!
//! A [`DeviceCatalog`] is a snapshot of the connectable units reported by one discovery
//! pass. It is rebuilt on every discovery request; descriptors from an earlier pass may no
//! longer exist.

use crate::error::{SessionError, SessionResult};
use crate::hardware::{DetectorAdapter, DeviceDescriptor, DeviceKind};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

/// Serializes discovery passes. The proxy keeps one enumeration cursor per kind, so two
/// overlapping passes would advance each other's cursors.
static DISCOVERY: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn discovery_guard() -> MutexGuard<'static, ()> {
    DISCOVERY.lock().unwrap_or_else(|poisoned| {
        warn!("Discovery mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Default unit of each kind chosen for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSelection {
    /// Selected monochromator.
    pub monochromator: DeviceDescriptor,
    /// Selected detector.
    pub detector: DeviceDescriptor,
}

/// Units discovered in one pass, per kind, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCatalog {
    monochromators: Vec<DeviceDescriptor>,
    detectors: Vec<DeviceDescriptor>,
}

impl DeviceCatalog {
    /// Load the configuration browser and enumerate both kinds.
    ///
    /// The whole pass runs under a process-wide lock, so concurrent passes over a shared
    /// proxy each see the full catalog.
    #[instrument(skip(adapter), fields(proxy = adapter.proxy_name()))]
    pub fn discover(adapter: &DetectorAdapter) -> SessionResult<Self> {
        let _pass = discovery_guard();
        adapter.load_catalog()?;
        Ok(Self {
            monochromators: Self::discover_kind(adapter, DeviceKind::Monochromator)?,
            detectors: Self::discover_kind(adapter, DeviceKind::Detector)?,
        })
    }

    /// One full enumeration pass over `kind`, logging each unit found.
    fn discover_kind(
        adapter: &DetectorAdapter,
        kind: DeviceKind,
    ) -> SessionResult<Vec<DeviceDescriptor>> {
        let mut found = Vec::new();
        for descriptor in adapter.devices(kind) {
            let descriptor = descriptor?;
            info!(%kind, id = descriptor.id(), name = descriptor.display_name(), "Found {}", descriptor);
            found.push(descriptor);
        }
        info!(%kind, count = found.len(), "Discovered {} {} unit(s)", found.len(), kind);
        Ok(found)
    }

    /// Units of `kind`, in enumeration order.
    pub fn devices(&self, kind: DeviceKind) -> &[DeviceDescriptor] {
        match kind {
            DeviceKind::Monochromator => &self.monochromators,
            DeviceKind::Detector => &self.detectors,
        }
    }

    /// Number of units of `kind`.
    pub fn count(&self, kind: DeviceKind) -> usize {
        self.devices(kind).len()
    }

    /// True if no unit of any kind was found.
    pub fn is_empty(&self) -> bool {
        self.monochromators.is_empty() && self.detectors.is_empty()
    }

    /// The first discovered unit of `kind`.
    pub fn default_selection(&self, kind: DeviceKind) -> SessionResult<&DeviceDescriptor> {
        self.devices(kind)
            .first()
            .ok_or(SessionError::NoDeviceFound { kind })
    }

    /// Default monochromator and detector; fails if either kind is missing.
    pub fn select_defaults(&self) -> SessionResult<DeviceSelection> {
        Ok(DeviceSelection {
            monochromator: self.default_selection(DeviceKind::Monochromator)?.clone(),
            detector: self.default_selection(DeviceKind::Detector)?.clone(),
        })
    }

    /// Look up a unit by id across both kinds.
    pub fn find(&self, id: &str) -> Option<&DeviceDescriptor> {
        self.monochromators
            .iter()
            .chain(&self.detectors)
            .find(|d| d.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hardware::mock::{MockOperation, MockSpectrometer};
    use crate::hardware::proxy::CatalogEntry;
    use std::sync::Arc;

    fn adapter_for(mock: MockSpectrometer) -> (Arc<MockSpectrometer>, DetectorAdapter) {
        let mock = Arc::new(mock);
        (mock.clone(), DetectorAdapter::new(mock))
    }

    #[test]
    fn defaults_are_first_of_each_kind() {
        let (_mock, adapter) = adapter_for(
            MockSpectrometer::builder()
                .detectors(vec![
                    CatalogEntry::new("D1", "CcdA"),
                    CatalogEntry::new("D2", "CcdB"),
                ])
                .build(),
        );
        let catalog = DeviceCatalog::discover(&adapter).unwrap();
        assert_eq!(catalog.count(DeviceKind::Detector), 2);
        let selection = catalog.select_defaults().unwrap();
        assert_eq!(selection.monochromator.id(), "M1");
        assert_eq!(selection.detector.id(), "D1");
        assert_eq!(catalog.find("D2").unwrap().display_name(), "CcdB");
    }

    #[test]
    fn missing_monochromator_is_no_device_found() {
        let (_mock, adapter) =
            adapter_for(MockSpectrometer::builder().monochromators(vec![]).build());
        let catalog = DeviceCatalog::discover(&adapter).unwrap();
        let err = catalog.select_defaults().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDeviceFound);
        assert!(err.to_string().contains("monochromator"));
    }

    #[test]
    fn concurrent_passes_see_the_full_catalog() {
        let entries = |prefix: &str| {
            (0..300)
                .map(|i| CatalogEntry::new(format!("{prefix}{i}"), format!("Unit {i}")))
                .collect::<Vec<_>>()
        };
        let (_mock, adapter) = adapter_for(
            MockSpectrometer::builder()
                .monochromators(entries("M"))
                .detectors(entries("D"))
                .build(),
        );
        let expected = DeviceCatalog::discover(&adapter).unwrap();

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let adapter = adapter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| DeviceCatalog::discover(&adapter).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for worker in workers {
            for catalog in worker.join().unwrap() {
                assert_eq!(catalog, expected);
            }
        }
        assert_eq!(expected.count(DeviceKind::Monochromator), 300);
        assert_eq!(expected.count(DeviceKind::Detector), 300);
    }

    #[test]
    fn catalog_load_failure_aborts_discovery() {
        let (mock, adapter) = adapter_for(MockSpectrometer::new());
        mock.fail_operation(MockOperation::LoadCatalog);
        let err = DeviceCatalog::discover(&adapter).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
    }
}
