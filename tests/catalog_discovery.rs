//! Integration tests for device discovery
//!
//! Discovery is a pure read of the hardware catalog: repeated passes must report the same
//! units in the same order, and enumeration stops at the first empty entry.

use serial_test::serial;
use spectro_daq::catalog::DeviceCatalog;
use spectro_daq::config::SessionConfig;
use spectro_daq::hardware::mock::{MockOperation, MockSpectrometer};
use spectro_daq::hardware::proxy::CatalogEntry;
use spectro_daq::hardware::{DetectorAdapter, DeviceKind};
use spectro_daq::{ErrorKind, SessionController, SessionError, SessionState};
use std::sync::Arc;

fn two_of_each() -> Arc<MockSpectrometer> {
    Arc::new(
        MockSpectrometer::builder()
            .monochromators(vec![
                CatalogEntry::new("M1", "MonoA"),
                CatalogEntry::new("M2", "MonoB"),
            ])
            .detectors(vec![
                CatalogEntry::new("D1", "CcdA"),
                CatalogEntry::new("D2", "CcdB"),
            ])
            .auto_events(false)
            .build(),
    )
}

#[test]
fn test_discovery_passes_are_identical() {
    let adapter = DetectorAdapter::new(two_of_each());

    let first = DeviceCatalog::discover(&adapter).unwrap();
    let second = DeviceCatalog::discover(&adapter).unwrap();

    assert_eq!(first, second);
    let ids: Vec<_> = first
        .devices(DeviceKind::Monochromator)
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, ["M1", "M2"]);
    assert_eq!(first.count(DeviceKind::Detector), 2);
}

#[test]
fn test_default_selection_is_first_enumerated() {
    let adapter = DetectorAdapter::new(two_of_each());
    let catalog = DeviceCatalog::discover(&adapter).unwrap();

    let selection = catalog.select_defaults().unwrap();
    assert_eq!(selection.monochromator.id(), "M1");
    assert_eq!(selection.detector.id(), "D1");
    assert_eq!(selection.detector.to_string(), "[D1]:[CcdA]");
    assert_eq!(catalog.find("D2").unwrap().kind(), DeviceKind::Detector);
    assert!(catalog.find("X9").is_none());
}

#[test]
fn test_enumeration_stops_at_empty_entry() {
    let mock = Arc::new(
        MockSpectrometer::builder()
            .detectors(vec![
                CatalogEntry::new("D1", "CcdA"),
                CatalogEntry::new("D2", ""),
                CatalogEntry::new("D3", "CcdC"),
            ])
            .build(),
    );
    let adapter = DetectorAdapter::new(mock);

    let catalog = DeviceCatalog::discover(&adapter).unwrap();

    let ids: Vec<_> = catalog
        .devices(DeviceKind::Detector)
        .iter()
        .map(|d| d.id())
        .collect();
    assert_eq!(ids, ["D1"]);
}

#[test]
fn test_empty_catalog_has_no_default() {
    let mock = Arc::new(
        MockSpectrometer::builder()
            .monochromators(vec![])
            .detectors(vec![])
            .build(),
    );
    let catalog = DeviceCatalog::discover(&DetectorAdapter::new(mock)).unwrap();

    assert!(catalog.is_empty());
    let err = catalog.select_defaults().unwrap_err();
    assert!(matches!(
        err,
        SessionError::NoDeviceFound {
            kind: DeviceKind::Monochromator
        }
    ));
}

#[test]
fn test_catalog_failure_is_hardware_unavailable() {
    let mock = two_of_each();
    mock.fail_operation(MockOperation::LoadCatalog);

    let err = DeviceCatalog::discover(&DetectorAdapter::new(mock.clone())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
    assert!(err.to_string().contains("load_catalog"));

    mock.restore_operation(MockOperation::LoadCatalog);
    mock.fail_operation(MockOperation::EnumerateDevices);
    let err = DeviceCatalog::discover(&DetectorAdapter::new(mock)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
}

#[tokio::test]
#[serial]
async fn test_controller_discovery_is_repeatable_while_connected() {
    let mock = two_of_each();
    let controller = SessionController::new(mock, SessionConfig::default());

    let before = controller.discover().await.unwrap();
    controller.select_and_connect().await.unwrap();
    let during = controller.discover().await.unwrap();

    assert_eq!(before, during);
    assert_eq!(controller.current_state(), SessionState::Connected);
    controller.teardown().await.unwrap();
}
