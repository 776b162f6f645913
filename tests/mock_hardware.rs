//! Integration tests for the simulated spectrometer
//!
//! These tests drive `MockSpectrometer` through `DetectorAdapter` the way the session
//! controller does, and check that it behaves like the real proxy: cursors, sentinels,
//! failure injection and event delivery.

use spectro_daq::config::{SimulatedDevice, SimulationConfig};
use spectro_daq::error::ParameterField;
use spectro_daq::hardware::mock::{MockOperation, MockSpectrometer};
use spectro_daq::hardware::{
    event_channel, DetectorAdapter, DeviceKind, EventSource, UnitsType, ACQUISITION_COMPLETE,
};
use spectro_daq::parameters::{AcquisitionFormat, AcquisitionParameters, OptionToken, Region};
use spectro_daq::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn connected(mock: &Arc<MockSpectrometer>) -> DetectorAdapter {
    let adapter = DetectorAdapter::new(mock.clone());
    adapter.load_catalog().unwrap();
    adapter.connect("D1").unwrap();
    adapter
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_from_config_builds_catalog_and_options() {
    let config = SimulationConfig {
        monochromators: vec![SimulatedDevice::new("M7", "iHR550")],
        detectors: vec![
            SimulatedDevice::new("D4", "Syncerity"),
            SimulatedDevice::new("D5", "SynapseEM"),
        ],
        adc_options: vec![OptionToken::new(3, "250kHz")],
        ..SimulationConfig::default()
    };
    let mock = Arc::new(MockSpectrometer::from_config(&config));
    let adapter = DetectorAdapter::new(mock.clone());

    adapter.load_catalog().unwrap();
    let detectors: Vec<_> = adapter
        .devices(DeviceKind::Detector)
        .map(|d| d.unwrap().id().to_string())
        .collect();
    assert_eq!(detectors, ["D4", "D5"]);

    adapter.connect("D5").unwrap();
    let adcs: Vec<_> = adapter.adc_options().map(|o| o.unwrap()).collect();
    assert_eq!(adcs, [OptionToken::new(3, "250kHz")]);
    assert_eq!(adapter.temperature().unwrap(), config.temperature_c);
}

#[test]
fn test_connect_unknown_detector_fails() {
    let mock = Arc::new(MockSpectrometer::new());
    let adapter = DetectorAdapter::new(mock.clone());

    let err = adapter.connect("D9").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
    assert!(!mock.is_open());
}

// =============================================================================
// Queries and option enumeration
// =============================================================================

#[test]
fn test_queries_require_open_communications() {
    let mock = Arc::new(MockSpectrometer::new());
    let adapter = DetectorAdapter::new(mock.clone());

    assert!(adapter.temperature().is_err());
    assert!(adapter.gain_options().next().unwrap().is_err());

    let adapter = connected(&mock);
    assert_eq!(adapter.default_units(UnitsType::Time).unwrap(), "ms");
    assert_eq!(adapter.default_units(UnitsType::Wavelength).unwrap(), "nm");

    adapter.disconnect().unwrap();
    assert!(!mock.is_open());
    assert!(adapter.integration_time().is_err());
}

#[test]
fn test_chip_size_requires_initialization() {
    let mock = Arc::new(
        MockSpectrometer::builder()
            .auto_events(false)
            .chip(2048, 512)
            .build(),
    );
    let adapter = connected(&mock);

    assert!(adapter.chip_geometry().is_err());
    mock.emit_initialized(0).unwrap();
    assert_eq!(adapter.chip_geometry().unwrap(), (2048, 512));
}

#[test]
fn test_gain_enumeration_restarts_each_pass() {
    let mock = Arc::new(MockSpectrometer::new());
    let adapter = connected(&mock);

    let first: Vec<_> = adapter.gain_options().map(|o| o.unwrap().token).collect();
    let second: Vec<_> = adapter.gain_options().map(|o| o.unwrap().token).collect();

    assert_eq!(first, [0, 1, 2]);
    assert_eq!(first, second);
}

#[test]
fn test_enumeration_failure_ends_iteration() {
    let mock = Arc::new(MockSpectrometer::new());
    let adapter = connected(&mock);
    mock.fail_operation(MockOperation::EnumerateAdc);

    let items: Vec<_> = adapter.adc_options().collect();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_err());
}

// =============================================================================
// Parameters
// =============================================================================

#[test]
fn test_apply_parameters_reaches_detector() {
    let mock = Arc::new(MockSpectrometer::new());
    let adapter = connected(&mock);
    let params = AcquisitionParameters {
        gain_token: 2,
        adc_token: 1,
        integration_time_ms: 250.0,
        format: AcquisitionFormat::Image,
        region: Region {
            x_start: 1,
            y_start: 1,
            x_size: 512,
            y_size: 128,
            x_bin: 2,
            y_bin: 2,
        },
    };

    let report = adapter.apply_parameters(&params);

    assert!(report.is_complete());
    assert_eq!(report.applied.len(), 5);
    assert_eq!(adapter.current_gain().unwrap(), 2);
    assert_eq!(adapter.current_adc().unwrap(), 1);
    assert_eq!(adapter.integration_time().unwrap(), 250.0);
    assert_eq!(mock.region(), params.region);
}

#[test]
fn test_injected_failure_is_isolated_to_one_field() {
    let mock = Arc::new(MockSpectrometer::new());
    let adapter = connected(&mock);
    mock.fail_operation(MockOperation::SetIntegrationTime);

    let report = adapter.apply_parameters(&AcquisitionParameters::default());

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].field, ParameterField::IntegrationTime);
    assert!(report.was_applied(ParameterField::Region));
    let err = report.into_result().unwrap_err();
    assert_eq!(err.failures.len(), 1);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_scripted_initialize_emits_status_then_initialized() {
    let mock = Arc::new(
        MockSpectrometer::builder()
            .initialize_delay(Duration::from_millis(5))
            .build(),
    );
    let adapter = connected(&mock);
    let (sink, mut rx) = event_channel(8);
    adapter.register_event_sink(sink).unwrap();

    adapter.initialize().unwrap();

    let status = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(status.source, EventSource::OperationStatus);
    let initialized = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(initialized.source, EventSource::Initialize);
    assert_eq!(initialized.code, 0);
    assert!(adapter.is_ready_for_acquisition().unwrap());
}

#[tokio::test]
async fn test_acquisition_delivers_progress_then_result() {
    let mock = Arc::new(
        MockSpectrometer::builder()
            .initialize_delay(Duration::ZERO)
            .acquisition_delay(Duration::ZERO)
            .seed(7)
            .build(),
    );
    let adapter = connected(&mock);
    let (sink, mut rx) = event_channel(8);
    adapter.register_event_sink(sink).unwrap();
    adapter.initialize().unwrap();
    let _ = rx.recv().await;
    let _ = rx.recv().await;

    adapter.start_acquisition(true).unwrap();

    let progress = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(progress.source, EventSource::Update);
    assert!(!progress.is_acquisition_complete());

    let done = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(done.is_acquisition_complete());
    assert_eq!(done.code, ACQUISITION_COMPLETE);
    let result = done.payload.unwrap().result().unwrap().unwrap();
    let data = result.first_data_object().unwrap();
    // Scan format over the default 1024-column region.
    assert_eq!(data.samples.len(), 1024);
    assert_eq!(mock.acquisition_count(), 1);
}

#[tokio::test]
async fn test_disconnect_closes_event_queue() {
    let mock = Arc::new(MockSpectrometer::builder().auto_events(false).build());
    let adapter = connected(&mock);
    let (sink, mut rx) = event_channel(8);
    adapter.register_event_sink(sink).unwrap();

    mock.emit_update(3).unwrap();
    adapter.disconnect().unwrap();

    let update = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(update.code, 3);
    assert!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_auto_events_can_be_switched_off() {
    let mock = Arc::new(
        MockSpectrometer::builder()
            .initialize_delay(Duration::ZERO)
            .build(),
    );
    let adapter = connected(&mock);
    let (sink, mut rx) = event_channel(8);
    adapter.register_event_sink(sink).unwrap();
    mock.set_auto_events(false);

    adapter.initialize().unwrap();
    mock.emit_update(5).unwrap();

    // Only the scripted update arrives; initialization produced no events.
    let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.source, EventSource::Update);
    assert_eq!(first.code, 5);
    assert!(!adapter.is_ready_for_acquisition().unwrap());
}
