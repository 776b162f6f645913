//! Controller-facing wrapper around a [`HardwareProxy`].
//!
//! `DetectorAdapter` holds no session data of its own. It turns first/next cursors into
//! iterators, stops enumeration at the vendor sentinels, applies acquisition parameters one
//! sub-setting at a time, and converts every proxy error into a [`SessionError`] tagged
//! with the operation that raised it.

use crate::error::{
    ParameterFailure, ParameterField, PartialApplyError, SessionError, SessionResult,
};
use crate::hardware::cursor::{Cursor, CursorStep};
use crate::hardware::proxy::{
    CatalogEntry, EventSink, HardwareEvent, HardwareProxy, UnitsType, NO_MORE_OPTIONS,
};
use crate::hardware::{DeviceDescriptor, DeviceKind};
use crate::parameters::{AcquisitionParameters, OptionToken};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Receiving half of the adapter-to-controller event queue.
pub type EventReceiver = mpsc::Receiver<HardwareEvent>;

/// Create the bounded queue that carries hardware events to the controller.
///
/// A full queue blocks the proxy thread instead of dropping events.
pub fn event_channel(capacity: usize) -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink::new(tx), rx)
}

/// Outcome of applying acquisition parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Sub-settings the detector accepted, in application order.
    pub applied: Vec<ParameterField>,
    /// Sub-settings the detector rejected, in application order.
    pub failures: Vec<ParameterFailure>,
}

impl ApplyReport {
    fn record(&mut self, field: ParameterField, outcome: SessionResult<()>) {
        match outcome {
            Ok(()) => self.applied.push(field),
            Err(e) => {
                warn!(field = %field, error = %e, "Parameter sub-setting rejected");
                self.failures.push(ParameterFailure {
                    field,
                    message: e.to_string(),
                });
            }
        }
    }

    /// True if every sub-setting was accepted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether `field` was accepted.
    pub fn was_applied(&self, field: ParameterField) -> bool {
        self.applied.contains(&field)
    }

    /// Convert into an error listing the rejected sub-settings, if any.
    pub fn into_result(self) -> Result<(), PartialApplyError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(PartialApplyError {
                failures: self.failures,
            })
        }
    }
}

/// Pass-through adapter between the session controller and a hardware proxy.
#[derive(Clone)]
pub struct DetectorAdapter {
    proxy: Arc<dyn HardwareProxy>,
}

impl std::fmt::Debug for DetectorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorAdapter")
            .field("proxy", &self.proxy.name())
            .finish()
    }
}

impl DetectorAdapter {
    /// Wrap a proxy.
    pub fn new(proxy: Arc<dyn HardwareProxy>) -> Self {
        Self { proxy }
    }

    /// Name of the wrapped proxy.
    pub fn proxy_name(&self) -> &str {
        self.proxy.name()
    }

    /// Load the configuration browser before a discovery pass.
    pub fn load_catalog(&self) -> SessionResult<()> {
        trace!("load_catalog");
        self.proxy
            .load_catalog()
            .map_err(|e| SessionError::hardware("load_catalog", e))
    }

    /// Enumerate units of `kind` in one full cursor pass.
    ///
    /// Each call restarts the enumeration. It ends at the proxy's end marker or at the
    /// first entry with an empty id or name.
    pub fn devices(
        &self,
        kind: DeviceKind,
    ) -> impl Iterator<Item = SessionResult<DeviceDescriptor>> + '_ {
        Cursor::new(move |step: CursorStep| -> anyhow::Result<Option<CatalogEntry>> {
            let entry = match step {
                CursorStep::First => self.proxy.first_device(kind),
                CursorStep::Next => self.proxy.next_device(kind),
            }?;
            Ok(entry.filter(|e| !e.is_sentinel()))
        })
        .map(move |item| {
            item.map(|entry| DeviceDescriptor::new(entry.id, entry.name, kind))
                .map_err(|e| SessionError::hardware("enumerate_devices", e))
        })
    }

    /// Bind the detector to `id`, load its driver and open communications.
    pub fn connect(&self, id: &str) -> SessionResult<()> {
        trace!(id, "connect");
        self.proxy
            .bind_detector(id)
            .map_err(|e| SessionError::hardware("bind_detector", e))?;
        self.proxy
            .open_communications()
            .map_err(|e| SessionError::hardware("open_communications", e))?;
        debug!(id, "Detector communications open");
        Ok(())
    }

    /// Close communications with the detector.
    pub fn disconnect(&self) -> SessionResult<()> {
        trace!("disconnect");
        self.proxy
            .close_communications()
            .map_err(|e| SessionError::hardware("close_communications", e))
    }

    /// Hand the event sink to the proxy.
    pub fn register_event_sink(&self, sink: EventSink) -> SessionResult<()> {
        self.proxy
            .register_event_sink(sink)
            .map_err(|e| SessionError::hardware("register_event_sink", e))
    }

    /// Start asynchronous initialization.
    pub fn initialize(&self) -> SessionResult<()> {
        trace!("initialize");
        self.proxy
            .initialize()
            .map_err(|e| SessionError::hardware("initialize", e))
    }

    /// Current detector temperature in degrees Celsius.
    pub fn temperature(&self) -> SessionResult<f64> {
        self.proxy
            .current_temperature()
            .map_err(|e| SessionError::hardware("current_temperature", e))
    }

    /// Chip geometry (width, height).
    pub fn chip_geometry(&self) -> SessionResult<(u32, u32)> {
        self.proxy
            .chip_size()
            .map_err(|e| SessionError::hardware("chip_size", e))
    }

    /// Default units for `units`.
    pub fn default_units(&self, units: UnitsType) -> SessionResult<String> {
        self.proxy
            .default_units(units)
            .map_err(|e| SessionError::hardware("default_units", e))
    }

    /// Current integration time.
    pub fn integration_time(&self) -> SessionResult<f64> {
        self.proxy
            .integration_time()
            .map_err(|e| SessionError::hardware("integration_time", e))
    }

    /// Current gain token.
    pub fn current_gain(&self) -> SessionResult<i32> {
        self.proxy
            .gain()
            .map_err(|e| SessionError::hardware("gain", e))
    }

    /// Current ADC token.
    pub fn current_adc(&self) -> SessionResult<i32> {
        self.proxy
            .current_adc()
            .map_err(|e| SessionError::hardware("current_adc", e))
    }

    /// Enumerate gain options until the `-1` sentinel.
    pub fn gain_options(&self) -> impl Iterator<Item = SessionResult<OptionToken>> + '_ {
        options(
            "enumerate_gain",
            move || self.proxy.first_gain(),
            move || self.proxy.next_gain(),
        )
    }

    /// Enumerate ADC options until the `-1` sentinel.
    pub fn adc_options(&self) -> impl Iterator<Item = SessionResult<OptionToken>> + '_ {
        options(
            "enumerate_adc",
            move || self.proxy.first_adc(),
            move || self.proxy.next_adc(),
        )
    }

    /// Apply every sub-setting of `params`, continuing past individual failures.
    ///
    /// The acquisition format is defined with a single area and the region is applied to
    /// area 1.
    pub fn apply_parameters(&self, params: &AcquisitionParameters) -> ApplyReport {
        let mut report = ApplyReport::default();
        let proxy = &self.proxy;

        report.record(
            ParameterField::Gain,
            proxy
                .set_gain(params.gain_token)
                .map_err(|e| SessionError::hardware("set_gain", e)),
        );
        report.record(
            ParameterField::Adc,
            proxy
                .select_adc(params.adc_token)
                .map_err(|e| SessionError::hardware("select_adc", e)),
        );
        report.record(
            ParameterField::IntegrationTime,
            proxy
                .set_integration_time(params.integration_time_ms)
                .map_err(|e| SessionError::hardware("set_integration_time", e)),
        );
        report.record(
            ParameterField::AcquisitionFormat,
            proxy
                .define_acquisition_format(params.format, 1)
                .map_err(|e| SessionError::hardware("define_acquisition_format", e)),
        );
        report.record(
            ParameterField::Region,
            proxy
                .define_area(1, &params.region)
                .map_err(|e| SessionError::hardware("define_area", e)),
        );

        debug!(
            applied = report.applied.len(),
            failed = report.failures.len(),
            "Parameters applied"
        );
        report
    }

    /// Whether the detector reports it is ready to acquire.
    pub fn is_ready_for_acquisition(&self) -> SessionResult<bool> {
        self.proxy
            .ready_for_acquisition()
            .map_err(|e| SessionError::hardware("ready_for_acquisition", e))
    }

    /// Start an acquisition.
    pub fn start_acquisition(&self, open_shutter: bool) -> SessionResult<()> {
        trace!(open_shutter, "start_acquisition");
        self.proxy
            .do_acquisition(open_shutter)
            .map_err(|e| SessionError::hardware("do_acquisition", e))
    }
}

fn options<'a>(
    operation: &'static str,
    mut first: impl FnMut() -> anyhow::Result<OptionToken> + 'a,
    mut next: impl FnMut() -> anyhow::Result<OptionToken> + 'a,
) -> impl Iterator<Item = SessionResult<OptionToken>> + 'a {
    Cursor::new(move |step: CursorStep| -> anyhow::Result<Option<OptionToken>> {
        let option = match step {
            CursorStep::First => first(),
            CursorStep::Next => next(),
        }?;
        Ok((option.token != NO_MORE_OPTIONS).then_some(option))
    })
    .map(move |item| item.map_err(|e| SessionError::hardware(operation, e)))
}
