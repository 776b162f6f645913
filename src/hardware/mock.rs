//! Simulated Spectrometer
//!
//! `MockSpectrometer` implements [`HardwareProxy`] for a monochromator plus CCD without any
//! vendor SDK. It is used by the tests and by the `spectro-daq` binary.
//!
//! # Behaviour
//!
//! - Configurable catalog (monochromators, detectors), chip geometry and gain/ADC tables.
//! - Events are delivered from a dedicated emitter thread, in submission order, the way the
//!   vendor proxy calls back on its own thread.
//! - With automatic events on (the default), `initialize` emits an initialized event after
//!   `initialize_delay`, and `do_acquisition` emits a progress update followed by the
//!   acquisition-complete update carrying generated samples.
//! - Any operation can be made to fail with [`MockSpectrometer::fail_operation`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = Arc::new(MockSpectrometer::builder().auto_events(false).build());
//! mock.emit(HardwareEvent::update(1, "progress"))?;
//! ```

use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::SimulationConfig;
use crate::hardware::proxy::{
    CatalogEntry, Dimensions, EventSink, HardwareEvent, HardwareProxy, ResultObject, UnitsType,
    NO_MORE_OPTIONS,
};
use crate::hardware::DeviceKind;
use crate::parameters::{AcquisitionFormat, OptionToken, Region};

/// Proxy operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// `load_catalog`
    LoadCatalog,
    /// `first_device` / `next_device`
    EnumerateDevices,
    /// `bind_detector`
    BindDetector,
    /// `open_communications`
    OpenCommunications,
    /// `close_communications`
    CloseCommunications,
    /// `register_event_sink`
    RegisterEventSink,
    /// `initialize`
    Initialize,
    /// `current_temperature`
    Temperature,
    /// `chip_size`
    ChipSize,
    /// `default_units`
    DefaultUnits,
    /// `integration_time`
    IntegrationTime,
    /// `set_integration_time`
    SetIntegrationTime,
    /// `gain`
    Gain,
    /// `set_gain`
    SetGain,
    /// `first_gain` / `next_gain`
    EnumerateGain,
    /// `current_adc`
    CurrentAdc,
    /// `select_adc`
    SelectAdc,
    /// `first_adc` / `next_adc`
    EnumerateAdc,
    /// `define_acquisition_format`
    DefineFormat,
    /// `define_area`
    DefineArea,
    /// `ready_for_acquisition`
    ReadyForAcquisition,
    /// `do_acquisition`
    DoAcquisition,
}

// =============================================================================
// Emitter thread
// =============================================================================

enum EmitterCommand {
    Attach(EventSink),
    Detach,
    Deliver { event: HardwareEvent, delay: Duration },
    Shutdown,
}

fn run_emitter(rx: std_mpsc::Receiver<EmitterCommand>) {
    let mut sink: Option<EventSink> = None;
    while let Ok(command) = rx.recv() {
        match command {
            EmitterCommand::Attach(new_sink) => sink = Some(new_sink),
            EmitterCommand::Detach => sink = None,
            EmitterCommand::Deliver { event, delay } => {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                match &sink {
                    Some(sink) => {
                        trace!(source = %event.source, code = event.code, "Emitting event");
                        if let Err(e) = sink.emit(event) {
                            debug!(error = %e, "Event not delivered");
                        }
                    }
                    None => debug!(
                        source = %event.source,
                        code = event.code,
                        "No event sink registered, event discarded"
                    ),
                }
            }
            EmitterCommand::Shutdown => break,
        }
    }
}

// =============================================================================
// MockSpectrometer
// =============================================================================

#[derive(Debug, Default)]
struct Cursors {
    monochromator: usize,
    detector: usize,
    gain: usize,
    adc: usize,
}

#[derive(Debug)]
struct MockState {
    failing: HashSet<MockOperation>,
    cursors: Cursors,
    bound: Option<String>,
    open: bool,
    initialized: bool,
    ready: bool,
    auto_events: bool,
    gain: i32,
    adc: i32,
    integration_time: f64,
    format: AcquisitionFormat,
    region: Region,
    acquisitions: u64,
}

/// Simulated monochromator + CCD behind the hardware proxy contract.
pub struct MockSpectrometer {
    monochromators: Vec<CatalogEntry>,
    detectors: Vec<CatalogEntry>,
    chip: (u32, u32),
    gains: Vec<OptionToken>,
    adcs: Vec<OptionToken>,
    temperature: f64,
    seed: u64,
    initialize_delay: Duration,
    acquisition_delay: Duration,
    state: Mutex<MockState>,
    emitter: Mutex<std_mpsc::Sender<EmitterCommand>>,
}

impl MockSpectrometer {
    /// Instrument with one monochromator (`M1`/`MonoA`) and one detector (`D1`/`CcdA`).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a customised instrument.
    pub fn builder() -> MockSpectrometerBuilder {
        MockSpectrometerBuilder::default()
    }

    /// Instrument described by the `[simulation]` configuration section.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let entries = |devices: &[crate::config::SimulatedDevice]| {
            devices
                .iter()
                .map(|d| CatalogEntry::new(&d.id, &d.name))
                .collect::<Vec<_>>()
        };
        Self::builder()
            .monochromators(entries(&config.monochromators))
            .detectors(entries(&config.detectors))
            .chip(config.chip_width, config.chip_height)
            .gain_options(config.gain_options.clone())
            .adc_options(config.adc_options.clone())
            .temperature(config.temperature_c)
            .seed(config.seed)
            .initialize_delay(Duration::from_millis(config.initialize_delay_ms))
            .acquisition_delay(Duration::from_millis(config.acquisition_delay_ms))
            .build()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, command: EmitterCommand) -> Result<()> {
        self.emitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .send(command)
            .map_err(|_| anyhow!("mock emitter thread has stopped"))
    }

    fn check(state: &MockState, op: MockOperation) -> Result<()> {
        if state.failing.contains(&op) {
            bail!("simulated {:?} failure", op);
        }
        Ok(())
    }

    fn check_open(state: &MockState, op: MockOperation) -> Result<()> {
        Self::check(state, op)?;
        if !state.open {
            bail!("CCD Hardware Not Detected: communications are not open");
        }
        Ok(())
    }

    fn check_initialized(state: &MockState, op: MockOperation) -> Result<()> {
        Self::check_open(state, op)?;
        if !state.initialized {
            bail!("detector has not finished initializing");
        }
        Ok(())
    }

    fn catalog(&self, kind: DeviceKind) -> &[CatalogEntry] {
        match kind {
            DeviceKind::Monochromator => &self.monochromators,
            DeviceKind::Detector => &self.detectors,
        }
    }

    fn option_at(options: &[OptionToken], index: usize) -> OptionToken {
        options
            .get(index)
            .cloned()
            .unwrap_or_else(|| OptionToken::new(NO_MORE_OPTIONS, ""))
    }

    /// Make `op` fail until restored.
    pub fn fail_operation(&self, op: MockOperation) {
        self.lock().failing.insert(op);
    }

    /// Let `op` succeed again.
    pub fn restore_operation(&self, op: MockOperation) {
        self.lock().failing.remove(&op);
    }

    /// Set what `ready_for_acquisition` reports once initialized.
    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// Enable or disable the automatic initialize/acquisition event scripts.
    pub fn set_auto_events(&self, enabled: bool) {
        self.lock().auto_events = enabled;
    }

    /// Deliver `event` through the emitter thread, after every event already queued.
    pub fn emit(&self, event: HardwareEvent) -> Result<()> {
        self.send(EmitterCommand::Deliver {
            event,
            delay: Duration::ZERO,
        })
    }

    /// Deliver an initialized event and mark the detector initialized.
    pub fn emit_initialized(&self, status: i32) -> Result<()> {
        self.lock().initialized = true;
        self.emit(HardwareEvent::initialized(status, "CCD initialized"))
    }

    /// Deliver an update event with `code`.
    pub fn emit_update(&self, code: i32) -> Result<()> {
        self.emit(HardwareEvent::update(code, format!("Update {code}")))
    }

    /// Deliver an acquisition-complete update carrying `samples` as a single row.
    pub fn emit_completion(&self, samples: Vec<f64>) -> Result<()> {
        let dimensions = Dimensions {
            width: samples.len(),
            height: 1,
        };
        self.emit(HardwareEvent::completed(Arc::new(ResultObject::single(
            samples, dimensions,
        ))))
    }

    /// Drop the registered event sink, closing the controller's event queue.
    pub fn drop_event_sink(&self) -> Result<()> {
        self.send(EmitterCommand::Detach)
    }

    /// Number of acquisitions started.
    pub fn acquisition_count(&self) -> u64 {
        self.lock().acquisitions
    }

    /// Region last defined for area 1.
    pub fn region(&self) -> Region {
        self.lock().region
    }

    /// Whether communications are open.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Spectrum-like samples for the configured format and region.
    fn synthesize(&self, format: AcquisitionFormat, region: &Region, sequence: u64) -> ResultObject {
        let (width, height) = region.binned_dimensions(format);
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(sequence));
        let peak = width as f64 / 2.0;
        let sigma = (width as f64 / 20.0).max(1.0);

        let mut samples = Vec::with_capacity(width * height);
        for _row in 0..height {
            for col in 0..width {
                let x = col as f64 - peak;
                let signal = 5_000.0 * (-(x * x) / (2.0 * sigma * sigma)).exp();
                let noise: f64 = rng.gen_range(-25.0..25.0);
                samples.push(600.0 + signal + noise);
            }
        }
        ResultObject::single(samples, Dimensions { width, height })
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockSpectrometer {
    fn drop(&mut self) {
        let _ = self.send(EmitterCommand::Shutdown);
    }
}

impl HardwareProxy for MockSpectrometer {
    fn name(&self) -> &str {
        "mock-spectrometer"
    }

    fn load_catalog(&self) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state, MockOperation::LoadCatalog)?;
        state.cursors.monochromator = 0;
        state.cursors.detector = 0;
        Ok(())
    }

    fn first_device(&self, kind: DeviceKind) -> Result<Option<CatalogEntry>> {
        let mut state = self.lock();
        Self::check(&state, MockOperation::EnumerateDevices)?;
        let cursor = match kind {
            DeviceKind::Monochromator => &mut state.cursors.monochromator,
            DeviceKind::Detector => &mut state.cursors.detector,
        };
        *cursor = 1;
        Ok(self.catalog(kind).first().cloned())
    }

    fn next_device(&self, kind: DeviceKind) -> Result<Option<CatalogEntry>> {
        let mut state = self.lock();
        Self::check(&state, MockOperation::EnumerateDevices)?;
        let cursor = match kind {
            DeviceKind::Monochromator => &mut state.cursors.monochromator,
            DeviceKind::Detector => &mut state.cursors.detector,
        };
        let entry = self.catalog(kind).get(*cursor).cloned();
        *cursor += 1;
        Ok(entry)
    }

    fn bind_detector(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state, MockOperation::BindDetector)?;
        if !self.detectors.iter().any(|d| d.id == id) {
            bail!("no detector with id '{}'", id);
        }
        state.bound = Some(id.to_string());
        Ok(())
    }

    fn open_communications(&self) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state, MockOperation::OpenCommunications)?;
        if state.bound.is_none() {
            bail!("CCD Hardware Not Detected: no detector bound");
        }
        state.open = true;
        debug!(id = ?state.bound, "Mock communications opened");
        Ok(())
    }

    fn close_communications(&self) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state, MockOperation::CloseCommunications)?;
        state.open = false;
        state.initialized = false;
        state.bound = None;
        drop(state);
        self.send(EmitterCommand::Detach)
    }

    fn register_event_sink(&self, sink: EventSink) -> Result<()> {
        {
            let state = self.lock();
            Self::check_open(&state, MockOperation::RegisterEventSink)?;
        }
        self.send(EmitterCommand::Attach(sink))
    }

    fn initialize(&self) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::Initialize)?;
        if !state.auto_events {
            return Ok(());
        }
        state.initialized = true;
        drop(state);

        self.send(EmitterCommand::Deliver {
            event: HardwareEvent::operation_status(0, "Initializing"),
            delay: Duration::ZERO,
        })?;
        self.send(EmitterCommand::Deliver {
            event: HardwareEvent::initialized(0, "CCD initialized"),
            delay: self.initialize_delay,
        })
    }

    fn current_temperature(&self) -> Result<f64> {
        let state = self.lock();
        Self::check_open(&state, MockOperation::Temperature)?;
        Ok(self.temperature)
    }

    fn chip_size(&self) -> Result<(u32, u32)> {
        let state = self.lock();
        Self::check_initialized(&state, MockOperation::ChipSize)?;
        Ok(self.chip)
    }

    fn default_units(&self, units: UnitsType) -> Result<String> {
        let state = self.lock();
        Self::check_open(&state, MockOperation::DefaultUnits)?;
        Ok(match units {
            UnitsType::Time => "ms".to_string(),
            UnitsType::Wavelength => "nm".to_string(),
        })
    }

    fn integration_time(&self) -> Result<f64> {
        let state = self.lock();
        Self::check_open(&state, MockOperation::IntegrationTime)?;
        Ok(state.integration_time)
    }

    fn set_integration_time(&self, value: f64) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::SetIntegrationTime)?;
        if !(value.is_finite() && value > 0.0) {
            bail!("integration time {} out of range", value);
        }
        state.integration_time = value;
        Ok(())
    }

    fn gain(&self) -> Result<i32> {
        let state = self.lock();
        Self::check_open(&state, MockOperation::Gain)?;
        Ok(state.gain)
    }

    fn set_gain(&self, token: i32) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::SetGain)?;
        if !self.gains.iter().any(|g| g.token == token) {
            bail!("unsupported gain token {}", token);
        }
        state.gain = token;
        Ok(())
    }

    fn first_gain(&self) -> Result<OptionToken> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::EnumerateGain)?;
        state.cursors.gain = 1;
        Ok(Self::option_at(&self.gains, 0))
    }

    fn next_gain(&self) -> Result<OptionToken> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::EnumerateGain)?;
        let option = Self::option_at(&self.gains, state.cursors.gain);
        state.cursors.gain += 1;
        Ok(option)
    }

    fn current_adc(&self) -> Result<i32> {
        let state = self.lock();
        Self::check_open(&state, MockOperation::CurrentAdc)?;
        Ok(state.adc)
    }

    fn select_adc(&self, token: i32) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::SelectAdc)?;
        if !self.adcs.iter().any(|a| a.token == token) {
            bail!("unsupported ADC token {}", token);
        }
        state.adc = token;
        Ok(())
    }

    fn first_adc(&self) -> Result<OptionToken> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::EnumerateAdc)?;
        state.cursors.adc = 1;
        Ok(Self::option_at(&self.adcs, 0))
    }

    fn next_adc(&self) -> Result<OptionToken> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::EnumerateAdc)?;
        let option = Self::option_at(&self.adcs, state.cursors.adc);
        state.cursors.adc += 1;
        Ok(option)
    }

    fn define_acquisition_format(&self, format: AcquisitionFormat, areas: u32) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::DefineFormat)?;
        if areas != 1 {
            bail!("mock detector supports a single area, got {}", areas);
        }
        state.format = format;
        Ok(())
    }

    fn define_area(&self, area: u32, region: &Region) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::DefineArea)?;
        if area != 1 {
            bail!("area {} is not defined", area);
        }
        if region.x_bin == 0 || region.y_bin == 0 {
            bail!("binning must be non-zero");
        }
        // The real detector clips oversized areas instead of rejecting them.
        state.region = *region;
        Ok(())
    }

    fn ready_for_acquisition(&self) -> Result<bool> {
        let state = self.lock();
        Self::check_open(&state, MockOperation::ReadyForAcquisition)?;
        Ok(state.initialized && state.ready)
    }

    fn do_acquisition(&self, open_shutter: bool) -> Result<()> {
        let mut state = self.lock();
        Self::check_open(&state, MockOperation::DoAcquisition)?;
        state.acquisitions += 1;
        let sequence = state.acquisitions;
        let (auto, format, region) = (state.auto_events, state.format, state.region);
        drop(state);

        debug!(open_shutter, sequence, "Mock acquisition started");
        if !auto {
            return Ok(());
        }
        let payload = self.synthesize(format, &region, sequence);
        self.send(EmitterCommand::Deliver {
            event: HardwareEvent::update(1, "Acquisition in progress"),
            delay: Duration::ZERO,
        })?;
        self.send(EmitterCommand::Deliver {
            event: HardwareEvent::completed(Arc::new(payload)),
            delay: self.acquisition_delay,
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MockSpectrometer`].
#[derive(Debug, Clone)]
pub struct MockSpectrometerBuilder {
    monochromators: Vec<CatalogEntry>,
    detectors: Vec<CatalogEntry>,
    chip: (u32, u32),
    gains: Vec<OptionToken>,
    adcs: Vec<OptionToken>,
    temperature: f64,
    seed: u64,
    initialize_delay: Duration,
    acquisition_delay: Duration,
    auto_events: bool,
}

impl Default for MockSpectrometerBuilder {
    fn default() -> Self {
        Self {
            monochromators: vec![CatalogEntry::new("M1", "MonoA")],
            detectors: vec![CatalogEntry::new("D1", "CcdA")],
            chip: (1024, 256),
            gains: vec![
                OptionToken::new(0, "High Sensitivity"),
                OptionToken::new(1, "Best Dynamic Range"),
                OptionToken::new(2, "High Light"),
            ],
            adcs: vec![OptionToken::new(0, "45kHz"), OptionToken::new(1, "1MHz")],
            temperature: -70.0,
            seed: 42,
            initialize_delay: Duration::from_millis(20),
            acquisition_delay: Duration::from_millis(10),
            auto_events: true,
        }
    }
}

impl MockSpectrometerBuilder {
    /// Monochromator catalog entries.
    pub fn monochromators(mut self, entries: Vec<CatalogEntry>) -> Self {
        self.monochromators = entries;
        self
    }

    /// Detector catalog entries.
    pub fn detectors(mut self, entries: Vec<CatalogEntry>) -> Self {
        self.detectors = entries;
        self
    }

    /// Chip geometry in pixels.
    pub fn chip(mut self, width: u32, height: u32) -> Self {
        self.chip = (width, height);
        self
    }

    /// Gain option table.
    pub fn gain_options(mut self, options: Vec<OptionToken>) -> Self {
        self.gains = options;
        self
    }

    /// ADC option table.
    pub fn adc_options(mut self, options: Vec<OptionToken>) -> Self {
        self.adcs = options;
        self
    }

    /// Reported detector temperature.
    pub fn temperature(mut self, celsius: f64) -> Self {
        self.temperature = celsius;
        self
    }

    /// Seed for sample generation.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Delay before the initialized event.
    pub fn initialize_delay(mut self, delay: Duration) -> Self {
        self.initialize_delay = delay;
        self
    }

    /// Delay before the acquisition-complete event.
    pub fn acquisition_delay(mut self, delay: Duration) -> Self {
        self.acquisition_delay = delay;
        self
    }

    /// Whether `initialize`/`do_acquisition` emit their events automatically.
    pub fn auto_events(mut self, enabled: bool) -> Self {
        self.auto_events = enabled;
        self
    }

    /// Build the instrument and start its emitter thread.
    pub fn build(self) -> MockSpectrometer {
        let (tx, rx) = std_mpsc::channel();
        let spawned = thread::Builder::new()
            .name("mock-spectrometer-events".into())
            .spawn(move || run_emitter(rx));
        if let Err(e) = spawned {
            warn!(error = %e, "Mock emitter thread failed to start; events will not be delivered");
        }

        MockSpectrometer {
            monochromators: self.monochromators,
            detectors: self.detectors,
            chip: self.chip,
            gains: self.gains,
            adcs: self.adcs,
            temperature: self.temperature,
            seed: self.seed,
            initialize_delay: self.initialize_delay,
            acquisition_delay: self.acquisition_delay,
            state: Mutex::new(MockState {
                failing: HashSet::new(),
                cursors: Cursors::default(),
                bound: None,
                open: false,
                initialized: false,
                ready: true,
                auto_events: self.auto_events,
                gain: 0,
                adc: 0,
                integration_time: 1.0,
                format: AcquisitionFormat::Scan,
                region: Region::default(),
                acquisitions: 0,
            }),
            emitter: Mutex::new(tx),
        }
    }
}
