//! Device session controller.
//!
//! `SessionController` owns one session against the instrument: the session state, the
//! discovered capability set and the claim on the connected detector. Caller operations and
//! the hardware event pump both mutate the session under a single async mutex, so an event
//! that arrives while an operation is in flight waits until the operation finishes.
//!
//! # Event flow
//!
//! ```text
//! proxy thread --EventSink--> bounded mpsc --> event pump task --> NotificationHub
//!                                                   |                 |-- watch (state)
//!                                                   |                 |-- broadcast (events)
//!                                                   v                 '-- callbacks
//!                                            SessionCore (mutex)
//! ```
//!
//! `begin_initialize` and `start_acquisition` return as soon as the hardware accepted the
//! request. Completion is observed through [`SessionController::wait_for_state`],
//! [`SessionController::acquire`], the event channel, or the registered callbacks.

use crate::catalog::{DeviceCatalog, DeviceSelection};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::hardware::proxy::ACQUISITION_COMPLETE;
use crate::hardware::{
    event_channel, DetectorAdapter, EventReceiver, EventSource, HardwareEvent, HardwareProxy,
    UnitsType,
};
use crate::parameters::{AcquisitionParameters, CapabilitySet, RegionValidation};
use crate::session::events::{
    AcquisitionResult, CompletionStatus, HardwareNotice, NotificationHub, SessionEvent,
};
use crate::session::registry::ConnectionClaim;
use crate::session::SessionState;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};
use uuid::Uuid;

/// Session data guarded by the controller mutex.
#[derive(Default)]
struct SessionCore {
    catalog: Option<DeviceCatalog>,
    selection: Option<DeviceSelection>,
    claim: Option<ConnectionClaim>,
    capabilities: Option<CapabilitySet>,
    /// Incremented whenever the current event pump is retired.
    pump_epoch: u64,
}

/// State machine driving one monochromator + CCD session.
pub struct SessionController {
    id: Uuid,
    adapter: DetectorAdapter,
    settings: SessionConfig,
    core: Arc<Mutex<SessionCore>>,
    hub: Arc<NotificationHub>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("adapter", &self.adapter)
            .field("state", &self.hub.state())
            .finish()
    }
}

impl SessionController {
    /// New `Unconnected` session over `proxy`.
    pub fn new(proxy: Arc<dyn HardwareProxy>, settings: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, proxy = proxy.name(), "Session created");
        Self {
            id,
            adapter: DetectorAdapter::new(proxy),
            hub: Arc::new(NotificationHub::new(settings.notification_capacity)),
            settings,
            core: Arc::new(Mutex::new(SessionCore::default())),
            pump: StdMutex::new(None),
        }
    }

    /// Session id used in log spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state, without waiting for in-flight operations.
    pub fn current_state(&self) -> SessionState {
        self.hub.state()
    }

    /// Subscribe to every subsequent session notification.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.hub.subscribe()
    }

    /// Watch the session state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.hub.watch_state()
    }

    /// Register a callback invoked with `(from, to)` on every transition.
    pub fn on_state_changed<F>(&self, callback: F)
    where
        F: Fn(SessionState, SessionState) + Send + Sync + 'static,
    {
        self.hub.on_state_changed(Arc::new(callback));
    }

    /// Register a callback invoked for every hardware event, in emission order.
    ///
    /// For the acquisition-complete code the notice carries the extracted result.
    pub fn on_acquisition_event<F>(&self, callback: F)
    where
        F: Fn(&HardwareNotice) + Send + Sync + 'static,
    {
        self.hub.on_acquisition_event(Arc::new(callback));
    }

    /// Capabilities discovered at the last initialization.
    pub async fn capabilities(&self) -> Option<CapabilitySet> {
        self.core.lock().await.capabilities.clone()
    }

    /// Catalog discovered by the last successful connect.
    pub async fn last_catalog(&self) -> Option<DeviceCatalog> {
        self.core.lock().await.catalog.clone()
    }

    /// Monochromator and detector selected by the last successful connect.
    pub async fn selected_devices(&self) -> Option<DeviceSelection> {
        self.core.lock().await.selection.clone()
    }

    /// Run a discovery pass without connecting.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn discover(&self) -> SessionResult<DeviceCatalog> {
        let _core = self.core.lock().await;
        let state = self.hub.state();
        if state == SessionState::Acquiring {
            return Err(self.reject(state, "discover devices"));
        }
        self.run_blocking("discover", |adapter| DeviceCatalog::discover(&adapter))
            .await
    }

    /// Discover both device kinds, select the first of each and connect the detector.
    ///
    /// On failure the session stays `Unconnected`.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn select_and_connect(&self) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        match self.hub.state() {
            SessionState::Unconnected => {}
            SessionState::Faulted => return Err(self.reject(SessionState::Faulted, "connect")),
            _ => {
                let id = core
                    .selection
                    .as_ref()
                    .map(|s| s.detector.id().to_string())
                    .unwrap_or_default();
                let err = SessionError::AlreadyConnected { id };
                warn!(%err, "Connect rejected");
                self.hub.failure(&err);
                return Err(err);
            }
        }

        let connected = self
            .run_blocking("select_and_connect", |adapter| {
                let catalog = DeviceCatalog::discover(&adapter)?;
                let selection = catalog.select_defaults()?;
                let claim = ConnectionClaim::acquire(selection.detector.id())?;
                adapter.connect(selection.detector.id())?;
                Ok((catalog, selection, claim))
            })
            .await;
        let (catalog, selection, claim) = match connected {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "Connect failed");
                self.hub.failure(&e);
                return Err(e);
            }
        };

        info!(
            monochromator = %selection.monochromator,
            detector = %selection.detector,
            "Detector connected"
        );
        match self.run_blocking("current_temperature", |a| a.temperature()).await {
            Ok(celsius) => info!(temperature_c = celsius, "Detector temperature"),
            Err(e) => warn!(error = %e, "Detector temperature unavailable"),
        }

        core.catalog = Some(catalog);
        core.selection = Some(selection);
        core.claim = Some(claim);
        self.hub.transition(SessionState::Connected);
        Ok(())
    }

    /// Register the event sink and start hardware initialization.
    ///
    /// Returns once the hardware accepted the request; the session becomes `Ready` when the
    /// initialized event arrives.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn begin_initialize(&self) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        let state = self.hub.state();
        if state != SessionState::Connected {
            return Err(self.reject(state, "initialize"));
        }

        let (sink, events) = event_channel(self.settings.event_queue_capacity);
        if let Err(e) = self
            .run_blocking("register_event_sink", move |a| a.register_event_sink(sink))
            .await
        {
            let err = SessionError::Faulted(format!("event sink registration failed: {e}"));
            error!(%err, "Initialization aborted");
            self.hub.transition(SessionState::Faulted);
            self.hub.failure(&err);
            return Err(err);
        }

        core.pump_epoch += 1;
        core.capabilities = None;
        self.spawn_pump(core.pump_epoch, events);
        self.hub.transition(SessionState::Initializing);

        if let Err(e) = self.run_blocking("initialize", |a| a.initialize()).await {
            error!(error = %e, "Initialize request failed");
            core.pump_epoch += 1;
            self.stop_pump();
            self.hub.failure(&e);
            self.hub.transition(SessionState::Connected);
            return Err(e);
        }
        debug!("Initialize requested");
        Ok(())
    }

    /// `begin_initialize`, then wait for `Ready` up to the configured timeout.
    pub async fn initialize_and_wait(&self) -> SessionResult<()> {
        self.begin_initialize().await?;
        self.wait_for_state(SessionState::Ready, self.settings.initialize_timeout())
            .await
    }

    /// Apply acquisition parameters, continuing past sub-settings the hardware rejects.
    ///
    /// The region is checked against the chip geometry when it is known. Afterwards the
    /// detector readiness is queried; not being ready is only a warning.
    #[instrument(skip(self, params), fields(session = %self.id))]
    pub async fn apply_parameters(&self, params: &AcquisitionParameters) -> SessionResult<()> {
        let core = self.core.lock().await;
        let state = self.hub.state();
        if !matches!(state, SessionState::Connected | SessionState::Ready) {
            return Err(self.reject(state, "apply parameters"));
        }

        if let Some(caps) = core.capabilities.as_ref() {
            if !caps.gain_options.is_empty() && !caps.supports_gain(params.gain_token) {
                debug!(gain = params.gain_token, "Gain token was not enumerated by the detector");
            }
            if !caps.adc_options.is_empty() && !caps.supports_adc(params.adc_token) {
                debug!(adc = params.adc_token, "ADC token was not enumerated by the detector");
            }
        }

        match core.capabilities.as_ref().and_then(|c| c.chip_geometry()) {
            Some((width, height)) => {
                let violations = params.region.bounds_violations(width, height);
                if !violations.is_empty() {
                    let message = format!(
                        "Region {} exceeds {}x{} chip: {}",
                        params.region,
                        width,
                        height,
                        violations.join("; ")
                    );
                    match self.settings.region_validation {
                        RegionValidation::Advisory => {
                            warn!(region = %params.region, "{}", message);
                            self.hub.warning(message);
                        }
                        RegionValidation::Strict => {
                            let err = SessionError::RegionOutOfBounds(message);
                            error!(%err, "Parameters rejected");
                            self.hub.failure(&err);
                            return Err(err);
                        }
                    }
                }
            }
            None => debug!("Chip geometry unknown, region not checked"),
        }

        let owned = params.clone();
        let report = self
            .run_blocking("apply_parameters", move |a| Ok(a.apply_parameters(&owned)))
            .await?;

        match self
            .run_blocking("ready_for_acquisition", |a| a.is_ready_for_acquisition())
            .await
        {
            Ok(true) => debug!("Detector ready for acquisition"),
            Ok(false) => {
                warn!("Detector reports it is not ready for acquisition");
                self.hub
                    .warning("Detector reports it is not ready for acquisition");
            }
            Err(e) => {
                warn!(error = %e, "Readiness check failed");
                self.hub.warning(format!("Readiness check failed: {e}"));
            }
        }

        match report.into_result() {
            Ok(()) => {
                info!(
                    gain = params.gain_token,
                    adc = params.adc_token,
                    integration_ms = params.integration_time_ms,
                    format = %params.format,
                    region = %params.region,
                    "Parameters applied"
                );
                Ok(())
            }
            Err(partial) => {
                let err = SessionError::from(partial);
                warn!(%err, "Parameters partially applied");
                self.hub.failure(&err);
                Err(err)
            }
        }
    }

    /// Start a shutter-open acquisition.
    ///
    /// Returns once the hardware accepted the request; the session returns to `Ready` when
    /// the acquisition-complete event arrives.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn start_acquisition(&self) -> SessionResult<()> {
        let _core = self.core.lock().await;
        let state = self.hub.state();
        if state != SessionState::Ready {
            return Err(self.reject(state, "start acquisition"));
        }

        self.hub.transition(SessionState::Acquiring);
        if let Err(e) = self
            .run_blocking("do_acquisition", |a| a.start_acquisition(true))
            .await
        {
            error!(error = %e, "Acquisition request failed");
            self.hub.failure(&e);
            self.hub.transition(SessionState::Ready);
            return Err(e);
        }
        info!("Acquisition started");
        Ok(())
    }

    /// Start an acquisition and wait for its result.
    ///
    /// If the waiter falls behind the event channel and the completion notice is among the
    /// skipped events, this returns `ResultExtraction` once the session has left
    /// `Acquiring` instead of waiting for the timeout.
    pub async fn acquire(&self, timeout: Duration) -> SessionResult<Arc<AcquisitionResult>> {
        let mut events = self.hub.subscribe();
        self.start_acquisition().await?;

        let completion = async {
            let mut lagged = false;
            loop {
                let received = if lagged && self.hub.state() != SessionState::Acquiring {
                    // Acquisition already finished; only what is still buffered can hold
                    // the completion notice.
                    match events.try_recv() {
                        Ok(event) => Ok(event),
                        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                            Err(broadcast::error::RecvError::Lagged(skipped))
                        }
                        Err(broadcast::error::TryRecvError::Closed) => {
                            Err(broadcast::error::RecvError::Closed)
                        }
                        Err(broadcast::error::TryRecvError::Empty) => {
                            return Err(SessionError::ResultExtraction(
                                "completion notice was skipped by a lagging waiter".to_string(),
                            ));
                        }
                    }
                } else {
                    events.recv().await
                };

                match received {
                    Ok(SessionEvent::Hardware(notice))
                        if notice.source == EventSource::Update
                            && notice.code == ACQUISITION_COMPLETE =>
                    {
                        return notice.result.ok_or_else(|| {
                            SessionError::ResultExtraction(
                                "completion event yielded no usable result".to_string(),
                            )
                        });
                    }
                    Ok(SessionEvent::StateChanged {
                        to: SessionState::Faulted,
                        ..
                    }) => {
                        return Err(SessionError::Faulted(
                            "session faulted during acquisition".to_string(),
                        ));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Acquisition waiter lagged behind session events");
                        lagged = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SessionError::Faulted("session closed".to_string()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, completion)
            .await
            .map_err(|_| SessionError::Timeout {
                waiting_for: "acquisition completion".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Wait until the session reaches `target`.
    ///
    /// Fails early if the session faults while waiting for another state.
    pub async fn wait_for_state(
        &self,
        target: SessionState,
        timeout: Duration,
    ) -> SessionResult<()> {
        let mut rx = self.hub.watch_state();
        let reached = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| *s == target || *s == SessionState::Faulted)
                .await
                .map(|s| *s)
        })
        .await;

        match reached {
            Ok(Ok(state)) if state == target => Ok(()),
            Ok(Ok(state)) => Err(SessionError::Faulted(format!(
                "session became {state} while waiting for {target}"
            ))),
            Ok(Err(_)) => Err(SessionError::Faulted("session closed".to_string())),
            Err(_) => Err(SessionError::Timeout {
                waiting_for: format!("state {target}"),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Read the detector temperature in degrees Celsius.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn detector_temperature(&self) -> SessionResult<f64> {
        let _core = self.core.lock().await;
        let state = self.hub.state();
        if !state.is_connected() || state == SessionState::Faulted {
            return Err(self.reject(state, "read temperature"));
        }
        self.run_blocking("current_temperature", |a| a.temperature())
            .await
    }

    /// Close communications and release the detector claim.
    ///
    /// Not permitted while `Acquiring`. A `Faulted` session stays `Faulted`; every other
    /// state returns to `Unconnected`.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn teardown(&self) -> SessionResult<()> {
        let mut core = self.core.lock().await;
        let state = self.hub.state();
        match state {
            SessionState::Acquiring => return Err(self.reject(state, "teardown")),
            SessionState::Unconnected => return Ok(()),
            _ => {}
        }

        core.pump_epoch += 1;
        self.stop_pump();
        if let Err(e) = self.run_blocking("close_communications", |a| a.disconnect()).await {
            warn!(error = %e, "Closing communications failed");
        }
        core.claim = None;
        core.capabilities = None;
        core.selection = None;
        core.catalog = None;

        if state != SessionState::Faulted {
            self.hub.transition(SessionState::Unconnected);
        }
        info!(from = %state, "Session torn down");
        Ok(())
    }

    fn reject(&self, state: SessionState, operation: &'static str) -> SessionError {
        let err = SessionError::InvalidStateTransition { state, operation };
        warn!(%err, "Operation rejected");
        self.hub.failure(&err);
        err
    }

    /// Run a proxy call on the blocking pool, inside the caller's span.
    async fn run_blocking<T, F>(&self, operation: &'static str, call: F) -> SessionResult<T>
    where
        F: FnOnce(DetectorAdapter) -> SessionResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let adapter = self.adapter.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| call(adapter)))
            .await
            .map_err(|e| SessionError::HardwareUnavailable {
                operation,
                message: format!("proxy call did not complete: {e}"),
            })?
    }

    fn spawn_pump(&self, epoch: u64, events: EventReceiver) {
        let pump = EventPump {
            epoch,
            adapter: self.adapter.clone(),
            core: Arc::clone(&self.core),
            hub: Arc::clone(&self.hub),
        };
        let span = info_span!("event_pump", session = %self.id, epoch);
        let handle = tokio::spawn(pump.run(events).instrument(span));

        let mut slot = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn stop_pump(&self) {
        let mut slot = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_pump();
        if let Ok(mut core) = self.core.try_lock() {
            core.pump_epoch += 1;
            if core.claim.take().is_some() {
                if let Err(e) = self.adapter.disconnect() {
                    debug!(session = %self.id, error = %e, "Disconnect on drop failed");
                }
            }
        }
    }
}

// =============================================================================
// Event pump
// =============================================================================

/// Single consumer of the hardware event queue.
struct EventPump {
    epoch: u64,
    adapter: DetectorAdapter,
    core: Arc<Mutex<SessionCore>>,
    hub: Arc<NotificationHub>,
}

impl EventPump {
    async fn run(self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            let mut core = self.core.lock().await;
            if core.pump_epoch != self.epoch {
                return;
            }
            self.handle(&mut core, event).await;
        }

        let core = self.core.lock().await;
        if core.pump_epoch != self.epoch {
            return;
        }
        let state = self.hub.state();
        if !matches!(state, SessionState::Unconnected | SessionState::Faulted) {
            let err = SessionError::Faulted("hardware event sink closed".to_string());
            error!(%err, from = %state, "Event pump stopped");
            self.hub.transition(SessionState::Faulted);
            self.hub.failure(&err);
        }
    }

    async fn handle(&self, core: &mut SessionCore, event: HardwareEvent) {
        let state = self.hub.state();
        let mut notice = HardwareNotice::from_event(&event);

        match event.source {
            EventSource::Initialize if state == SessionState::Initializing => {
                info!(
                    status = event.code,
                    description = %event.description,
                    "Detector initialized"
                );
                self.hub.hardware(notice);
                core.capabilities = Some(self.populate_capabilities().await);
                self.hub.transition(SessionState::Ready);
            }
            EventSource::Update
                if state == SessionState::Acquiring && event.is_acquisition_complete() =>
            {
                match extract_result(&event) {
                    Ok(result) => {
                        info!(samples = result.len(), "Acquisition complete");
                        notice.result = Some(Arc::new(result));
                        self.hub.hardware(notice);
                    }
                    Err(err) => {
                        error!(%err, "Acquisition result unavailable");
                        self.hub.hardware(notice);
                        self.hub.failure(&err);
                    }
                }
                self.hub.transition(SessionState::Ready);
            }
            _ => {
                debug!(
                    source = %event.source,
                    code = event.code,
                    description = %event.description,
                    %state,
                    "Hardware event"
                );
                self.hub.hardware(notice);
            }
        }
    }

    /// Query every capability independently; failures are logged and skipped.
    async fn populate_capabilities(&self) -> CapabilitySet {
        let adapter = self.adapter.clone();
        let span = Span::current();
        let queried = tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                let mut caps = CapabilitySet::default();
                let mut failures = Vec::new();

                match adapter.chip_geometry() {
                    Ok((w, h)) => {
                        caps.chip_width = Some(w);
                        caps.chip_height = Some(h);
                    }
                    Err(e) => failures.push(e),
                }
                match adapter.default_units(UnitsType::Time) {
                    Ok(units) => caps.default_integration_units = Some(units),
                    Err(e) => failures.push(e),
                }
                match adapter.integration_time() {
                    Ok(t) => caps.integration_time = Some(t),
                    Err(e) => failures.push(e),
                }
                match adapter.current_gain() {
                    Ok(g) => caps.current_gain = Some(g),
                    Err(e) => failures.push(e),
                }
                match adapter.gain_options().collect::<SessionResult<Vec<_>>>() {
                    Ok(options) => caps.gain_options = options,
                    Err(e) => failures.push(e),
                }
                match adapter.current_adc() {
                    Ok(a) => caps.current_adc = Some(a),
                    Err(e) => failures.push(e),
                }
                match adapter.adc_options().collect::<SessionResult<Vec<_>>>() {
                    Ok(options) => caps.adc_options = options,
                    Err(e) => failures.push(e),
                }
                (caps, failures)
            })
        })
        .await;

        let (caps, failures) = match queried {
            Ok(queried) => queried,
            Err(e) => {
                let err = SessionError::HardwareUnavailable {
                    operation: "populate_capabilities",
                    message: e.to_string(),
                };
                (CapabilitySet::default(), vec![err])
            }
        };

        for failure in &failures {
            warn!(error = %failure, "Capability query failed");
            self.hub
                .warning(format!("Capability query failed: {failure}"));
        }
        info!(
            chip = ?caps.chip_geometry(),
            units = ?caps.default_integration_units,
            integration_time = ?caps.integration_time,
            gain = ?caps.current_gain,
            adc = ?caps.current_adc,
            gains = caps.gain_options.len(),
            adcs = caps.adc_options.len(),
            "Capabilities populated"
        );
        for option in &caps.gain_options {
            debug!(token = option.token, name = %option.name, "Gain option");
        }
        for option in &caps.adc_options {
            debug!(token = option.token, name = %option.name, "ADC option");
        }
        caps
    }
}

fn extract_result(event: &HardwareEvent) -> SessionResult<AcquisitionResult> {
    let accessor = event.payload.as_ref().ok_or_else(|| {
        SessionError::ResultExtraction("completion event carried no result".to_string())
    })?;
    let result = accessor
        .result()
        .map_err(|e| SessionError::ResultExtraction(format!("{e:#}")))?
        .ok_or_else(|| SessionError::ResultExtraction("missing result object".to_string()))?;
    let data = result
        .data_objects
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::ResultExtraction("missing data object".to_string()))?;

    if data.samples.len() != data.dimensions.sample_count() {
        warn!(
            samples = data.samples.len(),
            expected = data.dimensions.sample_count(),
            "Sample count does not match reported dimensions"
        );
    }
    Ok(AcquisitionResult {
        raw_samples: data.samples,
        dimensions: data.dimensions,
        completion: CompletionStatus {
            code: event.code,
            description: event.description.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hardware::mock::{MockOperation, MockSpectrometer};
    use crate::hardware::ResultObject;
    use serial_test::serial;

    const WAIT: Duration = Duration::from_secs(5);

    fn manual_session() -> (Arc<MockSpectrometer>, SessionController) {
        let mock = Arc::new(MockSpectrometer::builder().auto_events(false).build());
        let controller = SessionController::new(mock.clone(), SessionConfig::default());
        (mock, controller)
    }

    async fn ready(mock: &MockSpectrometer, controller: &SessionController) {
        controller.select_and_connect().await.unwrap();
        controller.begin_initialize().await.unwrap();
        mock.emit_initialized(0).unwrap();
        controller
            .wait_for_state(SessionState::Ready, WAIT)
            .await
            .unwrap();
    }

    #[test]
    fn extraction_requires_payload_and_data_object() {
        let bare = HardwareEvent::update(ACQUISITION_COMPLETE, "done");
        assert_eq!(
            extract_result(&bare).unwrap_err().kind(),
            ErrorKind::ResultExtraction
        );

        let empty = bare.clone().with_payload(Arc::new(ResultObject::default()));
        assert!(extract_result(&empty)
            .unwrap_err()
            .to_string()
            .contains("missing data object"));
    }

    #[tokio::test]
    #[serial]
    async fn operations_rejected_out_of_order() {
        let (_mock, controller) = manual_session();
        let err = controller.begin_initialize().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        let err = controller.start_acquisition().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        assert_eq!(controller.current_state(), SessionState::Unconnected);
    }

    #[tokio::test]
    #[serial]
    async fn capabilities_populated_on_ready() {
        let (mock, controller) = manual_session();
        ready(&mock, &controller).await;

        let caps = controller.capabilities().await.unwrap();
        assert_eq!(caps.chip_geometry(), Some((1024, 256)));
        assert_eq!(caps.default_integration_units.as_deref(), Some("ms"));
        assert_eq!(caps.gain_options.len(), 3);
        assert_eq!(caps.adc_options.len(), 2);
        assert_eq!(caps.current_gain, Some(0));
        controller.teardown().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn capability_failure_still_reaches_ready() {
        let (mock, controller) = manual_session();
        mock.fail_operation(MockOperation::EnumerateAdc);
        mock.fail_operation(MockOperation::ChipSize);
        let mut events = controller.subscribe();
        ready(&mock, &controller).await;

        let caps = controller.capabilities().await.unwrap();
        assert!(caps.adc_options.is_empty());
        assert_eq!(caps.chip_geometry(), None);
        assert_eq!(caps.gain_options.len(), 3);

        let mut warnings = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::Warning { .. }) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 2);
        controller.teardown().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn initialize_request_failure_returns_to_connected() {
        let (mock, controller) = manual_session();
        controller.select_and_connect().await.unwrap();
        mock.fail_operation(MockOperation::Initialize);
        let err = controller.begin_initialize().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
        assert_eq!(controller.current_state(), SessionState::Connected);
        controller.teardown().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn sink_registration_failure_faults_session() {
        let (mock, controller) = manual_session();
        controller.select_and_connect().await.unwrap();
        mock.fail_operation(MockOperation::RegisterEventSink);
        let err = controller.begin_initialize().await.unwrap_err();
        assert!(!err.can_recover());
        assert_eq!(controller.current_state(), SessionState::Faulted);
        controller.teardown().await.unwrap();
        assert_eq!(controller.current_state(), SessionState::Faulted);
    }

    #[tokio::test]
    #[serial]
    async fn strict_region_validation_blocks_apply() {
        let mock = Arc::new(MockSpectrometer::builder().auto_events(false).build());
        let settings = SessionConfig {
            region_validation: RegionValidation::Strict,
            ..Default::default()
        };
        let controller = SessionController::new(mock.clone(), settings);
        ready(&mock, &controller).await;

        let mut params = AcquisitionParameters::default();
        params.region.x_size = 2000;
        let err = controller.apply_parameters(&params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegionOutOfBounds);
        assert_eq!(mock.region(), Default::default());
        assert_eq!(controller.current_state(), SessionState::Ready);
        controller.teardown().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn drop_releases_claim() {
        let (mock, controller) = manual_session();
        controller.select_and_connect().await.unwrap();
        assert!(crate::session::registry::is_claimed("D1"));
        drop(controller);
        assert!(!crate::session::registry::is_claimed("D1"));
        assert!(!mock.is_open());
    }
}
