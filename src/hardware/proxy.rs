//! Vendor hardware proxy contract.
//!
//! `HardwareProxy` is the operation surface the vendor SDK exposes for the configuration
//! browser (device enumeration) and the CCD detector object. Implementations are opaque:
//! they may talk to a COM server, a C library or a simulation. Every method is synchronous
//! and may fail; completion of `initialize` and `do_acquisition` is reported later through
//! the registered [`EventSink`], on a thread owned by the proxy.
//!
//! # Thread Safety
//! - All methods take `&self`; implementations use interior mutability.
//! - Events must be emitted from the proxy's own thread(s), never from inside an async task,
//!   because [`EventSink::emit`] blocks while the controller's queue is full.

use crate::hardware::DeviceKind;
use crate::parameters::{AcquisitionFormat, OptionToken, Region};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Update code the detector emits when an acquisition has completed.
pub const ACQUISITION_COMPLETE: i32 = 100;

/// Token value the proxy returns from gain/ADC enumeration when there is no (further) option.
pub const NO_MORE_OPTIONS: i32 = -1;

/// One raw entry from the configuration browser.
///
/// An empty id or name marks the end of the enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Unique id of the unit.
    pub id: String,
    /// Display name of the unit.
    pub name: String,
}

impl CatalogEntry {
    /// Create an entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// True if this entry is the end-of-enumeration sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.id.is_empty() || self.name.is_empty()
    }
}

/// Unit categories for `default_units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitsType {
    /// Integration time units.
    Time,
    /// Wavelength units.
    Wavelength,
}

/// Which detector event stream produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Initialization finished (code is the initialization status).
    Initialize,
    /// Operation status changed.
    OperationStatus,
    /// Acquisition update; [`ACQUISITION_COMPLETE`] marks completion.
    Update,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Initialize => write!(f, "initialize"),
            EventSource::OperationStatus => write!(f, "operation_status"),
            EventSource::Update => write!(f, "update"),
        }
    }
}

/// Frame geometry of a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Samples per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl Dimensions {
    /// Total number of samples.
    pub fn sample_count(&self) -> usize {
        self.width * self.height
    }
}

/// Raw samples of one data object in a hardware result.
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    /// Samples in row-major order.
    pub samples: Vec<f64>,
    /// Frame geometry.
    pub dimensions: Dimensions,
}

/// Result object attached to an acquisition-complete event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultObject {
    /// Data objects, in hardware order.
    pub data_objects: Vec<DataObject>,
}

impl ResultObject {
    /// Result with a single data object.
    pub fn single(samples: Vec<f64>, dimensions: Dimensions) -> Self {
        Self {
            data_objects: vec![DataObject {
                samples,
                dimensions,
            }],
        }
    }

    /// The first data object, if any.
    pub fn first_data_object(&self) -> Option<&DataObject> {
        self.data_objects.first()
    }
}

/// Accessor for the opaque result data attached to an event.
pub trait ResultAccessor: Send + Sync + fmt::Debug {
    /// Fetch the result object. `Ok(None)` means the hardware attached none.
    fn result(&self) -> Result<Option<ResultObject>>;
}

impl ResultAccessor for ResultObject {
    fn result(&self) -> Result<Option<ResultObject>> {
        Ok(Some(self.clone()))
    }
}

/// One event emitted by the hardware proxy.
#[derive(Debug, Clone)]
pub struct HardwareEvent {
    /// Event stream.
    pub source: EventSource,
    /// Status or update code.
    pub code: i32,
    /// Description supplied by the hardware.
    pub description: String,
    /// Raw data accessor, present on acquisition-complete updates.
    pub payload: Option<Arc<dyn ResultAccessor>>,
    /// When the proxy emitted the event.
    pub emitted_at: DateTime<Utc>,
}

impl HardwareEvent {
    fn new(source: EventSource, code: i32, description: impl Into<String>) -> Self {
        Self {
            source,
            code,
            description: description.into(),
            payload: None,
            emitted_at: Utc::now(),
        }
    }

    /// Initialization finished with `status`.
    pub fn initialized(status: i32, description: impl Into<String>) -> Self {
        Self::new(EventSource::Initialize, status, description)
    }

    /// Operation status notification.
    pub fn operation_status(status: i32, description: impl Into<String>) -> Self {
        Self::new(EventSource::OperationStatus, status, description)
    }

    /// Acquisition update with `code`.
    pub fn update(code: i32, description: impl Into<String>) -> Self {
        Self::new(EventSource::Update, code, description)
    }

    /// Acquisition-complete update carrying `payload`.
    pub fn completed(payload: Arc<dyn ResultAccessor>) -> Self {
        Self::update(ACQUISITION_COMPLETE, "Acquisition complete").with_payload(payload)
    }

    /// Attach a raw data accessor.
    pub fn with_payload(mut self, payload: Arc<dyn ResultAccessor>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// True for the update whose code is [`ACQUISITION_COMPLETE`].
    pub fn is_acquisition_complete(&self) -> bool {
        self.source == EventSource::Update && self.code == ACQUISITION_COMPLETE
    }
}

/// Sending half of the adapter-to-controller event queue.
///
/// Handed to the proxy by `register_event_sink`. Events are delivered in emission order;
/// none are dropped while the controller is listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<HardwareEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<HardwareEvent>) -> Self {
        Self { tx }
    }

    /// Forward one event from a proxy thread, blocking while the queue is full.
    ///
    /// Inside a tokio runtime the call cannot block; the event is queued without waiting
    /// and an error is returned if the queue is full. Async proxies should prefer
    /// [`EventSink::emit_async`].
    pub fn emit(&self, event: HardwareEvent) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return self.tx.try_send(event).map_err(|e| match e {
                mpsc::error::TrySendError::Full(ev) => {
                    anyhow!("event queue full, dropped {} event", ev.source)
                }
                mpsc::error::TrySendError::Closed(ev) => {
                    anyhow!("event sink closed, dropped {} event", ev.source)
                }
            });
        }
        self.tx
            .blocking_send(event)
            .map_err(|e| anyhow!("event sink closed, dropped {} event", e.0.source))
    }

    /// Forward one event from an async task, waiting for queue capacity.
    pub async fn emit_async(&self, event: HardwareEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| anyhow!("event sink closed, dropped {} event", e.0.source))
    }

    /// True once the controller side has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Vendor hardware proxy for the configuration browser and the CCD detector.
pub trait HardwareProxy: Send + Sync {
    /// Proxy name for logs.
    fn name(&self) -> &str;

    /// Load the configuration browser. Called before every discovery pass.
    fn load_catalog(&self) -> Result<()>;

    /// Restart enumeration of `kind` and return its first entry.
    fn first_device(&self, kind: DeviceKind) -> Result<Option<CatalogEntry>>;

    /// Next entry of `kind`; `None` (or a sentinel entry) when exhausted.
    fn next_device(&self, kind: DeviceKind) -> Result<Option<CatalogEntry>>;

    /// Bind the detector object to a unit id and load its driver.
    fn bind_detector(&self, id: &str) -> Result<()>;

    /// Open communications with the bound detector.
    fn open_communications(&self) -> Result<()>;

    /// Close communications with the bound detector.
    fn close_communications(&self) -> Result<()>;

    /// Register the sink for initialize, operation-status and update events.
    fn register_event_sink(&self, sink: EventSink) -> Result<()>;

    /// Start asynchronous initialization; completion arrives as an initialize event.
    fn initialize(&self) -> Result<()>;

    /// Current detector temperature in degrees Celsius.
    fn current_temperature(&self) -> Result<f64>;

    /// Chip size in pixels (width, height).
    fn chip_size(&self) -> Result<(u32, u32)>;

    /// Default units for `units`.
    fn default_units(&self, units: UnitsType) -> Result<String>;

    /// Current integration time in default time units.
    fn integration_time(&self) -> Result<f64>;

    /// Set the integration time.
    fn set_integration_time(&self, value: f64) -> Result<()>;

    /// Current gain token.
    fn gain(&self) -> Result<i32>;

    /// Select a gain token.
    fn set_gain(&self, token: i32) -> Result<()>;

    /// Restart gain enumeration; token [`NO_MORE_OPTIONS`] when none.
    fn first_gain(&self) -> Result<OptionToken>;

    /// Next gain option; token [`NO_MORE_OPTIONS`] when exhausted.
    fn next_gain(&self) -> Result<OptionToken>;

    /// Current ADC token.
    fn current_adc(&self) -> Result<i32>;

    /// Select an ADC token.
    fn select_adc(&self, token: i32) -> Result<()>;

    /// Restart ADC enumeration; token [`NO_MORE_OPTIONS`] when none.
    fn first_adc(&self) -> Result<OptionToken>;

    /// Next ADC option; token [`NO_MORE_OPTIONS`] when exhausted.
    fn next_adc(&self) -> Result<OptionToken>;

    /// Define the acquisition format and number of areas.
    fn define_acquisition_format(&self, format: AcquisitionFormat, areas: u32) -> Result<()>;

    /// Define the geometry of area `area` (1-based).
    fn define_area(&self, area: u32, region: &Region) -> Result<()>;

    /// Whether the detector reports it is ready to acquire.
    fn ready_for_acquisition(&self) -> Result<bool>;

    /// Start an acquisition; completion arrives as an update event.
    fn do_acquisition(&self, open_shutter: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_update_code_100_only() {
        assert!(HardwareEvent::update(ACQUISITION_COMPLETE, "done").is_acquisition_complete());
        assert!(!HardwareEvent::update(1, "progress").is_acquisition_complete());
        assert!(!HardwareEvent::initialized(ACQUISITION_COMPLETE, "init").is_acquisition_complete());
        assert!(!HardwareEvent::operation_status(ACQUISITION_COMPLETE, "status")
            .is_acquisition_complete());
    }

    #[tokio::test]
    async fn sink_delivers_from_async_tasks() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);

        let from_task = sink.clone();
        tokio::spawn(async move { from_task.emit(HardwareEvent::update(1, "progress")) })
            .await
            .unwrap()
            .unwrap();
        let awaiting = sink.clone();
        tokio::spawn(async move {
            awaiting
                .emit_async(HardwareEvent::update(2, "progress"))
                .await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().code, 1);
        assert_eq!(rx.recv().await.unwrap().code, 2);
    }

    #[tokio::test]
    async fn full_queue_in_async_context_is_an_error() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        sink.emit(HardwareEvent::update(1, "first")).unwrap();
        assert!(sink.emit(HardwareEvent::update(2, "second")).is_err());
        assert_eq!(rx.recv().await.unwrap().code, 1);
    }

    #[test]
    fn blocking_emit_from_proxy_thread() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        std::thread::spawn(move || sink.emit(HardwareEvent::update(7, "thread")))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().code, 7);
    }

    #[test]
    fn empty_id_or_name_is_sentinel() {
        assert!(CatalogEntry::new("", "MonoA").is_sentinel());
        assert!(CatalogEntry::new("M1", "").is_sentinel());
        assert!(!CatalogEntry::new("M1", "MonoA").is_sentinel());
    }

    #[test]
    fn result_object_is_its_own_accessor() {
        let dims = Dimensions {
            width: 4,
            height: 1,
        };
        let object = ResultObject::single(vec![1.0, 2.0, 3.0, 4.0], dims);
        let fetched = object.result().unwrap().unwrap();
        assert_eq!(fetched.first_data_object().unwrap().dimensions.sample_count(), 4);
    }

    #[test]
    fn emit_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(sink.emit(HardwareEvent::update(1, "progress")).is_err());
    }
}
