//! Hardware access for the spectroscopy instrument.
//!
//! - `proxy`: the vendor hardware proxy contract and its event records
//! - `adapter`: `DetectorAdapter`, the controller-facing wrapper around a proxy
//! - `cursor`: first/next enumeration as a standard iterator
//! - `mock`: a simulated monochromator + CCD for tests and the CLI

pub mod adapter;
pub mod cursor;
pub mod mock;
pub mod proxy;

pub use adapter::{event_channel, ApplyReport, DetectorAdapter, EventReceiver};
pub use proxy::{
    DataObject, Dimensions, EventSink, EventSource, HardwareEvent, HardwareProxy,
    ResultAccessor, ResultObject, UnitsType, ACQUISITION_COMPLETE,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of connectable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Wavelength-dispersal unit.
    Monochromator,
    /// CCD detector.
    Detector,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Monochromator => write!(f, "monochromator"),
            DeviceKind::Detector => write!(f, "detector"),
        }
    }
}

/// A connectable physical unit, as reported by discovery.
///
/// Immutable once discovered; a later discovery pass may no longer report it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    id: String,
    display_name: String,
    kind: DeviceKind,
}

impl DeviceDescriptor {
    /// Create a descriptor.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind,
        }
    }

    /// Unique id used to bind the unit.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Unit kind.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:[{}]", self.id, self.display_name)
    }
}
