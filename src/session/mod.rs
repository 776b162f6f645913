//! Device session control.
//!
//! ```text
//! Unconnected -> Connected -> Initializing -> Ready <-> Acquiring
//!       \____________\______________\___________\__________\____-> Faulted
//! ```
//!
//! - `controller`: [`SessionController`], the state machine and its event pump
//! - `events`: notifications delivered to subscribers and the acquisition result
//! - `registry`: process-wide ownership of connected detector descriptors

pub mod controller;
pub mod events;
pub mod registry;

pub use controller::SessionController;
pub use events::{AcquisitionResult, CompletionStatus, HardwareNotice, SessionEvent};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No hardware handle is held.
    #[default]
    Unconnected,
    /// Communications with the detector are open.
    Connected,
    /// Waiting for the hardware's initialized event.
    Initializing,
    /// Capabilities known; parameters may be applied and acquisitions started.
    Ready,
    /// Waiting for the acquisition-complete event.
    Acquiring,
    /// The adapter is unusable; the session must be torn down and rebuilt.
    Faulted,
}

impl SessionState {
    /// True while a hardware handle is held.
    pub fn is_connected(&self) -> bool {
        !matches!(self, SessionState::Unconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "Unconnected",
            SessionState::Connected => "Connected",
            SessionState::Initializing => "Initializing",
            SessionState::Ready => "Ready",
            SessionState::Acquiring => "Acquiring",
            SessionState::Faulted => "Faulted",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unconnected_holds_no_handle() {
        assert!(!SessionState::Unconnected.is_connected());
        assert!(SessionState::Connected.is_connected());
        assert!(SessionState::Faulted.is_connected());
    }
}
