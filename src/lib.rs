//! # Spectro DAQ Core Library
//!
//! This crate drives a laboratory spectroscopy instrument made of a monochromator and a
//! CCD detector, both reached through a vendor hardware proxy. It owns the sequencing that
//! takes a session from "nothing selected" to "acquisition result available": device
//! discovery, connection, asynchronous hardware initialization, parameter application and
//! acquisition, while reacting to status events the hardware emits on its own thread.
//!
//! ## Crate Structure
//!
//! - **`catalog`**: Discovery of connectable monochromator and detector units through the
//!   proxy's first/next cursor protocol. See `catalog::DeviceCatalog`.
//! - **`config`**: Figment-based configuration loaded from `config/spectro.toml` and
//!   `SPECTRO_DAQ_` environment variables.
//! - **`error`**: The `SessionError` enum; no raw hardware error crosses the controller.
//! - **`hardware`**: The hardware proxy contract (`proxy`), the detector adapter that wraps
//!   it (`adapter`), cursor iteration (`cursor`) and a simulated instrument (`mock`).
//! - **`logging`**: `tracing-subscriber` initialization (pretty, compact or JSON output).
//! - **`parameters`**: Acquisition parameters, region geometry and the capability set
//!   discovered at initialization.
//! - **`session`**: The device session controller state machine, its event pump and the
//!   notification channels callers subscribe to.

pub mod catalog;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod parameters;
pub mod session;

pub use error::{ErrorKind, SessionError, SessionResult};
pub use session::{SessionController, SessionEvent, SessionState};
