//! Process-wide ownership of detector descriptors.
//!
//! At most one session may hold a connection to a given descriptor. A session takes a
//! [`ConnectionClaim`] before opening communications; the claim is released when dropped.

use crate::error::{SessionError, SessionResult};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

static CLAIMED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn claimed() -> MutexGuard<'static, HashSet<String>> {
    CLAIMED.lock().unwrap_or_else(|poisoned| {
        warn!("Connection registry mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Exclusive ownership of one descriptor id.
#[derive(Debug)]
pub struct ConnectionClaim {
    id: String,
}

impl ConnectionClaim {
    /// Claim `id`, failing with `AlreadyConnected` if another session holds it.
    pub fn acquire(id: &str) -> SessionResult<Self> {
        if !claimed().insert(id.to_string()) {
            return Err(SessionError::AlreadyConnected { id: id.to_string() });
        }
        debug!(id, "Descriptor claimed");
        Ok(Self { id: id.to_string() })
    }

    /// Claimed descriptor id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ConnectionClaim {
    fn drop(&mut self) {
        claimed().remove(&self.id);
        debug!(id = %self.id, "Descriptor released");
    }
}

/// Whether any session currently holds `id`.
pub fn is_claimed(id: &str) -> bool {
    claimed().contains(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serial_test::serial;

    #[test]
    #[serial]
    fn second_claim_is_rejected_until_release() {
        let first = ConnectionClaim::acquire("REG-1").unwrap();
        let err = ConnectionClaim::acquire("REG-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
        assert!(is_claimed("REG-1"));

        drop(first);
        assert!(!is_claimed("REG-1"));
        let again = ConnectionClaim::acquire("REG-1").unwrap();
        assert_eq!(again.id(), "REG-1");
    }

    #[test]
    #[serial]
    fn claims_are_per_descriptor() {
        let _a = ConnectionClaim::acquire("REG-A").unwrap();
        let _b = ConnectionClaim::acquire("REG-B").unwrap();
        assert!(is_claimed("REG-A") && is_claimed("REG-B"));
    }
}
