//! Bootstrap identity and request/response correlation

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{LwM2mError, Result};

/// Request that starts a bootstrap session for this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapRequest {
    endpoint: String,
}

impl BootstrapRequest {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Err(LwM2mError::InvalidDefinition(
                "client endpoint identifier is empty".into(),
            ));
        }
        Ok(Self { endpoint })
    }

    /// The client endpoint identifier
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Uri-Query option carrying the endpoint, `ep=<name>`
    pub fn query(&self) -> String {
        format!("ep={}", self.endpoint)
    }
}

impl fmt::Display for BootstrapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BootstrapRequest [endpoint={}]", self.endpoint)
    }
}

/// Single-assignment slots for responses that arrive asynchronously
///
/// Each correlation id completes at most once. Completing an unknown or
/// already-completed id does nothing and reports `false`.
#[derive(Debug)]
pub struct PendingResponses<T> {
    slots: Mutex<HashMap<u64, oneshot::Sender<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for PendingResponses<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> PendingResponses<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh correlation id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a slot for `id` and return the receiving end
    ///
    /// Re-opening a pending id closes the previous receiver.
    pub fn expect(&self, id: u64) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);
        rx
    }

    /// Deliver the response for `id`
    pub fn complete(&self, id: u64, value: T) -> bool {
        let Some(tx) = self.slots.lock().remove(&id) else {
            debug!(id, "No pending slot, response ignored");
            return false;
        };
        tx.send(value).is_ok()
    }

    /// Drop the slot for `id` without a value
    pub fn abandon(&self, id: u64) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let request = BootstrapRequest::new("urn:imei:490154203237518").unwrap();
        assert_eq!(request.endpoint(), "urn:imei:490154203237518");
        assert_eq!(request.query(), "ep=urn:imei:490154203237518");
        assert!(BootstrapRequest::new("").is_err());
    }

    #[test]
    fn test_completes_once() {
        let pending = PendingResponses::new();
        let id = pending.next_id();
        let mut rx = pending.expect(id);

        assert!(pending.complete(id, "first"));
        assert!(!pending.complete(id, "second"));
        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unknown_and_abandoned() {
        let pending: PendingResponses<u8> = PendingResponses::new();
        assert!(!pending.complete(42, 1));

        let id = pending.next_id();
        let mut rx = pending.expect(id);
        assert!(pending.abandon(id));
        assert!(rx.try_recv().is_err());
        assert!(!pending.complete(id, 1));
    }

    #[test]
    fn test_dropped_receiver() {
        let pending = PendingResponses::new();
        let id = pending.next_id();
        drop(pending.expect(id));
        assert!(!pending.complete(id, ()));
    }
}
