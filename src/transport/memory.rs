//! In-process mailbox
//!
//! `Mailbox` is the envelope store shared by `MemoryTransport` and the relay
//! server.

use crate::transport::{Envelope, Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Envelopes keyed by destination transport address
#[derive(Debug, Default)]
pub struct Mailbox {
    boxes: HashMap<String, Vec<Envelope>>,
    next_id: u64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an envelope; returns its transport id
    pub fn put(&mut self, mut envelope: Envelope) -> String {
        self.next_id += 1;
        let id = self.next_id.to_string();
        envelope.transport_id = Some(id.clone());
        self.boxes
            .entry(envelope.destination_transport_address.clone())
            .or_default()
            .push(envelope);
        id
    }

    /// Copies of the envelopes waiting at `addresses`
    pub fn fetch(&self, addresses: &[String]) -> Vec<Envelope> {
        addresses
            .iter()
            .filter_map(|a| self.boxes.get(a))
            .flatten()
            .cloned()
            .collect()
    }

    /// Remove one envelope; false if unknown
    pub fn remove(&mut self, transport_id: &str) -> bool {
        for envelopes in self.boxes.values_mut() {
            if let Some(pos) = envelopes
                .iter()
                .position(|e| e.transport_id.as_deref() == Some(transport_id))
            {
                envelopes.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of stored envelopes
    pub fn len(&self) -> usize {
        self.boxes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport over a mailbox shared by every clone
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    mailbox: Arc<Mutex<Mailbox>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Mailbox>, TransportError> {
        self.mailbox
            .lock()
            .map_err(|_| TransportError::ConnectionFailed("mailbox lock poisoned".to_string()))
    }

    /// Number of envelopes not yet deleted
    pub fn pending(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, envelope: &Envelope) -> Result<String, TransportError> {
        Ok(self.lock()?.put(envelope.clone()))
    }

    fn receive(&self, addresses: &[String]) -> Result<Vec<Envelope>, TransportError> {
        Ok(self.lock()?.fetch(addresses))
    }

    fn delete(&self, transport_id: &str) -> Result<(), TransportError> {
        if self.lock()?.remove(transport_id) {
            Ok(())
        } else {
            Err(TransportError::NotFound(transport_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(to: &str) -> Envelope {
        Envelope::new("a@r", to, "1A", None, 5, 0, 0, b"note")
    }

    #[test]
    fn test_clones_share_the_mailbox() {
        let alice = MemoryTransport::new();
        let bob = alice.clone();

        let id = alice.send(&envelope("bob@r")).unwrap();
        let received = bob.receive(&["bob@r".to_string()]).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].transport_id.as_deref(), Some(id.as_str()));

        // Receiving does not consume
        assert_eq!(bob.pending(), 1);
        bob.delete(&id).unwrap();
        assert_eq!(alice.pending(), 0);
        assert!(matches!(bob.delete(&id), Err(TransportError::NotFound(_))));
    }

    #[test]
    fn test_receive_only_own_addresses() {
        let transport = MemoryTransport::new();
        transport.send(&envelope("bob@r")).unwrap();
        transport.send(&envelope("carol@r")).unwrap();

        assert_eq!(transport.receive(&["carol@r".to_string()]).unwrap().len(), 1);
        assert_eq!(
            transport
                .receive(&["bob@r".to_string(), "carol@r".to_string()])
                .unwrap()
                .len(),
            2
        );
        assert!(transport.receive(&[]).unwrap().is_empty());
    }
}
