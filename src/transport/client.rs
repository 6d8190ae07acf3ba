//! Blocking client of the relay server
//!
//! Commands are synchronous, so every request runs to completion on a small
//! private runtime: connect, send one frame, read one frame.

use crate::transport::message::RelayMessage;
use crate::transport::server::RelayCodec;
use crate::transport::{Envelope, Transport, TransportError};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::codec::Framed;

/// Request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport through a relay at `host:port`
pub struct RelayTransport {
    address: String,
    runtime: Runtime,
}

impl RelayTransport {
    pub fn new(address: &str) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            address: address.to_string(),
            runtime,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn request(&self, request: RelayMessage) -> Result<RelayMessage, TransportError> {
        self.runtime.block_on(async {
            tokio::time::timeout(REQUEST_TIMEOUT, exchange(&self.address, request))
                .await
                .map_err(|_| TransportError::ConnectionFailed("relay timed out".to_string()))?
        })
    }

    /// Check the relay answers
    pub fn ping(&self) -> Result<(), TransportError> {
        let nonce = rand::random::<u64>();
        match self.request(RelayMessage::Ping(nonce))? {
            RelayMessage::Pong(n) if n == nonce => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

async fn exchange(address: &str, request: RelayMessage) -> Result<RelayMessage, TransportError> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
    let mut framed = Framed::new(stream, RelayCodec);
    framed.send(request).await?;
    match framed.next().await {
        Some(Ok(response)) => Ok(response),
        Some(Err(e)) => Err(TransportError::IoError(e)),
        None => Err(TransportError::ConnectionFailed(
            "relay closed the connection".to_string(),
        )),
    }
}

fn unexpected(response: RelayMessage) -> TransportError {
    match response {
        RelayMessage::Error(e) => TransportError::Relay(e),
        other => TransportError::Relay(format!("unexpected response {}", other.type_name())),
    }
}

impl Transport for RelayTransport {
    fn send(&self, envelope: &Envelope) -> Result<String, TransportError> {
        match self.request(RelayMessage::Send(envelope.clone()))? {
            RelayMessage::Stored(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn receive(&self, addresses: &[String]) -> Result<Vec<Envelope>, TransportError> {
        match self.request(RelayMessage::Receive(addresses.to_vec()))? {
            RelayMessage::Envelopes(envelopes) => Ok(envelopes),
            other => Err(unexpected(other)),
        }
    }

    fn delete(&self, transport_id: &str) -> Result<(), TransportError> {
        match self.request(RelayMessage::Delete(transport_id.to_string()))? {
            RelayMessage::Deleted => Ok(()),
            RelayMessage::Error(_) => Err(TransportError::NotFound(transport_id.to_string())),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RelayServer;
    use std::sync::mpsc;

    /// Start a relay on an ephemeral port in a background thread
    fn spawn_relay() -> String {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let server = RelayServer::bind(0).await.unwrap();
                tx.send(server.local_addr().unwrap().port()).unwrap();
                let _ = server.run().await;
            });
        });
        format!("127.0.0.1:{}", rx.recv().unwrap())
    }

    #[test]
    fn test_relay_round_trip() {
        let address = spawn_relay();
        let client = RelayTransport::new(&address).unwrap();
        client.ping().unwrap();

        let envelope = Envelope::new("a@r", "bob@relay", "1A", None, 5, 0, 0, b"hello");
        let id = client.send(&envelope).unwrap();

        let other = RelayTransport::new(&address).unwrap();
        let received = other.receive(&["bob@relay".to_string()]).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload().unwrap(), b"hello".to_vec());
        assert_eq!(received[0].transport_id.as_deref(), Some(id.as_str()));

        other.delete(&id).unwrap();
        assert!(other.receive(&["bob@relay".to_string()]).unwrap().is_empty());
        assert!(matches!(other.delete(&id), Err(TransportError::NotFound(_))));
    }

    #[test]
    fn test_unreachable_relay() {
        // Bind and drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = RelayTransport::new(&format!("127.0.0.1:{}", port)).unwrap();
        assert!(matches!(client.ping(), Err(TransportError::ConnectionFailed(_))));
    }
}
