//! TCP relay server and frame codec
//!
//! The relay is a store-and-forward mailbox: clients push envelopes for a
//! transport address and later fetch and delete what is addressed to them.

use crate::transport::message::{RelayMessage, MAGIC};
use crate::transport::Mailbox;
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Frames larger than this are rejected
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Message codec for length-prefixed framing
pub struct RelayCodec;

impl Encoder<RelayMessage> for RelayCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RelayMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        // Magic (4) + Length (4) + Data
        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for RelayCodec {
    type Item = RelayMessage;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least header
        if src.len() < 8 {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid magic bytes",
            ));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame of {} bytes exceeds limit", len),
            ));
        }

        // Check if we have full message
        if src.len() < 8 + len {
            src.reserve(8 + len - src.len());
            return Ok(None);
        }

        src.advance(8);
        let data = src.split_to(len);

        let msg = RelayMessage::from_bytes(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Some(msg))
    }
}

/// TCP relay accepting client connections
pub struct RelayServer {
    listener: TcpListener,
    mailbox: Arc<Mutex<Mailbox>>,
}

impl RelayServer {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Relay listening on {}", addr);

        Ok(Self {
            listener,
            mailbox: Arc::new(Mutex::new(Mailbox::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<(), std::io::Error> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("Client {} connected", addr);
            let mailbox = Arc::clone(&self.mailbox);
            tokio::spawn(async move {
                handle_connection(stream, addr, mailbox).await;
            });
        }
    }
}

/// Answer requests of one client until it disconnects
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, mailbox: Arc<Mutex<Mailbox>>) {
    let mut framed = Framed::new(stream, RelayCodec);

    loop {
        match framed.next().await {
            Some(Ok(request)) => {
                log::debug!("{} from {}", request.type_name(), addr);
                let response = handle_request(request, &mailbox).await;
                if let Err(e) = framed.send(response).await {
                    log::warn!("Error writing to {}: {}", addr, e);
                    break;
                }
            }
            Some(Err(e)) => {
                log::warn!("Error reading from {}: {}", addr, e);
                break;
            }
            None => {
                log::debug!("Client {} disconnected", addr);
                break;
            }
        }
    }
}

async fn handle_request(request: RelayMessage, mailbox: &Mutex<Mailbox>) -> RelayMessage {
    match request {
        RelayMessage::Send(envelope) => {
            let destination = envelope.destination_transport_address.clone();
            let id = mailbox.lock().await.put(envelope);
            log::info!("Stored envelope {} for {}", id, destination);
            RelayMessage::Stored(id)
        }
        RelayMessage::Receive(addresses) => {
            RelayMessage::Envelopes(mailbox.lock().await.fetch(&addresses))
        }
        RelayMessage::Delete(id) => {
            if mailbox.lock().await.remove(&id) {
                RelayMessage::Deleted
            } else {
                RelayMessage::Error(format!("unknown transport id {}", id))
            }
        }
        RelayMessage::Ping(nonce) => RelayMessage::Pong(nonce),
        other => RelayMessage::Error(format!("unexpected request {}", other.type_name())),
    }
}
