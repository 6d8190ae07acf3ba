//! Directory-based transport
//!
//! Every transport address is a directory below the mailbox root; every
//! envelope is one JSON file in it. Signers sharing a directory (a network
//! share, a synced folder) can exchange messages without any server.

use crate::transport::{Envelope, Transport, TransportError};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default mailbox root
pub const DEFAULT_MAILBOX_DIR: &str = ".mms_mailbox";

// Orders envelopes sent within the same nanosecond
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Transport over a shared directory tree
#[derive(Debug, Clone)]
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: &Path) -> Result<Self, TransportError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name for a transport address
    fn box_name(address: &str) -> String {
        address
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn resolve(&self, transport_id: &str) -> Result<PathBuf, TransportError> {
        let relative = Path::new(transport_id);
        let valid = relative.components().count() == 2
            && relative
                .components()
                .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !valid {
            return Err(TransportError::NotFound(transport_id.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl Transport for FileTransport {
    fn send(&self, envelope: &Envelope) -> Result<String, TransportError> {
        let name = Self::box_name(&envelope.destination_transport_address);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(TransportError::InvalidEnvelope(format!(
                "unusable transport address '{}'",
                envelope.destination_transport_address
            )));
        }
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir)?;

        let file_name = format!(
            "{:020}-{:06}-{}.json",
            envelope.timestamp.timestamp_nanos_opt().unwrap_or(0),
            SEQUENCE.fetch_add(1, Ordering::Relaxed) % 1_000_000,
            &envelope.hash[..envelope.hash.len().min(16)]
        );

        // Write to temporary file first
        let temp_path = dir.join(format!("{}.tmp", file_name));
        let file = fs::File::create(&temp_path)?;
        serde_json::to_writer(BufWriter::new(file), envelope)?;
        fs::rename(&temp_path, dir.join(&file_name))?;

        log::debug!("Stored envelope {}/{}", name, file_name);
        Ok(format!("{}/{}", name, file_name))
    }

    fn receive(&self, addresses: &[String]) -> Result<Vec<Envelope>, TransportError> {
        let mut envelopes = Vec::new();

        for address in addresses {
            let name = Self::box_name(address);
            let dir = self.root.join(&name);
            if !dir.is_dir() {
                continue;
            }

            let mut files: Vec<String> = fs::read_dir(&dir)?
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|f| f.ends_with(".json"))
                .collect();
            files.sort();

            for file_name in files {
                let file = fs::File::open(dir.join(&file_name))?;
                match serde_json::from_reader::<_, Envelope>(BufReader::new(file)) {
                    Ok(mut envelope) => {
                        envelope.transport_id = Some(format!("{}/{}", name, file_name));
                        envelopes.push(envelope);
                    }
                    Err(e) => log::warn!("Skipping unreadable envelope {}: {}", file_name, e),
                }
            }
        }

        Ok(envelopes)
    }

    fn delete(&self, transport_id: &str) -> Result<(), TransportError> {
        let path = self.resolve(transport_id)?;
        if !path.exists() {
            return Err(TransportError::NotFound(transport_id.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(to: &str, content: &[u8]) -> Envelope {
        Envelope::new("a@r", to, "1A", None, 5, 0, 0, content)
    }

    #[test]
    fn test_send_receive_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(temp_dir.path()).unwrap();

        let first = transport.send(&envelope("bob@relay", b"one")).unwrap();
        let second = transport.send(&envelope("bob@relay", b"two")).unwrap();
        transport.send(&envelope("carol@relay", b"three")).unwrap();

        let received = transport.receive(&["bob@relay".to_string()]).unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].payload().unwrap(), b"one".to_vec());
        assert_eq!(received[0].transport_id.as_deref(), Some(first.as_str()));

        transport.delete(&first).unwrap();
        let received = transport.receive(&["bob@relay".to_string()]).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].transport_id.as_deref(), Some(second.as_str()));
    }

    #[test]
    fn test_addresses_are_confined_to_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(temp_dir.path()).unwrap();

        let id = transport.send(&envelope("../../etc", b"x")).unwrap();
        assert!(transport.resolve(&id).unwrap().starts_with(temp_dir.path()));

        assert!(matches!(
            transport.delete("../outside.json"),
            Err(TransportError::NotFound(_))
        ));
        assert!(transport.send(&envelope("..", b"x")).is_err());
    }

    #[test]
    fn test_missing_box_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(temp_dir.path()).unwrap();
        assert!(transport.receive(&["nobody".to_string()]).unwrap().is_empty());
    }
}
