//! Events published by the receiver

use crate::receiver::ReceiveError;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Terminal outcome of one received connection
///
/// Every accepted connection produces exactly one of these.
#[derive(Debug)]
pub enum TransferEvent {
    /// The full declared payload was written to `path`
    FileStored {
        name: String,
        path: PathBuf,
        bytes: u64,
        peer: SocketAddr,
    },
    /// A reserved command name arrived
    Command { name: String, peer: SocketAddr },
    /// The transfer was abandoned; no file was stored
    Failed {
        /// Declared name, if the header got that far
        name: Option<String>,
        peer: SocketAddr,
        error: ReceiveError,
    },
}

impl TransferEvent {
    pub fn peer(&self) -> SocketAddr {
        match self {
            Self::FileStored { peer, .. }
            | Self::Command { peer, .. }
            | Self::Failed { peer, .. } => *peer,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// One-line human-readable description
    pub fn status_line(&self) -> String {
        match self {
            Self::FileStored {
                name, path, bytes, ..
            } => format!(
                "Received {} ({}) saved to {}",
                name,
                format_bytes(*bytes),
                path.display()
            ),
            Self::Command { name, peer } => format!("Received command {name} from {peer}"),
            Self::Failed {
                name: Some(name),
                error,
                ..
            } => format!("Transfer of {name} interrupted: {error}"),
            Self::Failed {
                name: None, error, ..
            } => format!("Connection failed: {error}"),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.2} MB", bytes as f64 / MB)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_status_lines() {
        let stored = TransferEvent::FileStored {
            name: "cube.obj".to_string(),
            path: PathBuf::from("/data/cube.obj"),
            bytes: 80,
            peer: peer(),
        };
        assert_eq!(
            stored.status_line(),
            "Received cube.obj (80 bytes) saved to /data/cube.obj"
        );
        assert!(!stored.is_failure());

        let large = TransferEvent::FileStored {
            name: "brain.obj".to_string(),
            path: PathBuf::from("/data/brain.obj"),
            bytes: 3 * 1024 * 1024,
            peer: peer(),
        };
        assert!(large.status_line().contains("3.00 MB"));

        let failed = TransferEvent::Failed {
            name: Some("half.obj".to_string()),
            peer: peer(),
            error: ReceiveError::InvalidName("../x".to_string()),
        };
        assert!(failed.is_failure());
        assert!(failed.status_line().starts_with("Transfer of half.obj interrupted"));
        assert_eq!(failed.peer(), peer());
    }
}
