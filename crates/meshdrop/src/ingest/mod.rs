//! Consumption loop between the receiver's event queue and the geometry pipeline

mod coordinator;
mod observer;

pub use coordinator::{Coordinator, CoordinatorOptions, CoordinatorState, TickOutcome};
pub use observer::{IngestObserver, StatusEvent, StatusLevel};

use crate::geometry::{Diagnostics, GeometryError, ParseStats};
use meshdrop_network::ReceiveError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A transfer or parse failure surfaced to the collaborator
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Transfer from {peer} failed: {source}")]
    Transfer {
        name: Option<String>,
        peer: SocketAddr,
        source: ReceiveError,
    },

    #[error("Failed to ingest {path}: {source}")]
    Geometry {
        path: PathBuf,
        source: GeometryError,
    },
}

/// Result of a completed parse
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub source: PathBuf,
    pub stats: ParseStats,
    pub diagnostics: Diagnostics,
    pub elapsed: Duration,
}
