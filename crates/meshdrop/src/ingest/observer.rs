//! Collaborator interface driven by the coordinator

use super::{IngestSummary, IngestionError};
use crate::geometry::{MaterialTable, ObjectGeometry};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// Human-readable outcome of one transfer or one parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub level: StatusLevel,
    pub message: String,
}

impl StatusEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            StatusLevel::Info => write!(f, "{}", self.message),
            StatusLevel::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Receives everything the coordinator produces, on the coordinator's thread
///
/// Rendering, UI and command handling live behind this trait; the coordinator
/// holds its observer directly rather than reaching for global state.
pub trait IngestObserver {
    /// A file was stored; called before any parsing starts
    fn on_file_ready(&mut self, path: &Path);

    /// A reserved command arrived
    fn on_command(&mut self, name: &str);

    /// One object of `source` has been built
    fn on_geometry(&mut self, source: &Path, object: ObjectGeometry, materials: &MaterialTable);

    /// `context` names the transfer or file the error belongs to
    fn on_ingestion_error(&mut self, context: &str, error: &IngestionError);

    /// Every object of `source` has been delivered
    fn on_ingested(&mut self, _source: &Path, _summary: &IngestSummary) {}

    fn on_status(&mut self, _status: &StatusEvent) {}
}
