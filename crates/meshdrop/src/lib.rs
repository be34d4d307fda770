//! Meshdrop ingestion library
//!
//! Receives Wavefront OBJ files over the network, parses them incrementally
//! and hands render-ready geometry batches to a collaborator. The transport
//! lives in the `meshdrop-network` crate; this crate owns parsing, the
//! consumption loop and the tools built on both.

pub mod cli;
pub mod geometry;
pub mod ingest;
pub mod settings;

// Re-export commonly used types
pub use geometry::{
    load_obj, GeometryBatch, GeometryError, ObjModel, ObjPipeline, ObjectGeometry, ParseOptions,
    SplitMode,
};
pub use ingest::{Coordinator, CoordinatorOptions, IngestObserver, IngestSummary, StatusEvent};
pub use meshdrop_network as network;
pub use settings::{Settings, SettingsError};
