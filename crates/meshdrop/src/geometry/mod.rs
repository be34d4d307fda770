//! Wavefront OBJ ingestion: tokenizer, builder and resumable pipeline

pub mod batch;
pub mod builder;
pub mod error;
pub mod material;
pub mod pipeline;
pub mod tokenizer;

pub use batch::{Aabb, GeometryBatch, ObjectGeometry};
pub use builder::{resolve_index, ObjBuilder, VertexPool, DEFAULT_MATERIAL, DEFAULT_OBJECT};
pub use error::{Attribute, Diagnostic, Diagnostics, GeometryError};
pub use material::{Material, MaterialError, MaterialLoader, MaterialTable, MtlFileLoader};
pub use pipeline::{load_obj, ObjModel, ObjPipeline, ParseStats, Step};
pub use tokenizer::{Directive, RawIndex, Tokenizer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How faces are grouped into objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Everything goes into one object
    None,
    /// `o` and `g` start or select objects
    #[default]
    Object,
    /// Each `usemtl` starts or selects an object named after the material
    Material,
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SplitMode::None),
            "object" => Ok(SplitMode::Object),
            "material" => Ok(SplitMode::Material),
            other => Err(format!(
                "unknown split mode '{other}' (expected none, object or material)"
            )),
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMode::None => write!(f, "none"),
            SplitMode::Object => write!(f, "object"),
            SplitMode::Material => write!(f, "material"),
        }
    }
}

/// Tunables for one parse
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub split_mode: SplitMode,
    /// Upper bound on indices per batch; rounded down to whole triangles
    pub max_indices_per_batch: usize,
    /// Lines read per pipeline step before yielding
    pub lines_per_step: usize,
    /// Longer lines abort the parse
    pub max_line_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            split_mode: SplitMode::Object,
            max_indices_per_batch: u16::MAX as usize,
            lines_per_step: 10_000,
            max_line_len: 1024 * 1024,
        }
    }
}

impl ParseOptions {
    /// Effective per-batch index limit: a multiple of 3, at least 3
    pub fn batch_index_limit(&self) -> usize {
        (self.max_indices_per_batch / 3).max(1) * 3
    }
}
