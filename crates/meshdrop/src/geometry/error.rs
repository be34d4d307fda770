//! Fatal geometry errors and recoverable parse diagnostics

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of diagnostics kept per file; later ones are only counted
pub const MAX_STORED_DIAGNOSTICS: usize = 256;

/// Errors that abort the ingestion of one file
#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Line {line} exceeds the maximum length of {max} bytes")]
    LineTooLong { line: u64, max: usize },

    #[error("Too many {attribute} entries (limit {limit})")]
    PoolOverflow { attribute: Attribute, limit: usize },
}

/// Which vertex pool an index refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Position,
    TexCoord,
    Normal,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Position => write!(f, "position"),
            Attribute::TexCoord => write!(f, "texture coordinate"),
            Attribute::Normal => write!(f, "normal"),
        }
    }
}

/// A problem the parser recovered from
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The line was skipped
    #[error("line {line}: malformed '{keyword}' directive: {reason}")]
    MalformedDirective {
        line: u64,
        keyword: String,
        reason: String,
    },

    /// The reference was dropped from its face
    #[error("line {line}: {attribute} index {index} is outside the pool of {pool_len}")]
    UnresolvableIndex {
        line: u64,
        attribute: Attribute,
        index: i64,
        pool_len: usize,
    },

    /// Default materials are used instead
    #[error("line {line}: material library '{path}' unavailable: {reason}")]
    MissingMaterialLibrary {
        line: u64,
        path: String,
        reason: String,
    },
}

impl Diagnostic {
    pub fn line(&self) -> u64 {
        match self {
            Diagnostic::MalformedDirective { line, .. }
            | Diagnostic::UnresolvableIndex { line, .. }
            | Diagnostic::MissingMaterialLibrary { line, .. } => *line,
        }
    }
}

/// Bounded collection of diagnostics for one file
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    stored: Vec<Diagnostic>,
    total: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.total += 1;
        if self.stored.len() < MAX_STORED_DIAGNOSTICS {
            tracing::debug!("{}", diagnostic);
            self.stored.push(diagnostic);
        }
    }

    /// Number of diagnostics raised, including those not stored
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number raised beyond the storage cap
    pub fn dropped(&self) -> usize {
        self.total - self.stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.stored.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.stored
    }
}
