use crate::geometry::{ParseOptions, SplitMode};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meshdrop")]
#[command(
    about = "Receive OBJ files over TCP and build geometry batches",
    long_about = None
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Directory received files are written to
    #[arg(short, long)]
    pub storage_dir: Option<PathBuf>,

    /// Settings file (defaults to meshdrop.toml in the working directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How faces are grouped into objects (none, object, material)
    #[arg(long)]
    pub split_mode: Option<SplitMode>,

    /// Maximum indices per geometry batch
    #[arg(long)]
    pub max_indices: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_STORAGE_DIR: &str = "./received";

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Apply the parse-related flags on top of `options`
    pub fn apply_to_parse(&self, options: &mut ParseOptions) {
        if let Some(split_mode) = self.split_mode {
            options.split_mode = split_mode;
        }
        if let Some(max) = self.max_indices {
            options.max_indices_per_batch = max;
        }
    }
}
