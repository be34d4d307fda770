//! Resumable OBJ parse
//!
//! [`ObjPipeline::step`] does a bounded amount of work and returns, so a
//! single-threaded host can interleave parsing with its other duties: each
//! step reads at most `lines_per_step` lines, and once the input is exhausted
//! each step assembles one object.

use super::batch::ObjectGeometry;
use super::builder::{MeshAssembler, ObjBuilder};
use super::error::{Attribute, Diagnostic, Diagnostics, GeometryError};
use super::material::{MaterialError, MaterialLoader, MaterialTable, MtlFileLoader};
use super::tokenizer::{Directive, Tokenizer};
use super::ParseOptions;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Lines between progress log messages
const PROGRESS_INTERVAL: u64 = 100_000;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of one [`ObjPipeline::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

/// Counters for one parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: u64,
    pub bytes: u64,
    pub positions: usize,
    pub normals: usize,
    pub tex_coords: usize,
    pub faces: u64,
    pub objects: usize,
    pub triangles: usize,
    pub batches: usize,
}

/// Everything produced by a complete parse
#[derive(Debug)]
pub struct ObjModel {
    pub objects: Vec<ObjectGeometry>,
    pub materials: MaterialTable,
    pub diagnostics: Diagnostics,
    pub stats: ParseStats,
}

enum Stage<R> {
    Reading {
        tokenizer: Tokenizer<R>,
        builder: ObjBuilder,
    },
    Assembling(MeshAssembler),
    Finished,
}

pub struct ObjPipeline<R> {
    stage: Stage<R>,
    options: ParseOptions,
    base_dir: Option<PathBuf>,
    material_loader: Arc<dyn MaterialLoader>,
    materials: MaterialTable,
    materials_loaded: bool,
    diagnostics: Diagnostics,
    ready: VecDeque<ObjectGeometry>,
    stats: ParseStats,
}

impl ObjPipeline<BufReader<File>> {
    /// Open a file; `mtllib` paths are looked up next to it first
    pub fn open(path: &Path, options: ParseOptions) -> Result<Self, GeometryError> {
        let file = File::open(path).map_err(|source| GeometryError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loading {}", path.display());

        let mut pipeline = Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file), options);
        pipeline.base_dir = path.parent().map(Path::to_path_buf);
        Ok(pipeline)
    }
}

impl<R: BufRead> ObjPipeline<R> {
    pub fn new(reader: R, options: ParseOptions) -> Self {
        Self {
            stage: Stage::Reading {
                tokenizer: Tokenizer::new(reader, options.max_line_len),
                builder: ObjBuilder::new(options.split_mode),
            },
            options,
            base_dir: None,
            material_loader: Arc::new(MtlFileLoader),
            materials: MaterialTable::new(),
            materials_loaded: false,
            diagnostics: Diagnostics::new(),
            ready: VecDeque::new(),
            stats: ParseStats::default(),
        }
    }

    /// Directory searched first for `mtllib` paths
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_material_loader(mut self, loader: Arc<dyn MaterialLoader>) -> Self {
        self.material_loader = loader;
        self
    }

    /// Do one bounded unit of work
    ///
    /// After an error the pipeline is finished and further calls return
    /// [`Step::Done`].
    pub fn step(&mut self) -> Result<Step, GeometryError> {
        match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Reading {
                mut tokenizer,
                mut builder,
            } => {
                let exhausted = self.read_lines(&mut tokenizer, &mut builder)?;
                if exhausted {
                    debug!(
                        "Read {} lines ({} bytes)",
                        self.stats.lines, self.stats.bytes
                    );
                    let limit = self.options.batch_index_limit();
                    self.stage = Stage::Assembling(builder.finish(limit));
                } else {
                    self.stage = Stage::Reading { tokenizer, builder };
                }
                Ok(Step::Continue)
            }
            Stage::Assembling(mut assembler) => {
                if let Some(object) = assembler.next_object() {
                    self.stats.objects += 1;
                    self.stats.triangles += object.triangle_count();
                    self.stats.batches += object.batches.len();
                    self.ready.push_back(object);
                }
                if assembler.remaining() > 0 {
                    self.stage = Stage::Assembling(assembler);
                    return Ok(Step::Continue);
                }
                info!(
                    "Parsed {} lines: {} objects, {} triangles, {} diagnostics",
                    self.stats.lines,
                    self.stats.objects,
                    self.stats.triangles,
                    self.diagnostics.total()
                );
                Ok(Step::Done)
            }
            Stage::Finished => Ok(Step::Done),
        }
    }

    /// Take the next object assembled by an earlier step
    pub fn next_object(&mut self) -> Option<ObjectGeometry> {
        self.ready.pop_front()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Finished)
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Materials from the first `mtllib` that loaded; empty until then
    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    /// Step until done, collecting every object
    pub fn run(mut self) -> Result<ObjModel, GeometryError> {
        let mut objects = Vec::new();
        loop {
            let step = self.step()?;
            objects.extend(self.ready.drain(..));
            if step == Step::Done {
                break;
            }
        }
        Ok(ObjModel {
            objects,
            materials: self.materials,
            diagnostics: self.diagnostics,
            stats: self.stats,
        })
    }

    /// Returns `true` once the input is exhausted
    fn read_lines(
        &mut self,
        tokenizer: &mut Tokenizer<R>,
        builder: &mut ObjBuilder,
    ) -> Result<bool, GeometryError> {
        let mut exhausted = false;

        for _ in 0..self.options.lines_per_step.max(1) {
            let Some(line) = tokenizer.next_line()? else {
                exhausted = true;
                break;
            };
            let number = line.number;

            match line.directive {
                Ok(Directive::Position(p)) => builder.pool_mut().push_position(p)?,
                Ok(Directive::Normal(n)) => builder.pool_mut().push_normal(n)?,
                Ok(Directive::TexCoord(uv)) => builder.pool_mut().push_tex_coord(uv)?,
                Ok(Directive::MaterialLibrary(path)) => {
                    if !self.materials_loaded {
                        self.load_materials(path, number);
                    }
                }
                Ok(Directive::UseMaterial(name)) => builder.use_material(name),
                Ok(Directive::Object(name)) => builder.select_object(name),
                Ok(Directive::Face(indices)) => {
                    if builder.push_face(indices, number, &mut self.diagnostics) {
                        self.stats.faces += 1;
                    }
                }
                Ok(Directive::Ignored) => {}
                Err(malformed) => self.diagnostics.push(Diagnostic::MalformedDirective {
                    line: number,
                    keyword: malformed.keyword,
                    reason: malformed.reason,
                }),
            }

            if number % PROGRESS_INTERVAL == 0 {
                info!(
                    "...parsed {} lines, positions: {}, normals: {}",
                    number,
                    builder.pool().len(Attribute::Position),
                    builder.pool().len(Attribute::Normal)
                );
            }
        }

        let pool = builder.pool();
        self.stats.lines = tokenizer.line_number();
        self.stats.bytes = tokenizer.bytes_read();
        self.stats.positions = pool.len(Attribute::Position);
        self.stats.normals = pool.len(Attribute::Normal);
        self.stats.tex_coords = pool.len(Attribute::TexCoord);
        Ok(exhausted)
    }

    /// Try the path relative to the source directory, then as given
    fn load_materials(&mut self, path: &str, line: u64) {
        let mut candidates = Vec::with_capacity(2);
        if let Some(dir) = &self.base_dir {
            candidates.push(dir.join(path));
        }
        candidates.push(PathBuf::from(path));

        let mut reason = "not found".to_string();
        for candidate in &candidates {
            match self.material_loader.load(candidate) {
                Ok(table) => {
                    info!(
                        "Loaded {} materials from {}",
                        table.len(),
                        candidate.display()
                    );
                    self.materials = table;
                    self.materials_loaded = true;
                    return;
                }
                Err(MaterialError::NotFound(_)) => continue,
                Err(e) => {
                    reason = e.to_string();
                    break;
                }
            }
        }

        self.diagnostics.push(Diagnostic::MissingMaterialLibrary {
            line,
            path: path.to_string(),
            reason,
        });
    }
}

/// Parse a whole file in one call
pub fn load_obj(path: &Path, options: ParseOptions) -> Result<ObjModel, GeometryError> {
    ObjPipeline::open(path, options)?.run()
}
