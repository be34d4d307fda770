//! Material descriptions loaded from `.mtl` side files

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum MaterialError {
    #[error("Material library not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read material library {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Surface description for one `newmtl` block
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub ambient: [f32; 3],
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub shininess: f32,
    /// 1.0 is fully opaque
    pub opacity: f32,
    pub illumination: Option<u32>,
    pub diffuse_map: Option<PathBuf>,
}

impl Material {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Default for Material {
    /// Plain white, used wherever a named material is missing
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            ambient: [0.0, 0.0, 0.0],
            diffuse: [1.0, 1.0, 1.0],
            specular: [0.0, 0.0, 0.0],
            shininess: 0.0,
            opacity: 1.0,
            illumination: None,
            diffuse_map: None,
        }
    }
}

/// Materials by name, falling back to a default for unknown names
#[derive(Debug, Clone, Default)]
pub struct MaterialTable {
    materials: HashMap<String, Material>,
    fallback: Material,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) {
        self.materials.insert(material.name.clone(), material);
    }

    /// Never fails; unknown names get the default material
    pub fn get(&self, name: &str) -> &Material {
        self.materials.get(name).unwrap_or(&self.fallback)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.materials.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.materials.keys().map(String::as_str)
    }
}

/// Loads a material table from a side-file path
pub trait MaterialLoader: Send + Sync {
    /// Return [`MaterialError::NotFound`] when `path` does not exist, so the
    /// caller can try the next candidate location
    fn load(&self, path: &Path) -> Result<MaterialTable, MaterialError>;
}

/// Reads `.mtl` files from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct MtlFileLoader;

impl MaterialLoader for MtlFileLoader {
    fn load(&self, path: &Path) -> Result<MaterialTable, MaterialError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MaterialError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(MaterialError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let table = parse_mtl(BufReader::new(file), base_dir).map_err(|source| {
            MaterialError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!("Loaded {} materials from {}", table.len(), path.display());
        Ok(table)
    }
}

/// Parse `.mtl` text; texture paths are resolved against `base_dir`
///
/// Unknown statements and unparsable values are skipped.
pub fn parse_mtl<R: BufRead>(reader: R, base_dir: &Path) -> io::Result<MaterialTable> {
    let mut table = MaterialTable::new();
    let mut current: Option<Material> = None;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        let mut tokens = line.split_ascii_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        let rest = line[keyword.len()..].trim();

        if keyword == "newmtl" {
            if let Some(done) = current.take() {
                table.insert(done);
            }
            current = Some(Material::named(rest));
            continue;
        }

        let Some(material) = current.as_mut() else {
            continue;
        };
        let parsed = match keyword {
            "Ka" => parse_color(tokens).map(|c| material.ambient = c),
            "Kd" => parse_color(tokens).map(|c| material.diffuse = c),
            "Ks" => parse_color(tokens).map(|c| material.specular = c),
            "Ns" => rest.parse::<f32>().ok().map(|v| material.shininess = v),
            "d" => rest.parse::<f32>().ok().map(|v| material.opacity = v),
            "Tr" => rest.parse::<f32>().ok().map(|v| material.opacity = 1.0 - v),
            "illum" => rest.parse::<u32>().ok().map(|v| material.illumination = Some(v)),
            "map_Kd" => {
                // Options such as `-s 1 1 1` precede the file name
                rest.split_ascii_whitespace()
                    .last()
                    .map(|file| material.diffuse_map = Some(base_dir.join(file)))
            }
            _ => Some(()),
        };
        if parsed.is_none() {
            warn!("Skipping unparsable material statement on line {}: {}", number + 1, line);
        }
    }

    if let Some(done) = current {
        table.insert(done);
    }
    Ok(table)
}

fn parse_color<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<[f32; 3]> {
    let r: f32 = tokens.next()?.parse().ok()?;
    // A single value means grey
    let g: f32 = match tokens.next() {
        Some(t) => t.parse().ok()?,
        None => return Some([r, r, r]),
    };
    let b: f32 = tokens.next()?.parse().ok()?;
    Some([r, g, b])
}
