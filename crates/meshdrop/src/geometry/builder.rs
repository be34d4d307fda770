//! Accumulates faces per object and material, then assembles batches
//!
//! Face references are resolved to 0-based pool indices the moment the face is
//! pushed, so negative indices count back from the pool as it stood on that
//! line. Triangulation and batching happen later, one object at a time.

use super::batch::{Aabb, GeometryBatch, ObjectGeometry};
use super::error::{Attribute, Diagnostic, Diagnostics, GeometryError};
use super::tokenizer::RawIndex;
use super::SplitMode;
use nalgebra::{Point3, Vector2, Vector3};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Object that collects faces seen before any `o`/`g`
pub const DEFAULT_OBJECT: &str = "default";
/// Material assigned to faces seen before any `usemtl`
pub const DEFAULT_MATERIAL: &str = "default";

/// Pools are addressed with `u32`
const MAX_POOL_LEN: usize = u32::MAX as usize;

/// Resolve a source index against a pool of `len` entries
///
/// Positive values are 1-based; negative values count back from the end, so
/// `-1` is the last entry. Zero and anything outside the pool are unresolvable.
pub fn resolve_index(raw: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = match raw {
        0 => return None,
        r if r > 0 => r - 1,
        r => len + r,
    };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Attribute pools shared by every face of one file
#[derive(Debug, Default)]
pub struct VertexPool {
    positions: Vec<Point3<f32>>,
    normals: Vec<Vector3<f32>>,
    tex_coords: Vec<Vector2<f32>>,
}

impl VertexPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_position(&mut self, p: [f32; 3]) -> Result<(), GeometryError> {
        check_capacity(self.positions.len(), Attribute::Position)?;
        self.positions.push(Point3::from(p));
        Ok(())
    }

    pub fn push_normal(&mut self, n: [f32; 3]) -> Result<(), GeometryError> {
        check_capacity(self.normals.len(), Attribute::Normal)?;
        self.normals.push(Vector3::from(n));
        Ok(())
    }

    pub fn push_tex_coord(&mut self, uv: [f32; 2]) -> Result<(), GeometryError> {
        check_capacity(self.tex_coords.len(), Attribute::TexCoord)?;
        self.tex_coords.push(Vector2::from(uv));
        Ok(())
    }

    pub fn len(&self, attribute: Attribute) -> usize {
        match attribute {
            Attribute::Position => self.positions.len(),
            Attribute::TexCoord => self.tex_coords.len(),
            Attribute::Normal => self.normals.len(),
        }
    }

    fn resolve(&self, attribute: Attribute, raw: i64) -> Option<u32> {
        resolve_index(raw, self.len(attribute)).map(|i| i as u32)
    }
}

fn check_capacity(len: usize, attribute: Attribute) -> Result<(), GeometryError> {
    if len >= MAX_POOL_LEN {
        return Err(GeometryError::PoolOverflow {
            attribute,
            limit: MAX_POOL_LEN,
        });
    }
    Ok(())
}

/// One resolved face corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Corner {
    pub position: u32,
    pub tex_coord: Option<u32>,
    pub normal: Option<u32>,
}

/// Faces stored flat: all corners back to back plus each face's corner count
#[derive(Debug, Default)]
pub struct FaceList {
    corners: Vec<Corner>,
    sizes: Vec<u32>,
}

impl FaceList {
    fn push(&mut self, corners: &[Corner]) {
        self.corners.extend_from_slice(corners);
        self.sizes.push(corners.len() as u32);
    }

    pub fn face_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.sizes.iter().map(|&k| k as usize - 2).sum()
    }

    /// Fan triangulation rooted at each face's first corner
    pub fn triangles(&self) -> impl Iterator<Item = [Corner; 3]> + '_ {
        let mut offset = 0;
        self.sizes.iter().flat_map(move |&size| {
            let face = &self.corners[offset..offset + size as usize];
            offset += size as usize;
            (1..face.len() - 1).map(move |i| [face[0], face[i], face[i + 1]])
        })
    }
}

#[derive(Debug)]
struct MaterialGroup {
    material: String,
    faces: FaceList,
}

/// Faces of one named object, grouped by material in first-use order
#[derive(Debug)]
pub struct ObjectGroup {
    name: String,
    parts: Vec<MaterialGroup>,
}

impl ObjectGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parts: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn face_count(&self) -> usize {
        self.parts.iter().map(|p| p.faces.face_count()).sum()
    }

    fn faces_for(&mut self, material: &str) -> &mut FaceList {
        let index = match self.parts.iter().position(|p| p.material == material) {
            Some(index) => index,
            None => {
                self.parts.push(MaterialGroup {
                    material: material.to_string(),
                    faces: FaceList::default(),
                });
                self.parts.len() - 1
            }
        };
        &mut self.parts[index].faces
    }
}

/// Receives directives in file order
pub struct ObjBuilder {
    pool: VertexPool,
    objects: Vec<ObjectGroup>,
    lookup: HashMap<String, usize>,
    current_object: usize,
    current_material: String,
    split_mode: SplitMode,
    scratch: Vec<Corner>,
}

impl ObjBuilder {
    pub fn new(split_mode: SplitMode) -> Self {
        let mut builder = Self {
            pool: VertexPool::new(),
            objects: Vec::new(),
            lookup: HashMap::new(),
            current_object: 0,
            current_material: DEFAULT_MATERIAL.to_string(),
            split_mode,
            scratch: Vec::with_capacity(8),
        };
        builder.set_object(DEFAULT_OBJECT);
        builder
    }

    pub fn pool(&self) -> &VertexPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut VertexPool {
        &mut self.pool
    }

    pub fn objects(&self) -> &[ObjectGroup] {
        &self.objects
    }

    pub fn current_object(&self) -> &str {
        &self.objects[self.current_object].name
    }

    pub fn current_material(&self) -> &str {
        &self.current_material
    }

    /// Handle `o`/`g`; only switches objects when splitting by object
    pub fn select_object(&mut self, name: &str) {
        if self.split_mode == SplitMode::Object {
            self.set_object(if name.is_empty() { DEFAULT_OBJECT } else { name });
        }
    }

    /// Handle `usemtl`
    pub fn use_material(&mut self, name: &str) {
        self.current_material.clear();
        self.current_material.push_str(name);
        if self.split_mode == SplitMode::Material {
            self.set_object(name);
        }
    }

    fn set_object(&mut self, name: &str) {
        self.current_object = match self.lookup.get(name) {
            Some(&index) => index,
            None => {
                trace!("New object '{}'", name);
                self.objects.push(ObjectGroup::new(name));
                self.lookup.insert(name.to_string(), self.objects.len() - 1);
                self.objects.len() - 1
            }
        };
    }

    /// Resolve and store one face
    ///
    /// Unresolvable position references are dropped; if fewer than three
    /// corners remain the face is padded with the last valid corner. Returns
    /// `false` if nothing was stored because no corner could be resolved.
    pub fn push_face(
        &mut self,
        indices: &[RawIndex],
        line: u64,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        self.scratch.clear();

        for raw in indices {
            let Some(position) = self.resolve(Attribute::Position, raw.position, line, diagnostics)
            else {
                continue;
            };
            let tex_coord = raw
                .tex_coord
                .and_then(|i| self.resolve(Attribute::TexCoord, i, line, diagnostics));
            let normal = raw
                .normal
                .and_then(|i| self.resolve(Attribute::Normal, i, line, diagnostics));

            self.scratch.push(Corner {
                position,
                tex_coord,
                normal,
            });
        }

        let Some(&last) = self.scratch.last() else {
            return false;
        };
        while self.scratch.len() < 3 {
            self.scratch.push(last);
        }

        let object = &mut self.objects[self.current_object];
        object
            .faces_for(&self.current_material)
            .push(&self.scratch);
        true
    }

    fn resolve(
        &self,
        attribute: Attribute,
        raw: i64,
        line: u64,
        diagnostics: &mut Diagnostics,
    ) -> Option<u32> {
        let resolved = self.pool.resolve(attribute, raw);
        if resolved.is_none() {
            diagnostics.push(Diagnostic::UnresolvableIndex {
                line,
                attribute,
                index: raw,
                pool_len: self.pool.len(attribute),
            });
        }
        resolved
    }

    /// Stop accepting directives; objects without faces are discarded
    pub fn finish(self, max_indices: usize) -> MeshAssembler {
        let objects: VecDeque<ObjectGroup> = self
            .objects
            .into_iter()
            .filter(|object| object.face_count() > 0)
            .collect();
        debug!(
            "Parsed {} positions, {} normals, {} texture coordinates into {} objects",
            self.pool.positions.len(),
            self.pool.normals.len(),
            self.pool.tex_coords.len(),
            objects.len()
        );
        MeshAssembler::new(self.pool, objects, max_indices)
    }
}

/// Turns accumulated objects into batches, one object per call
pub struct MeshAssembler {
    pool: VertexPool,
    objects: VecDeque<ObjectGroup>,
    triangles_per_batch: usize,
}

impl MeshAssembler {
    /// `max_indices` is rounded down to whole triangles, minimum one
    pub fn new(pool: VertexPool, objects: VecDeque<ObjectGroup>, max_indices: usize) -> Self {
        Self {
            pool,
            objects,
            triangles_per_batch: (max_indices / 3).max(1),
        }
    }

    /// Objects not yet assembled
    pub fn remaining(&self) -> usize {
        self.objects.len()
    }

    pub fn next_object(&mut self) -> Option<ObjectGeometry> {
        let object = self.objects.pop_front()?;
        let mut batches = Vec::new();

        for part in &object.parts {
            let mut partition = 0;
            let mut current = BatchBuilder::new(&self.pool);

            for triangle in part.faces.triangles() {
                current.push_triangle(triangle);
                if current.triangle_count() == self.triangles_per_batch {
                    let full = std::mem::replace(&mut current, BatchBuilder::new(&self.pool));
                    batches.push(full.finish(&part.material, partition));
                    partition += 1;
                }
            }
            if current.triangle_count() > 0 {
                batches.push(current.finish(&part.material, partition));
            }
        }

        let geometry = ObjectGeometry {
            name: object.name,
            batches,
        };
        debug!(
            "Built object '{}': {} triangles in {} batches",
            geometry.name,
            geometry.triangle_count(),
            geometry.batches.len()
        );
        Some(geometry)
    }
}

/// Re-indexes one batch's corners against its own compact vertex list
struct BatchBuilder<'p> {
    pool: &'p VertexPool,
    lookup: HashMap<Corner, u32>,
    corners: Vec<Corner>,
    indices: Vec<u32>,
}

impl<'p> BatchBuilder<'p> {
    fn new(pool: &'p VertexPool) -> Self {
        Self {
            pool,
            lookup: HashMap::new(),
            corners: Vec::new(),
            indices: Vec::new(),
        }
    }

    fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn push_triangle(&mut self, triangle: [Corner; 3]) {
        for corner in triangle {
            let next = self.corners.len() as u32;
            let index = *self.lookup.entry(corner).or_insert_with(|| {
                self.corners.push(corner);
                next
            });
            self.indices.push(index);
        }
    }

    fn finish(self, material: &str, partition: usize) -> GeometryBatch {
        let pool = self.pool;

        let positions: Vec<[f32; 3]> = self
            .corners
            .iter()
            .map(|c| pool.positions[c.position as usize].into())
            .collect();

        let tex_coords: Vec<[f32; 2]> = self
            .corners
            .iter()
            .map(|c| match c.tex_coord {
                Some(i) => pool.tex_coords[i as usize].into(),
                None => [0.0, 0.0],
            })
            .collect();

        // Corners without a source normal get the area-weighted sum of the
        // normals of the triangles that use them
        let mut smooth = vec![Vector3::zeros(); self.corners.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Point3::from(positions[i as usize]));
            let face_normal = (b - a).cross(&(c - a));
            for &i in tri {
                smooth[i as usize] += face_normal;
            }
        }
        let normals: Vec<[f32; 3]> = self
            .corners
            .iter()
            .zip(smooth)
            .map(|(c, sum)| {
                let n = match c.normal {
                    Some(i) => pool.normals[i as usize],
                    None => sum.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::y),
                };
                n.into()
            })
            .collect();

        let bounds = Aabb::from_points(&positions);

        GeometryBatch {
            material: material.to_string(),
            partition,
            positions,
            normals,
            tex_coords,
            indices: self.indices,
            bounds,
        }
    }
}
