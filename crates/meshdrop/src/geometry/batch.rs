//! Built geometry handed to the renderer

use nalgebra::Point3;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// A box containing nothing; including any point makes it valid
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 3]>) -> Self {
        points.into_iter().fold(Self::empty(), |mut aabb, p| {
            aabb.include(&Point3::from(*p));
            aabb
        })
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn include(&mut self, point: &Point3<f32>) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        if other.is_empty() {
            return *self;
        }
        let mut merged = *self;
        merged.include(&other.min);
        merged.include(&other.max);
        merged
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn size(&self) -> [f32; 3] {
        let extent = self.max - self.min;
        [extent.x, extent.y, extent.z]
    }
}

/// One index-width-bounded chunk of an object's triangles for a single material
///
/// Attribute arrays are compact and local to the batch; `indices` address them
/// and never exceed the configured per-batch index count.
#[derive(Debug, Clone)]
pub struct GeometryBatch {
    pub material: String,
    /// Position of this batch among the batches of the same object and material
    pub partition: usize,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl GeometryBatch {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// All batches built for one named object
#[derive(Debug, Clone)]
pub struct ObjectGeometry {
    pub name: String,
    pub batches: Vec<GeometryBatch>,
}

impl ObjectGeometry {
    pub fn triangle_count(&self) -> usize {
        self.batches.iter().map(GeometryBatch::triangle_count).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.batches.iter().map(GeometryBatch::vertex_count).sum()
    }

    pub fn bounds(&self) -> Aabb {
        self.batches
            .iter()
            .fold(Aabb::empty(), |acc, batch| acc.merge(&batch.bounds))
    }

    /// Material names in first-use order
    pub fn materials(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for batch in &self.batches {
            if !names.contains(&batch.material.as_str()) {
                names.push(&batch.material);
            }
        }
        names
    }
}
