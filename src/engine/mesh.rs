//! Triangle mesh storage used by the built-in engine.

use nalgebra::{Matrix3, Point3, Vector3};

/// An indexed triangle mesh.
///
/// Faces are `[v0, v1, v2]` indices into the vertex array with
/// counter-clockwise winding. Vertex normals are optional; they are filled in
/// by the `reorient_faces` filter and left empty otherwise.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    pub positions: Vec<Point3<f64>>,
    pub normals: Vec<Vector3<f64>>,
    pub faces: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertex_count),
            normals: Vec::new(),
            faces: Vec::with_capacity(face_count),
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.faces.is_empty()
    }

    /// Axis-aligned bounding box, or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.positions.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.positions[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Some((min, max))
    }

    /// Unnormalized normal of one face (length = 2 × area).
    pub fn face_normal_unnormalized(&self, face: [u32; 3]) -> Vector3<f64> {
        let p0 = self.positions[face[0] as usize];
        let p1 = self.positions[face[1] as usize];
        let p2 = self.positions[face[2] as usize];
        (p1 - p0).cross(&(p2 - p0))
    }

    /// Apply a rigid transform `p ↦ R·p + t` to every vertex.
    ///
    /// Normals become stale and are cleared.
    pub fn apply_rigid(&mut self, rotation: &Matrix3<f64>, translation: &Vector3<f64>) {
        for p in &mut self.positions {
            *p = Point3::from(rotation * p.coords + translation);
        }
        self.normals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> TriMesh {
        let mut mesh = TriMesh::new();
        mesh.positions.push(Point3::new(0.0, 0.0, 0.0));
        mesh.positions.push(Point3::new(1.0, 0.0, 0.0));
        mesh.positions.push(Point3::new(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        mesh
    }

    #[test]
    fn bounds_span_all_vertices() {
        let mut mesh = triangle();
        mesh.positions.push(Point3::new(-2.0, 5.0, 1.0));
        let (min, max) = mesh.bounds().expect("non-empty mesh");
        assert_eq!(min, Point3::new(-2.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(1.0, 5.0, 1.0));
    }

    #[test]
    fn empty_mesh_has_no_bounds() {
        assert!(TriMesh::new().bounds().is_none());
    }

    #[test]
    fn face_normal_follows_ccw_winding() {
        let mesh = triangle();
        let n = mesh.face_normal_unnormalized([0, 1, 2]);
        assert!(n.z > 0.0);
        assert_eq!(n.x, 0.0);
        assert_eq!(n.y, 0.0);
    }

    #[test]
    fn rigid_transform_moves_vertices() {
        let mut mesh = triangle();
        mesh.apply_rigid(&Matrix3::identity(), &Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(mesh.positions[0], Point3::new(1.0, 2.0, 3.0));
    }
}
