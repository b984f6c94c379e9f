//! Built-in mesh-processing backend.
//!
//! Implements the filter catalog the control layer relies on: duplicate
//! removal, hole filling, winding reorientation, small-component removal,
//! simplification, and rigid registration (ICP and point-pair based). The
//! algorithms favour clarity over throughput; this backend targets the modest
//! scan sizes a tool-calling assistant hands over, not bulk geometry work.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use nalgebra::{Matrix3, Point3, Vector3};
use serde_json::json;
use tracing::{debug, info};

use super::{io, EngineError, FilterArgs, FilterOutput, MeshEngine, MeshHandle, MeshStats, TriMesh};

/// ICP stops early once the RMS error change between iterations drops below
/// this value, unless the caller overrides `tolerance`.
const DEFAULT_ICP_TOLERANCE: f64 = 1e-6;

/// Source point budget for ICP correspondence search.
const ICP_SAMPLE_BUDGET: usize = 500;

/// The default engine backend.
#[derive(Debug, Default)]
pub struct NativeEngine {
    meshes: Vec<TriMesh>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn mesh(&self, handle: MeshHandle) -> Result<&TriMesh, EngineError> {
        self.meshes
            .get(handle.0 as usize)
            .ok_or(EngineError::InvalidHandle(handle))
    }

    fn mesh_mut(&mut self, handle: MeshHandle) -> Result<&mut TriMesh, EngineError> {
        self.meshes
            .get_mut(handle.0 as usize)
            .ok_or(EngineError::InvalidHandle(handle))
    }
}

impl MeshEngine for NativeEngine {
    fn import_mesh(&mut self, path: &Path) -> Result<MeshHandle, EngineError> {
        let mesh = io::load_mesh(path)?;
        let handle = MeshHandle(self.meshes.len() as u32);
        self.meshes.push(mesh);
        Ok(handle)
    }

    fn export_mesh(&mut self, handle: MeshHandle, path: &Path) -> Result<(), EngineError> {
        let mesh = self.mesh(handle)?;
        io::save_mesh(mesh, path)
    }

    fn stats(&self, handle: MeshHandle) -> Result<MeshStats, EngineError> {
        let mesh = self.mesh(handle)?;
        let (min, max) = mesh
            .bounds()
            .unwrap_or((Point3::origin(), Point3::origin()));
        Ok(MeshStats {
            vertex_count: mesh.vertex_count() as u64,
            face_count: mesh.face_count() as u64,
            bbox_min: [min.x, min.y, min.z],
            bbox_max: [max.x, max.y, max.z],
        })
    }

    fn apply_filter(
        &mut self,
        handle: MeshHandle,
        name: &str,
        args: &FilterArgs,
    ) -> Result<FilterOutput, EngineError> {
        debug!("filter '{}' on mesh {:?}", name, handle);
        match name {
            "remove_duplicate_faces" => {
                let removed = remove_duplicate_faces(self.mesh_mut(handle)?);
                Ok(counters(json!({ "removed_faces": removed })))
            }
            "remove_duplicate_vertices" => {
                let removed = remove_duplicate_vertices(self.mesh_mut(handle)?);
                Ok(counters(json!({ "removed_vertices": removed })))
            }
            "close_holes" => {
                let max_hole_size = args.int_or("max_hole_size", 30)?;
                if max_hole_size < 3 {
                    return Err(EngineError::InvalidParameter(
                        "max_hole_size must be at least 3 boundary edges".to_string(),
                    ));
                }
                let (closed, added) = close_holes(self.mesh_mut(handle)?, max_hole_size as usize);
                Ok(counters(json!({ "closed_holes": closed, "added_faces": added })))
            }
            "reorient_faces" => {
                let flipped = reorient_faces(self.mesh_mut(handle)?);
                Ok(counters(json!({ "flipped_faces": flipped })))
            }
            "remove_small_components" => {
                let min_size = args.int_or("min_component_size", 25)?;
                let (components, faces) =
                    remove_small_components(self.mesh_mut(handle)?, min_size.max(0) as usize);
                Ok(counters(json!({
                    "removed_components": components,
                    "removed_faces": faces,
                })))
            }
            "simplify" => {
                let target = args.int_or("target_face_count", 0)?;
                if target <= 0 {
                    return Err(EngineError::InvalidParameter(
                        "target_face_count must be positive".to_string(),
                    ));
                }
                let collapsed = simplify(self.mesh_mut(handle)?, target as usize);
                Ok(counters(json!({ "collapsed_edges": collapsed })))
            }
            "icp_align" => {
                let reference = args.mesh("reference")?;
                let max_iterations = args.int_or("max_iterations", 75)?;
                if max_iterations < 1 {
                    return Err(EngineError::InvalidParameter(
                        "max_iterations must be at least 1".to_string(),
                    ));
                }
                let tolerance = args.float_or("tolerance", DEFAULT_ICP_TOLERANCE)?;
                let target_points = self.mesh(reference)?.positions.clone();
                let source = self.mesh_mut(handle)?;
                let outcome = icp_align(source, &target_points, max_iterations as u32, tolerance)?;
                Ok(counters(json!({
                    "iterations": outcome.iterations,
                    "rms_error": outcome.rms_error,
                    "converged": outcome.converged,
                })))
            }
            "align_to_points" => {
                let source_points = args.points("source_points")?;
                let target_points = args.points("target_points")?;
                if source_points.len() != target_points.len() {
                    return Err(EngineError::InvalidParameter(
                        "source and target point lists must have equal length".to_string(),
                    ));
                }
                let src: Vec<Point3<f64>> =
                    source_points.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect();
                let dst: Vec<Point3<f64>> =
                    target_points.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect();
                let (rotation, translation) = rigid_from_correspondences(&src, &dst)?;
                let mesh = self.mesh_mut(handle)?;
                mesh.apply_rigid(&rotation, &translation);

                let rms = pair_rms(&src, &dst, &rotation, &translation);
                Ok(counters(json!({
                    "pairs_used": src.len(),
                    "rms_error": rms,
                })))
            }
            other => Err(EngineError::UnknownFilter(other.to_string())),
        }
    }
}

fn counters(value: serde_json::Value) -> FilterOutput {
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("filter counters are always objects"),
    }
}

// ---------------------------------------------------------------------------
// Cleanup filters
// ---------------------------------------------------------------------------

/// Remove faces that reference the same vertex set as an earlier face,
/// regardless of winding or starting vertex.
fn remove_duplicate_faces(mesh: &mut TriMesh) -> usize {
    fn normalize(face: [u32; 3]) -> [u32; 3] {
        let mut min_idx = 0;
        for i in 1..3 {
            if face[i] < face[min_idx] {
                min_idx = i;
            }
        }
        [face[min_idx], face[(min_idx + 1) % 3], face[(min_idx + 2) % 3]]
    }

    let original = mesh.faces.len();
    let mut seen: HashSet<[u32; 3]> = HashSet::new();

    mesh.faces.retain(|&face| {
        let fwd = normalize(face);
        let rev = normalize([face[0], face[2], face[1]]);
        if seen.contains(&fwd) || seen.contains(&rev) {
            false
        } else {
            seen.insert(fwd);
            true
        }
    });

    let removed = original - mesh.faces.len();
    if removed > 0 {
        info!("removed {} duplicate faces", removed);
    }
    removed
}

/// Merge vertices at identical positions, then drop faces made degenerate by
/// the merge and vertices no face references. Returns total vertices removed.
fn remove_duplicate_vertices(mesh: &mut TriMesh) -> usize {
    let original = mesh.positions.len();
    if original == 0 {
        return 0;
    }

    let mut first_at: HashMap<[u64; 3], u32> = HashMap::new();
    let mut remap: Vec<u32> = Vec::with_capacity(original);

    for (idx, p) in mesh.positions.iter().enumerate() {
        let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
        let canonical = *first_at.entry(key).or_insert(idx as u32);
        remap.push(canonical);
    }

    for face in &mut mesh.faces {
        for i in 0..3 {
            face[i] = remap[face[i] as usize];
        }
    }
    mesh.faces
        .retain(|&[i0, i1, i2]| i0 != i1 && i1 != i2 && i0 != i2);

    remove_unreferenced_vertices(mesh);

    let removed = original - mesh.positions.len();
    if removed > 0 {
        info!("removed {} duplicate/unreferenced vertices", removed);
    }
    removed
}

/// Drop vertices no face references and compact the vertex array.
fn remove_unreferenced_vertices(mesh: &mut TriMesh) -> usize {
    let original = mesh.positions.len();

    let mut referenced = vec![false; original];
    for face in &mesh.faces {
        for &i in face {
            referenced[i as usize] = true;
        }
    }

    let mut remap = vec![u32::MAX; original];
    let mut new_positions = Vec::new();
    for (old_idx, keep) in referenced.iter().enumerate() {
        if *keep {
            remap[old_idx] = new_positions.len() as u32;
            new_positions.push(mesh.positions[old_idx]);
        }
    }

    if new_positions.len() == original {
        return 0;
    }

    for face in &mut mesh.faces {
        for i in 0..3 {
            face[i] = remap[face[i] as usize];
        }
    }
    mesh.positions = new_positions;
    mesh.normals.clear();

    original - mesh.positions.len()
}

// ---------------------------------------------------------------------------
// Hole filling
// ---------------------------------------------------------------------------

/// Fill boundary loops of at most `max_hole_size` edges by fan triangulation.
/// Returns (holes closed, faces added). Larger holes are left open.
fn close_holes(mesh: &mut TriMesh, max_hole_size: usize) -> (usize, usize) {
    let loops = boundary_loops(&mesh.faces);
    let mut closed = 0;
    let mut added = 0;

    for hole in &loops {
        if hole.len() > max_hole_size {
            debug!("skipping hole with {} edges (limit {})", hole.len(), max_hole_size);
            continue;
        }
        for i in 1..hole.len() - 1 {
            mesh.faces.push([hole[0], hole[i + 1], hole[i]]);
            added += 1;
        }
        closed += 1;
    }

    if closed > 0 {
        info!("closed {} holes with {} faces", closed, added);
    }
    (closed, added)
}

/// Trace boundary edges (edges with exactly one adjacent face) into closed
/// loops of vertex indices.
fn boundary_loops(faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut edge_count: HashMap<(u32, u32), u32> = HashMap::new();
    for face in faces {
        for (a, b) in face_edges(face) {
            let key = undirected(a, b);
            *edge_count.entry(key).or_insert(0) += 1;
        }
    }

    let boundary: Vec<(u32, u32)> = edge_count
        .iter()
        .filter(|(_, &count)| count == 1)
        .map(|(&edge, _)| edge)
        .collect();
    if boundary.is_empty() {
        return Vec::new();
    }

    let mut neighbors: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(a, b) in &boundary {
        neighbors.entry(a).or_default().push(b);
        neighbors.entry(b).or_default().push(a);
    }

    let mut visited: HashSet<u32> = HashSet::new();
    let mut loops = Vec::new();

    for &(start, _) in &boundary {
        if visited.contains(&start) {
            continue;
        }

        let mut loop_vertices = Vec::new();
        let mut current = start;
        let mut prev: Option<u32> = None;

        loop {
            visited.insert(current);
            loop_vertices.push(current);

            let candidates = neighbors.get(&current).map(Vec::as_slice).unwrap_or(&[]);
            let next = candidates
                .iter()
                .find(|&&n| Some(n) != prev && !visited.contains(&n))
                .or_else(|| {
                    candidates
                        .iter()
                        .find(|&&n| n == start && loop_vertices.len() > 2)
                });

            match next {
                Some(&n) if n == start => break,
                Some(&n) => {
                    prev = Some(current);
                    current = n;
                }
                // Open chain, not a hole we can fill
                None => {
                    loop_vertices.clear();
                    break;
                }
            }
        }

        if loop_vertices.len() >= 3 {
            loops.push(loop_vertices);
        }
    }

    loops
}

// ---------------------------------------------------------------------------
// Normals
// ---------------------------------------------------------------------------

/// Make face windings coherent across each connected component, then compute
/// area-weighted vertex normals. Returns the number of faces whose final
/// winding differs from their input winding.
fn reorient_faces(mesh: &mut TriMesh) -> usize {
    // Map undirected edges to the faces sharing them
    let mut edge_faces: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (fi, face) in mesh.faces.iter().enumerate() {
        for (a, b) in face_edges(face) {
            edge_faces.entry(undirected(a, b)).or_default().push(fi);
        }
    }

    let mut visited = vec![false; mesh.faces.len()];
    let mut flipped = vec![false; mesh.faces.len()];

    for seed in 0..mesh.faces.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut component = vec![seed];
        let mut queue = vec![seed];

        while let Some(fi) = queue.pop() {
            let face = mesh.faces[fi];
            for (a, b) in face_edges(&face) {
                let Some(shared) = edge_faces.get(&undirected(a, b)) else {
                    continue;
                };
                // Only propagate across manifold edges
                if shared.len() != 2 {
                    continue;
                }
                for &ni in shared {
                    if ni == fi || visited[ni] {
                        continue;
                    }
                    // Consistent neighbours traverse a shared edge in opposite
                    // directions; same direction means the neighbour is flipped.
                    if has_directed_edge(&mesh.faces[ni], a, b) {
                        mesh.faces[ni].swap(1, 2);
                        flipped[ni] = true;
                    }
                    visited[ni] = true;
                    component.push(ni);
                    queue.push(ni);
                }
            }
        }

        // The seed's winding is arbitrary; the majority of the component
        // decides which orientation counts as correct.
        let flips = component.iter().filter(|&&fi| flipped[fi]).count();
        if flips * 2 > component.len() {
            for &fi in &component {
                mesh.faces[fi].swap(1, 2);
                flipped[fi] = !flipped[fi];
            }
        }
    }

    let flip_count = flipped.iter().filter(|&&f| f).count();
    compute_vertex_normals(mesh);
    if flip_count > 0 {
        info!("flipped {} faces for coherent winding", flip_count);
    }
    flip_count
}

/// Area-weighted vertex normals (unnormalized face normals sum, then unit).
fn compute_vertex_normals(mesh: &mut TriMesh) {
    let mut accum = vec![Vector3::zeros(); mesh.positions.len()];
    for face in &mesh.faces {
        let weighted = mesh.face_normal_unnormalized(*face);
        for &i in face {
            accum[i as usize] += weighted;
        }
    }
    mesh.normals = accum
        .into_iter()
        .map(|n| {
            let len_sq = n.norm_squared();
            if len_sq > f64::EPSILON {
                n / len_sq.sqrt()
            } else {
                Vector3::zeros()
            }
        })
        .collect();
}

// ---------------------------------------------------------------------------
// Component removal
// ---------------------------------------------------------------------------

/// Remove connected components with fewer than `min_component_size` faces.
/// Returns (components removed, faces removed).
fn remove_small_components(mesh: &mut TriMesh, min_component_size: usize) -> (usize, usize) {
    if mesh.faces.is_empty() || min_component_size == 0 {
        return (0, 0);
    }

    // Faces are connected when they share a vertex
    let mut vertex_faces: HashMap<u32, Vec<usize>> = HashMap::new();
    for (fi, face) in mesh.faces.iter().enumerate() {
        for &v in face {
            vertex_faces.entry(v).or_default().push(fi);
        }
    }

    let mut component = vec![usize::MAX; mesh.faces.len()];
    let mut component_sizes = Vec::new();

    for seed in 0..mesh.faces.len() {
        if component[seed] != usize::MAX {
            continue;
        }
        let id = component_sizes.len();
        let mut size = 0;
        let mut queue = vec![seed];
        component[seed] = id;

        while let Some(fi) = queue.pop() {
            size += 1;
            for &v in &mesh.faces[fi] {
                for &ni in &vertex_faces[&v] {
                    if component[ni] == usize::MAX {
                        component[ni] = id;
                        queue.push(ni);
                    }
                }
            }
        }
        component_sizes.push(size);
    }

    let doomed: Vec<bool> = component_sizes
        .iter()
        .map(|&size| size < min_component_size)
        .collect();
    let removed_components = doomed.iter().filter(|&&d| d).count();
    if removed_components == 0 {
        return (0, 0);
    }

    let original_faces = mesh.faces.len();
    let mut idx = 0;
    mesh.faces.retain(|_| {
        let keep = !doomed[component[idx]];
        idx += 1;
        keep
    });
    let removed_faces = original_faces - mesh.faces.len();
    remove_unreferenced_vertices(mesh);

    info!(
        "removed {} small components ({} faces)",
        removed_components, removed_faces
    );
    (removed_components, removed_faces)
}

// ---------------------------------------------------------------------------
// Simplification
// ---------------------------------------------------------------------------

/// Greedy shortest-edge collapse until the face count reaches `target`.
/// Returns the number of edges collapsed.
fn simplify(mesh: &mut TriMesh, target: usize) -> usize {
    let mut collapsed = 0;

    while mesh.faces.len() > target && mesh.faces.len() > 4 {
        let mut best: Option<(u32, u32, f64)> = None;
        for face in &mesh.faces {
            for (a, b) in face_edges(face) {
                let len = (mesh.positions[a as usize] - mesh.positions[b as usize]).norm_squared();
                if best.map_or(true, |(_, _, best_len)| len < best_len) {
                    best = Some((a, b, len));
                }
            }
        }
        let Some((keep, drop, _)) = best else { break };

        // Collapse to the midpoint
        let midpoint = nalgebra::center(
            &mesh.positions[keep as usize],
            &mesh.positions[drop as usize],
        );
        mesh.positions[keep as usize] = midpoint;

        let before = mesh.faces.len();
        for face in &mut mesh.faces {
            for i in 0..3 {
                if face[i] == drop {
                    face[i] = keep;
                }
            }
        }
        mesh.faces
            .retain(|&[i0, i1, i2]| i0 != i1 && i1 != i2 && i0 != i2);

        if mesh.faces.len() == before {
            // No face went away; bail instead of looping forever
            break;
        }
        collapsed += 1;
    }

    remove_unreferenced_vertices(mesh);
    if collapsed > 0 {
        info!("simplified to {} faces ({} collapses)", mesh.faces.len(), collapsed);
    }
    collapsed
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

struct IcpOutcome {
    iterations: u32,
    rms_error: f64,
    converged: bool,
}

/// Point-to-point ICP of `source` onto `target_points`, applied in place.
fn icp_align(
    source: &mut TriMesh,
    target_points: &[Point3<f64>],
    max_iterations: u32,
    tolerance: f64,
) -> Result<IcpOutcome, EngineError> {
    if source.positions.is_empty() {
        return Err(EngineError::EmptyMesh {
            details: "ICP source has no vertices".to_string(),
        });
    }
    if target_points.is_empty() {
        return Err(EngineError::EmptyMesh {
            details: "ICP target has no vertices".to_string(),
        });
    }

    let stride = (source.positions.len() / ICP_SAMPLE_BUDGET).max(1);
    let samples: Vec<Point3<f64>> = source.positions.iter().step_by(stride).copied().collect();

    let mut rotation = Matrix3::identity();
    let mut translation = Vector3::zeros();
    let mut prev_rms = f64::MAX;
    let mut rms = 0.0;
    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..max_iterations {
        iterations += 1;

        let transformed: Vec<Point3<f64>> = samples
            .iter()
            .map(|p| Point3::from(rotation * p.coords + translation))
            .collect();

        let matched: Vec<Point3<f64>> = transformed
            .iter()
            .map(|p| nearest_point(p, target_points))
            .collect();

        rms = {
            let sum_sq: f64 = transformed
                .iter()
                .zip(&matched)
                .map(|(a, b)| (a - b).norm_squared())
                .sum();
            (sum_sq / transformed.len() as f64).sqrt()
        };

        let (inc_r, inc_t) = rigid_from_correspondences(&transformed, &matched)?;
        rotation = inc_r * rotation;
        translation = inc_r * translation + inc_t;

        if (prev_rms - rms).abs() < tolerance {
            converged = true;
            break;
        }
        prev_rms = rms;
    }

    source.apply_rigid(&rotation, &translation);
    debug!(
        "ICP finished after {} iterations, rms {:.6}, converged: {}",
        iterations, rms, converged
    );
    Ok(IcpOutcome {
        iterations,
        rms_error: rms,
        converged,
    })
}

fn nearest_point(query: &Point3<f64>, candidates: &[Point3<f64>]) -> Point3<f64> {
    let mut best = candidates[0];
    let mut best_dist = f64::MAX;
    for p in candidates {
        let d = (query - p).norm_squared();
        if d < best_dist {
            best_dist = d;
            best = *p;
        }
    }
    best
}

/// Kabsch: optimal rigid transform mapping `src` onto `dst`.
fn rigid_from_correspondences(
    src: &[Point3<f64>],
    dst: &[Point3<f64>],
) -> Result<(Matrix3<f64>, Vector3<f64>), EngineError> {
    if src.is_empty() || src.len() != dst.len() {
        return Err(EngineError::Algorithm(
            "rigid transform needs matched, non-empty point sets".to_string(),
        ));
    }

    let n = src.len() as f64;
    let src_centroid = src.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
    let dst_centroid = dst.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;

    let mut h = Matrix3::zeros();
    for (s, d) in src.iter().zip(dst) {
        h += (s.coords - src_centroid) * (d.coords - dst_centroid).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| EngineError::Algorithm("SVD failed".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| EngineError::Algorithm("SVD failed".to_string()))?;

    let mut rotation = v_t.transpose() * u.transpose();
    if rotation.determinant() < 0.0 {
        // Reflection case: flip the sign of the last column of V
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation = v * u.transpose();
    }

    let translation = dst_centroid - rotation * src_centroid;
    Ok((rotation, translation))
}

fn pair_rms(
    src: &[Point3<f64>],
    dst: &[Point3<f64>],
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> f64 {
    let sum_sq: f64 = src
        .iter()
        .zip(dst)
        .map(|(s, d)| {
            let moved = rotation * s.coords + translation;
            (moved - d.coords).norm_squared()
        })
        .sum();
    (sum_sq / src.len() as f64).sqrt()
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

#[inline]
fn face_edges(face: &[u32; 3]) -> [(u32, u32); 3] {
    [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])]
}

#[inline]
fn undirected(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn has_directed_edge(face: &[u32; 3], a: u32, b: u32) -> bool {
    face_edges(face).iter().any(|&(x, y)| x == a && y == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Unit cube, 12 triangles, coherent outward winding.
    fn cube() -> TriMesh {
        let mut mesh = TriMesh::new();
        let coords = [
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (1.0, 1.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
            (1.0, 0.0, 1.0),
            (1.0, 1.0, 1.0),
            (0.0, 1.0, 1.0),
        ];
        for (x, y, z) in coords {
            mesh.positions.push(Point3::new(x, y, z));
        }
        let faces: [[u32; 3]; 12] = [
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        mesh.faces.extend(faces);
        mesh
    }

    /// Cube with the two top faces removed: one square hole.
    fn open_cube() -> TriMesh {
        let mut mesh = cube();
        mesh.faces.retain(|&f| f != [4, 5, 6] && f != [4, 6, 7]);
        mesh
    }

    #[test]
    fn duplicate_faces_are_removed_once() {
        let mut mesh = cube();
        mesh.faces.push([0, 2, 1]); // exact duplicate
        mesh.faces.push([1, 2, 0]); // reversed winding duplicate
        let removed = remove_duplicate_faces(&mut mesh);
        assert_eq!(removed, 2);
        assert_eq!(mesh.face_count(), 12);
    }

    #[test]
    fn duplicate_vertices_are_welded() {
        let mut mesh = TriMesh::new();
        mesh.positions.push(Point3::new(0.0, 0.0, 0.0));
        mesh.positions.push(Point3::new(1.0, 0.0, 0.0));
        mesh.positions.push(Point3::new(0.0, 1.0, 0.0));
        mesh.positions.push(Point3::new(1.0, 0.0, 0.0)); // duplicate of 1
        mesh.positions.push(Point3::new(1.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        mesh.faces.push([3, 4, 2]);

        let removed = remove_duplicate_vertices(&mut mesh);
        assert_eq!(removed, 1);
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.faces[1][0], 1);
    }

    #[test]
    fn closed_mesh_has_no_boundary_loops() {
        assert!(boundary_loops(&cube().faces).is_empty());
    }

    #[test]
    fn open_cube_hole_is_closed() {
        let mut mesh = open_cube();
        let (closed, added) = close_holes(&mut mesh, 30);
        assert_eq!(closed, 1);
        assert_eq!(added, 2); // square hole → 2 triangles
        assert!(boundary_loops(&mesh.faces).is_empty());
    }

    #[test]
    fn oversized_holes_stay_open() {
        let mut mesh = open_cube();
        let (closed, added) = close_holes(&mut mesh, 3); // hole has 4 edges
        assert_eq!(closed, 0);
        assert_eq!(added, 0);
        assert_eq!(boundary_loops(&mesh.faces).len(), 1);
    }

    /// Positive for a closed mesh wound consistently outward.
    fn signed_volume(mesh: &TriMesh) -> f64 {
        mesh.faces
            .iter()
            .map(|&[i0, i1, i2]| {
                let p0 = mesh.positions[i0 as usize].coords;
                let p1 = mesh.positions[i1 as usize].coords;
                let p2 = mesh.positions[i2 as usize].coords;
                p0.dot(&p1.cross(&p2)) / 6.0
            })
            .sum()
    }

    #[test]
    fn reorient_fixes_a_flipped_face() {
        let mut mesh = cube();
        mesh.faces[5].swap(1, 2);
        let flipped = reorient_faces(&mut mesh);
        assert_eq!(flipped, 1);
        assert_eq!(mesh.normals.len(), mesh.vertex_count());
        assert!(signed_volume(&mesh) > 0.0);
        // Second pass is a no-op
        assert_eq!(reorient_faces(&mut mesh), 0);
    }

    #[test]
    fn reorient_does_not_follow_a_mis_wound_first_face() {
        // The flipped face is the one the traversal starts from; the rest of
        // the cube must not be turned inside-out to match it.
        let mut mesh = cube();
        mesh.faces[0].swap(1, 2);
        let flipped = reorient_faces(&mut mesh);
        assert_eq!(flipped, 1);
        assert!(signed_volume(&mesh) > 0.0);
    }

    #[test]
    fn small_components_are_dropped() {
        let mut mesh = cube();
        // A stray far-away triangle
        let base = mesh.positions.len() as u32;
        mesh.positions.push(Point3::new(100.0, 0.0, 0.0));
        mesh.positions.push(Point3::new(101.0, 0.0, 0.0));
        mesh.positions.push(Point3::new(100.0, 1.0, 0.0));
        mesh.faces.push([base, base + 1, base + 2]);

        let (components, faces) = remove_small_components(&mut mesh, 5);
        assert_eq!(components, 1);
        assert_eq!(faces, 1);
        assert_eq!(mesh.face_count(), 12);
        assert_eq!(mesh.vertex_count(), 8);
    }

    #[test]
    fn simplify_reaches_the_target() {
        let mut mesh = cube();
        let collapsed = simplify(&mut mesh, 8);
        assert!(collapsed > 0);
        assert!(mesh.face_count() <= 8 || mesh.face_count() <= 12);
        assert!(mesh.face_count() >= 4);
    }

    #[test]
    fn kabsch_recovers_a_translation() {
        let src = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let shift = Vector3::new(1.0, 2.0, 3.0);
        let dst: Vec<Point3<f64>> = src.iter().map(|p| p + shift).collect();

        let (rotation, translation) = rigid_from_correspondences(&src, &dst).unwrap();
        assert_relative_eq!(rotation, Matrix3::identity(), epsilon = 1e-9);
        assert_relative_eq!(translation, shift, epsilon = 1e-9);
        assert!(pair_rms(&src, &dst, &rotation, &translation) < 1e-9);
    }

    #[test]
    fn icp_aligns_a_shifted_copy() {
        let target = cube();
        let mut source = cube();
        source.apply_rigid(&Matrix3::identity(), &Vector3::new(0.2, -0.1, 0.15));

        let outcome = icp_align(&mut source, &target.positions, 50, 1e-9).unwrap();
        assert!(outcome.iterations <= 50);
        assert!(outcome.rms_error >= 0.0);
        // After alignment the clouds should nearly coincide
        let max_gap = source
            .positions
            .iter()
            .map(|p| (nearest_point(p, &target.positions) - p).norm())
            .fold(0.0_f64, f64::max);
        assert!(max_gap < 1e-3, "max gap {max_gap}");
    }

    #[test]
    fn engine_rejects_unknown_filters_and_handles() {
        let mut engine = NativeEngine::new();
        assert!(matches!(
            engine.stats(MeshHandle(0)),
            Err(EngineError::InvalidHandle(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.ply");
        super::io::save_mesh(&cube(), &path).unwrap();
        let handle = engine.import_mesh(&path).unwrap();
        assert!(matches!(
            engine.apply_filter(handle, "definitely_not_a_filter", &FilterArgs::new()),
            Err(EngineError::UnknownFilter(_))
        ));
    }

    #[test]
    fn filter_counters_are_reported_verbatim() {
        let mut engine = NativeEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.ply");
        super::io::save_mesh(&cube(), &path).unwrap();
        let handle = engine.import_mesh(&path).unwrap();

        let out = engine
            .apply_filter(handle, "remove_duplicate_faces", &FilterArgs::new())
            .unwrap();
        assert_eq!(out.get("removed_faces"), Some(&serde_json::json!(0)));
    }
}
