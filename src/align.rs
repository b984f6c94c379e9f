//! Rigid alignment operations: pairwise ICP, point-pair alignment, and
//! multi-mesh global alignment.
//!
//! Alignment mutates the source mesh in place; the target mesh is never
//! modified. ICP that runs out of iterations without meeting the tolerance is
//! a degraded success, reported with `converged: false`, not an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::engine::{FilterArgs, FilterOutput};
use crate::session::Session;
use crate::types::{MeshId, MeshToolError, MeshToolResult};

/// RMS threshold under which a global-alignment pass counts as converged.
const GLOBAL_ALIGN_RMS_THRESHOLD: f64 = 1e-3;

/// Tuning knobs for ICP runs.
#[derive(Debug, Clone)]
pub struct IcpOptions {
    pub max_iterations: u32,
    /// Stop once the RMS error change between iterations drops below this.
    pub tolerance: f64,
}

impl Default for IcpOptions {
    fn default() -> Self {
        Self {
            max_iterations: 75,
            tolerance: 1e-6,
        }
    }
}

/// Outcome of aligning one source mesh onto one target mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcpReport {
    pub source_mesh_id: MeshId,
    pub target_mesh_id: MeshId,
    pub iterations_performed: u64,
    pub final_rms_error: f64,
    pub converged: bool,
}

impl IcpReport {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Outcome of a point-pair alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointAlignReport {
    pub mesh_id: MeshId,
    pub pairs_used: u64,
    pub rms_error: f64,
}

/// Outcome of aligning a set of meshes onto a common base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAlignReport {
    pub base_mesh_id: MeshId,
    pub alignments: Vec<IcpReport>,
    /// True when every alignment converged or ended below the RMS threshold.
    pub converged: bool,
}

impl GlobalAlignReport {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Rigidly align `source_id` onto `target_id` with point-to-point ICP.
pub fn align_icp(
    session: &mut Session,
    source_id: MeshId,
    target_id: MeshId,
    options: &IcpOptions,
) -> MeshToolResult<IcpReport> {
    if source_id == target_id {
        return Err(MeshToolError::Validation(
            "source and target mesh must differ".to_string(),
        ));
    }
    let target_handle = session.handle(target_id)?;

    info!(
        "ICP: mesh {} onto mesh {} (max_iterations={})",
        source_id, target_id, options.max_iterations
    );
    let args = FilterArgs::new()
        .with("reference", target_handle)
        .with("max_iterations", options.max_iterations)
        .with("tolerance", options.tolerance);
    let counters = session
        .run_filter(source_id, "icp_align", &args)
        .map_err(as_alignment_error)?;

    let report = IcpReport {
        source_mesh_id: source_id,
        target_mesh_id: target_id,
        iterations_performed: counter_u64(&counters, "iterations"),
        final_rms_error: counter_f64(&counters, "rms_error"),
        converged: counters
            .get("converged")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };
    info!(
        "ICP: mesh {} rms {:.6} after {} iterations (converged: {})",
        source_id, report.final_rms_error, report.iterations_performed, report.converged
    );
    Ok(report)
}

/// Rigidly align a mesh from user-picked correspondence pairs.
///
/// Needs at least 3 pairs; `source_points` and `target_points` must be the
/// same length and are matched by position in the lists.
pub fn align_point_based(
    session: &mut Session,
    mesh_id: MeshId,
    source_points: Vec<[f64; 3]>,
    target_points: Vec<[f64; 3]>,
) -> MeshToolResult<PointAlignReport> {
    if source_points.len() != target_points.len() {
        return Err(MeshToolError::Validation(format!(
            "point lists differ in length: {} vs {}",
            source_points.len(),
            target_points.len()
        )));
    }
    if source_points.len() < 3 {
        return Err(MeshToolError::Validation(format!(
            "point-based alignment needs at least 3 pairs, got {}",
            source_points.len()
        )));
    }

    let args = FilterArgs::new()
        .with("source_points", source_points)
        .with("target_points", target_points);
    let counters = session
        .run_filter(mesh_id, "align_to_points", &args)
        .map_err(as_alignment_error)?;

    Ok(PointAlignReport {
        mesh_id,
        pairs_used: counter_u64(&counters, "pairs_used"),
        rms_error: counter_f64(&counters, "rms_error"),
    })
}

/// Align a set of meshes onto the first one in the set.
///
/// `mesh_ids` selects the participants; `None` means every loaded mesh, in
/// id order. Unknown ids fail with `UnknownMesh` before anything moves.
/// The base mesh is reported too, trivially: zero iterations, zero error.
/// Convergence of the whole pass requires every non-base alignment to either
/// converge or end below a fixed RMS threshold.
pub fn global_align(
    session: &mut Session,
    mesh_ids: Option<&[MeshId]>,
    options: &IcpOptions,
) -> MeshToolResult<GlobalAlignReport> {
    let ids: Vec<MeshId> = match mesh_ids {
        Some(ids) => ids.to_vec(),
        None => session.mesh_ids(),
    };
    if ids.len() < 2 {
        return Err(MeshToolError::Validation(format!(
            "global alignment needs at least 2 meshes, got {}",
            ids.len()
        )));
    }
    for &id in &ids {
        session.handle(id)?;
    }

    let base_id = ids[0];
    let mut alignments = vec![IcpReport {
        source_mesh_id: base_id,
        target_mesh_id: base_id,
        iterations_performed: 0,
        final_rms_error: 0.0,
        converged: true,
    }];

    for &id in &ids[1..] {
        alignments.push(align_icp(session, id, base_id, options)?);
    }

    let converged = alignments
        .iter()
        .all(|r| r.converged || r.final_rms_error < GLOBAL_ALIGN_RMS_THRESHOLD);
    info!(
        "global alignment of {} meshes onto mesh {} (converged: {})",
        ids.len(),
        base_id,
        converged
    );
    Ok(GlobalAlignReport {
        base_mesh_id: base_id,
        alignments,
        converged,
    })
}

/// Filter failures inside alignment surface as alignment errors; everything
/// else (unknown ids in particular) passes through unchanged.
fn as_alignment_error(err: MeshToolError) -> MeshToolError {
    match err {
        MeshToolError::Filter { details, .. } => MeshToolError::Alignment(details),
        other => other,
    }
}

fn counter_u64(counters: &FilterOutput, key: &str) -> u64 {
    counters.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn counter_f64(counters: &FilterOutput, key: &str) -> f64 {
    counters.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUBE_PLY: &str = "ply\n\
        format ascii 1.0\n\
        element vertex 8\n\
        property double x\n\
        property double y\n\
        property double z\n\
        element face 12\n\
        property list uchar int vertex_indices\n\
        end_header\n\
        0 0 0\n\
        1 0 0\n\
        1 1 0\n\
        0 1 0\n\
        0 0 1\n\
        1 0 1\n\
        1 1 1\n\
        0 1 1\n\
        3 0 2 1\n\
        3 0 3 2\n\
        3 4 5 6\n\
        3 4 6 7\n\
        3 0 1 5\n\
        3 0 5 4\n\
        3 2 3 7\n\
        3 2 7 6\n\
        3 0 4 7\n\
        3 0 7 3\n\
        3 1 2 6\n\
        3 1 6 5\n";

    /// Same cube shifted by (0.2, -0.1, 0.15).
    fn shifted_cube_ply() -> String {
        let mut out = String::new();
        for line in CUBE_PLY.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() == 3 && fields.iter().all(|f| f.parse::<f64>().is_ok()) {
                let x: f64 = fields[0].parse().unwrap();
                let y: f64 = fields[1].parse().unwrap();
                let z: f64 = fields[2].parse().unwrap();
                out.push_str(&format!("{} {} {}\n", x + 0.2, y - 0.1, z + 0.15));
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    fn two_cube_session(dir: &tempfile::TempDir) -> (Session, MeshId, MeshId) {
        let target = dir.path().join("target.ply");
        let source = dir.path().join("source.ply");
        std::fs::write(&target, CUBE_PLY).unwrap();
        std::fs::write(&source, shifted_cube_ply()).unwrap();

        let mut session = Session::new();
        let target_id = session.load(&target).unwrap();
        let source_id = session.load(&source).unwrap();
        (session, source_id, target_id)
    }

    #[test]
    fn icp_pulls_a_shifted_copy_back() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, target_id) = two_cube_session(&dir);

        let report = align_icp(&mut session, source_id, target_id, &IcpOptions::default()).unwrap();
        assert_eq!(report.source_mesh_id, source_id);
        assert_eq!(report.target_mesh_id, target_id);
        assert!(report.iterations_performed >= 1);
        assert!(report.final_rms_error < 1e-3, "rms {}", report.final_rms_error);

        // Target mesh was not touched
        let target_info = session.mesh_info(target_id).unwrap();
        assert_eq!(target_info.bounding_box.min, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn icp_rejects_identical_source_and_target() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, _) = two_cube_session(&dir);
        let err =
            align_icp(&mut session, source_id, source_id, &IcpOptions::default()).unwrap_err();
        assert!(matches!(err, MeshToolError::Validation(_)));
    }

    #[test]
    fn icp_with_unknown_ids_is_not_an_alignment_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, _) = two_cube_session(&dir);
        let err = align_icp(&mut session, source_id, 99, &IcpOptions::default()).unwrap_err();
        assert!(matches!(err, MeshToolError::UnknownMesh(99)));
    }

    #[test]
    fn running_out_of_iterations_is_a_degraded_success() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, target_id) = two_cube_session(&dir);

        let options = IcpOptions {
            max_iterations: 1,
            tolerance: 0.0,
        };
        let report = align_icp(&mut session, source_id, target_id, &options).unwrap();
        assert_eq!(report.iterations_performed, 1);
        assert!(!report.converged);
    }

    #[test]
    fn point_alignment_needs_three_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, _) = two_cube_session(&dir);

        let pair = vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let err =
            align_point_based(&mut session, source_id, pair.clone(), pair).unwrap_err();
        assert!(matches!(err, MeshToolError::Validation(_)));
    }

    #[test]
    fn point_alignment_recovers_a_translation() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, _) = two_cube_session(&dir);

        // Three corners of the shifted cube and where they belong
        let source_points = vec![
            [0.2, -0.1, 0.15],
            [1.2, -0.1, 0.15],
            [0.2, 0.9, 0.15],
        ];
        let target_points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let report =
            align_point_based(&mut session, source_id, source_points, target_points).unwrap();
        assert_eq!(report.pairs_used, 3);
        assert!(report.rms_error < 1e-9);

        let info = session.mesh_info(source_id).unwrap();
        assert!((info.bounding_box.min[0] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn global_align_reports_the_base_trivially() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _, _) = two_cube_session(&dir);

        let report = global_align(&mut session, None, &IcpOptions::default()).unwrap();
        assert_eq!(report.base_mesh_id, 0);
        assert_eq!(report.alignments.len(), 2);
        assert_eq!(report.alignments[0].source_mesh_id, 0);
        assert_eq!(report.alignments[0].iterations_performed, 0);
        assert_eq!(report.alignments[0].final_rms_error, 0.0);
        assert!(report.alignments[0].converged);
        assert_eq!(report.alignments[1].target_mesh_id, 0);
    }

    #[test]
    fn global_align_carries_an_aggregate_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _, _) = two_cube_session(&dir);

        let report = global_align(&mut session, None, &IcpOptions::default()).unwrap();
        assert!(report.converged);

        let json = report.to_value();
        assert_eq!(json.get("converged"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn global_align_respects_an_explicit_id_subset() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, target_id) = two_cube_session(&dir);

        let ids = [target_id, source_id];
        let report = global_align(&mut session, Some(&ids), &IcpOptions::default()).unwrap();
        assert_eq!(report.base_mesh_id, target_id);
        assert_eq!(report.alignments.len(), 2);
    }

    #[test]
    fn global_align_rejects_unknown_ids_before_moving_anything() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, source_id, _) = two_cube_session(&dir);

        let before = session.mesh_info(source_id).unwrap().bounding_box.min;
        let ids = [source_id, 42];
        let err = global_align(&mut session, Some(&ids), &IcpOptions::default()).unwrap_err();
        assert!(matches!(err, MeshToolError::UnknownMesh(42)));
        let after = session.mesh_info(source_id).unwrap().bounding_box.min;
        assert_eq!(before, after);
    }

    #[test]
    fn global_align_needs_two_meshes() {
        let mut session = Session::new();
        let err = global_align(&mut session, None, &IcpOptions::default()).unwrap_err();
        assert!(matches!(err, MeshToolError::Validation(_)));
    }
}
