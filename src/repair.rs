//! The fixed mesh-repair pipeline.
//!
//! Repair is a sequence of four cleanup steps run in a fixed order, with an
//! optional simplification pass at the end:
//!
//! 1. remove duplicate faces and vertices
//! 2. close small holes
//! 3. recompute and coherently orient normals
//! 4. remove small disconnected components
//!
//! The pipeline is all-or-nothing at the reporting level: if any step fails,
//! the whole operation fails and no partial report is produced (the mesh may
//! still have been modified by the steps that ran). Zero counts are valid
//! results, not errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::engine::{FilterArgs, FilterOutput};
use crate::session::Session;
use crate::types::{MeshId, MeshToolResult};

/// Tuning knobs for [`repair`].
#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// Largest hole (in boundary edges) that hole filling will close.
    pub max_hole_size: u32,
    /// Components with fewer faces than this are removed.
    pub min_component_size: u32,
    /// When set, simplify the mesh down to this face count after cleanup.
    pub target_face_count: Option<u32>,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            max_hole_size: 30,
            min_component_size: 25,
            target_face_count: None,
        }
    }
}

/// Counters reported by one repair run. Each step field holds the engine's
/// counters for that step, passed through verbatim; `duplicates` merges the
/// face and vertex sub-steps into one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    pub mesh_id: MeshId,
    pub duplicates: FilterOutput,
    pub hole_filling: FilterOutput,
    pub normals: FilterOutput,
    pub isolated_pieces: FilterOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplification: Option<FilterOutput>,
    /// Vertex/face counts after all steps ran.
    pub final_vertex_count: u64,
    pub final_face_count: u64,
}

impl RepairReport {
    /// The report as a JSON object, for tool responses.
    pub fn to_value(&self) -> Value {
        // A struct of maps and integers cannot fail to serialize
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Run the repair pipeline on one mesh in the session.
pub fn repair(
    session: &mut Session,
    mesh_id: MeshId,
    options: &RepairOptions,
) -> MeshToolResult<RepairReport> {
    info!(
        "repairing mesh {} (max_hole_size={}, min_component_size={})",
        mesh_id, options.max_hole_size, options.min_component_size
    );

    let mut duplicates =
        session.run_filter(mesh_id, "remove_duplicate_faces", &FilterArgs::new())?;
    let vertex_counters =
        session.run_filter(mesh_id, "remove_duplicate_vertices", &FilterArgs::new())?;
    duplicates.extend(vertex_counters);

    let hole_filling = session.run_filter(
        mesh_id,
        "close_holes",
        &FilterArgs::new().with("max_hole_size", options.max_hole_size),
    )?;
    let normals = session.run_filter(mesh_id, "reorient_faces", &FilterArgs::new())?;
    let isolated_pieces = session.run_filter(
        mesh_id,
        "remove_small_components",
        &FilterArgs::new().with("min_component_size", options.min_component_size),
    )?;

    let simplification = match options.target_face_count {
        Some(target) => Some(session.run_filter(
            mesh_id,
            "simplify",
            &FilterArgs::new().with("target_face_count", target),
        )?),
        None => None,
    };

    let info = session.mesh_info(mesh_id)?;
    Ok(RepairReport {
        mesh_id,
        duplicates,
        hole_filling,
        normals,
        isolated_pieces,
        simplification,
        final_vertex_count: info.vertex_count,
        final_face_count: info.face_count,
    })
}
