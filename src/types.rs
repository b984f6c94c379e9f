//! Core types shared across the crate: mesh ids, info snapshots, and the
//! error taxonomy.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a mesh within a [`Session`](crate::Session).
///
/// Ids are assigned sequentially starting at 0, in load order, and are never
/// reused within a session. A failed load consumes no id.
pub type MeshId = u32;

/// Axis-aligned bounding box of a mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Euclidean length of the min→max diagonal.
    pub diagonal: f64,
}

impl BoundingBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        let dx = max[0] - min[0];
        let dy = max[1] - min[1];
        let dz = max[2] - min[2];
        Self {
            min,
            max,
            diagonal: (dx * dx + dy * dy + dz * dz).sqrt(),
        }
    }
}

/// Read-only snapshot of a loaded mesh, computed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshInfo {
    pub mesh_id: MeshId,
    pub vertex_count: u64,
    pub face_count: u64,
    pub bounding_box: BoundingBox,
}

/// Errors surfaced by sessions, operations, and the tool adapter.
///
/// None of these are retried anywhere; every failure propagates to the
/// immediate caller. The batch orchestrator is the single place that converts
/// a failure into a recorded outcome instead of propagating it.
#[derive(Debug, Error)]
pub enum MeshToolError {
    #[error("failed to load mesh from {path}: {details}")]
    Load { path: PathBuf, details: String },

    #[error("failed to save mesh to {path}: {details}")]
    Save { path: PathBuf, details: String },

    #[error("unknown mesh id {0} in this session")]
    UnknownMesh(MeshId),

    #[error("filter '{filter}' failed: {details}")]
    Filter { filter: String, details: String },

    #[error("alignment failed: {0}")]
    Alignment(String),

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Result type alias for mesh tool operations.
pub type MeshToolResult<T> = Result<T, MeshToolError>;
