//! Mesh sessions: stable ids over an engine's mesh set.
//!
//! A session owns one engine instance and maps small sequential ids to the
//! engine's opaque handles. Ids are assigned in load order starting at 0 and
//! never reused; a failed load consumes no id. All higher-level operations
//! (repair, alignment, batch) address meshes through these ids.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::engine::{
    EngineError, FilterArgs, FilterOutput, MeshEngine, MeshHandle, NativeEngine,
};
use crate::types::{BoundingBox, MeshId, MeshInfo, MeshToolError, MeshToolResult};

/// A working set of loaded meshes backed by one engine instance.
pub struct Session {
    engine: Box<dyn MeshEngine>,
    meshes: BTreeMap<MeshId, MeshHandle>,
    next_id: MeshId,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session backed by the built-in engine.
    pub fn new() -> Self {
        Self::with_engine(Box::new(NativeEngine::new()))
    }

    /// Create a session over a caller-provided engine backend.
    pub fn with_engine(engine: Box<dyn MeshEngine>) -> Self {
        Self {
            engine,
            meshes: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Load a mesh file and assign it the next sequential id.
    pub fn load(&mut self, path: &Path) -> MeshToolResult<MeshId> {
        let handle = self
            .engine
            .import_mesh(path)
            .map_err(|e| MeshToolError::Load {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
        let id = self.next_id;
        self.next_id += 1;
        self.meshes.insert(id, handle);
        info!("loaded mesh {} from {}", id, path.display());
        Ok(id)
    }

    /// Save a mesh to a file; the format follows the file extension.
    pub fn save(&mut self, id: MeshId, path: &Path) -> MeshToolResult<()> {
        let handle = self.handle(id)?;
        self.engine
            .export_mesh(handle, path)
            .map_err(|e| MeshToolError::Save {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
        info!("saved mesh {} to {}", id, path.display());
        Ok(())
    }

    /// Snapshot of vertex/face counts and bounding box for one mesh.
    pub fn mesh_info(&self, id: MeshId) -> MeshToolResult<MeshInfo> {
        let handle = self.handle(id)?;
        let stats = self
            .engine
            .stats(handle)
            .map_err(|e| MeshToolError::Filter {
                filter: "stats".to_string(),
                details: e.to_string(),
            })?;
        Ok(MeshInfo {
            mesh_id: id,
            vertex_count: stats.vertex_count,
            face_count: stats.face_count,
            bounding_box: BoundingBox::new(stats.bbox_min, stats.bbox_max),
        })
    }

    /// Ids of all loaded meshes, in ascending order.
    pub fn mesh_ids(&self) -> Vec<MeshId> {
        self.meshes.keys().copied().collect()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Info snapshots for every loaded mesh, in id order.
    pub fn list_meshes(&self) -> MeshToolResult<Vec<MeshInfo>> {
        self.mesh_ids()
            .into_iter()
            .map(|id| self.mesh_info(id))
            .collect()
    }

    /// Run one engine filter on a mesh and return its counters verbatim.
    pub fn run_filter(
        &mut self,
        id: MeshId,
        name: &str,
        args: &FilterArgs,
    ) -> MeshToolResult<FilterOutput> {
        let handle = self.handle(id)?;
        self.engine
            .apply_filter(handle, name, args)
            .map_err(|e| match e {
                EngineError::InvalidHandle(_) => MeshToolError::UnknownMesh(id),
                other => MeshToolError::Filter {
                    filter: name.to_string(),
                    details: other.to_string(),
                },
            })
    }

    /// Engine handle for a session id, for filters that reference a second
    /// mesh (e.g. an ICP target).
    pub(crate) fn handle(&self, id: MeshId) -> MeshToolResult<MeshHandle> {
        self.meshes
            .get(&id)
            .copied()
            .ok_or(MeshToolError::UnknownMesh(id))
    }
}
