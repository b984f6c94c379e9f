//! The mesh-processing engine seam.
//!
//! Everything algorithmic is behind the [`MeshEngine`] trait: importing and
//! exporting files, querying mesh statistics, and running named, parameterized
//! filters. The control layer above (sessions, repair, alignment, batch) only
//! ever talks to this surface, so a different backend can be swapped in
//! without touching the orchestration code.
//!
//! [`NativeEngine`] is the built-in backend used by default.

mod io;
mod mesh;
mod native;

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

pub use io::{MeshFormat, SUPPORTED_EXTENSIONS};
pub use mesh::TriMesh;
pub use native::NativeEngine;

/// Opaque engine-internal reference to an imported mesh.
///
/// Handles are only meaningful to the engine that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MeshHandle(pub(crate) u32);

/// Raw statistics reported by the engine for one mesh.
#[derive(Debug, Clone, Copy)]
pub struct MeshStats {
    pub vertex_count: u64,
    pub face_count: u64,
    pub bbox_min: [f64; 3],
    pub bbox_max: [f64; 3],
}

/// A single filter argument value.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Reference to another mesh in the same engine (e.g. an ICP target).
    Mesh(MeshHandle),
    /// A list of 3D points (e.g. picked correspondence points).
    Points(Vec<[f64; 3]>),
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for FilterValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<MeshHandle> for FilterValue {
    fn from(v: MeshHandle) -> Self {
        Self::Mesh(v)
    }
}

impl From<Vec<[f64; 3]>> for FilterValue {
    fn from(v: Vec<[f64; 3]>) -> Self {
        Self::Points(v)
    }
}

/// Named arguments for a filter invocation.
#[derive(Debug, Clone, Default)]
pub struct FilterArgs(BTreeMap<String, FilterValue>);

impl FilterArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set one argument.
    pub fn with(mut self, key: &str, value: impl Into<FilterValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.0.get(key)
    }

    /// Integer argument with a default when absent.
    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, EngineError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(FilterValue::Int(v)) => Ok(*v),
            Some(other) => Err(EngineError::InvalidParameter(format!(
                "'{key}' must be an integer, got {other:?}"
            ))),
        }
    }

    /// Float argument with a default when absent.
    pub fn float_or(&self, key: &str, default: f64) -> Result<f64, EngineError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(FilterValue::Float(v)) => Ok(*v),
            Some(FilterValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(EngineError::InvalidParameter(format!(
                "'{key}' must be a number, got {other:?}"
            ))),
        }
    }

    /// Required mesh-handle argument.
    pub fn mesh(&self, key: &str) -> Result<MeshHandle, EngineError> {
        match self.0.get(key) {
            Some(FilterValue::Mesh(h)) => Ok(*h),
            Some(other) => Err(EngineError::InvalidParameter(format!(
                "'{key}' must be a mesh reference, got {other:?}"
            ))),
            None => Err(EngineError::InvalidParameter(format!(
                "missing required argument '{key}'"
            ))),
        }
    }

    /// Required point-list argument.
    pub fn points(&self, key: &str) -> Result<&[[f64; 3]], EngineError> {
        match self.0.get(key) {
            Some(FilterValue::Points(p)) => Ok(p),
            Some(other) => Err(EngineError::InvalidParameter(format!(
                "'{key}' must be a point list, got {other:?}"
            ))),
            None => Err(EngineError::InvalidParameter(format!(
                "missing required argument '{key}'"
            ))),
        }
    }
}

/// Counters reported by a filter, passed back to callers verbatim.
pub type FilterOutput = serde_json::Map<String, serde_json::Value>;

/// Errors reported by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read {path}: {source}")]
    IoRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    IoWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {details}")]
    Parse {
        path: std::path::PathBuf,
        details: String,
    },

    #[error("unsupported mesh format: {extension:?}")]
    UnsupportedFormat { extension: Option<String> },

    #[error("mesh is empty: {details}")]
    EmptyMesh { details: String },

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("invalid filter parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid mesh handle {0:?}")]
    InvalidHandle(MeshHandle),

    #[error("algorithm failure: {0}")]
    Algorithm(String),
}

/// Capability surface of a mesh-processing backend.
///
/// One engine instance belongs to exactly one session and is never shared;
/// all calls are synchronous and block until the engine returns.
pub trait MeshEngine {
    /// Import a mesh file, returning an engine-scoped handle.
    fn import_mesh(&mut self, path: &Path) -> Result<MeshHandle, EngineError>;

    /// Export a mesh to a file; format inferred from the extension.
    fn export_mesh(&mut self, handle: MeshHandle, path: &Path) -> Result<(), EngineError>;

    /// Report raw statistics for a mesh.
    fn stats(&self, handle: MeshHandle) -> Result<MeshStats, EngineError>;

    /// Run a named filter on a mesh and return its counters verbatim.
    fn apply_filter(
        &mut self,
        handle: MeshHandle,
        name: &str,
        args: &FilterArgs,
    ) -> Result<FilterOutput, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_args_defaults_and_types() {
        let args = FilterArgs::new().with("max_hole_size", 30u32).with("tolerance", 1e-4);

        assert_eq!(args.int_or("max_hole_size", 0).unwrap(), 30);
        assert_eq!(args.int_or("absent", 25).unwrap(), 25);
        assert!((args.float_or("tolerance", 0.0).unwrap() - 1e-4).abs() < 1e-15);
        // Ints coerce to float, not the other way around
        assert!((args.float_or("max_hole_size", 0.0).unwrap() - 30.0).abs() < 1e-12);
        assert!(args.int_or("tolerance", 0).is_err());
    }

    #[test]
    fn filter_args_missing_required() {
        let args = FilterArgs::new();
        assert!(matches!(
            args.mesh("reference"),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            args.points("source_points"),
            Err(EngineError::InvalidParameter(_))
        ));
    }
}
