//! MCP server implementation using the official rmcp SDK
//!
//! Exposes mesh repair, alignment, and batch processing via the Model
//! Context Protocol. Every tool call works on file paths and runs in a
//! fresh session, so calls are independent of each other and a failed call
//! leaves no state behind.

use std::path::Path;
use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool,
    },
    service::{RequestContext, RoleServer},
    ErrorData as McpError, ServerHandler,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::align::{align_icp, align_point_based, global_align, IcpOptions};
use crate::batch::{batch_align, batch_repair};
use crate::repair::{repair, RepairOptions};
use crate::session::Session;
use crate::types::{MeshToolError, MeshToolResult};

/// Mesh tools MCP service.
///
/// Stateless: each tool call builds its own session, so the service itself
/// carries no data and is trivially cloneable.
#[derive(Clone, Default)]
pub struct MeshToolsService;

impl MeshToolsService {
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// Tool catalog
// ============================================================================

fn schema(value: Value) -> Arc<JsonObject> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

/// The advertised tool list, with hand-written JSON schemas.
pub fn tool_catalog() -> Vec<Tool> {
    vec![
        Tool::new(
            "load_mesh",
            "Load one or more mesh files and return basic statistics \
             (vertex/face counts, bounding box) for each mesh.",
            schema(json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Absolute paths to mesh files to load.",
                    },
                },
                "required": ["paths"],
            })),
        ),
        Tool::new(
            "get_mesh_info",
            "Return vertex count, face count, and bounding-box info for a mesh file.",
            schema(json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute path to the mesh file.",
                    },
                },
                "required": ["path"],
            })),
        ),
        Tool::new(
            "repair_mesh",
            "Repair a mesh file: remove duplicate faces and vertices, fill \
             small holes, and delete small disconnected components. Writes \
             the result to output_path.",
            schema(json!({
                "type": "object",
                "properties": {
                    "input_path": {
                        "type": "string",
                        "description": "Path to the input mesh file.",
                    },
                    "output_path": {
                        "type": "string",
                        "description": "Path to write the repaired mesh.",
                    },
                    "max_hole_size": {
                        "type": "integer",
                        "default": 30,
                        "description": "Maximum boundary-edge count of holes to fill.",
                    },
                    "min_component_size": {
                        "type": "integer",
                        "default": 25,
                        "description": "Minimum face count to keep a component.",
                    },
                    "target_face_count": {
                        "type": "integer",
                        "description": "When set, simplify to this face count after cleanup.",
                    },
                },
                "required": ["input_path", "output_path"],
            })),
        ),
        Tool::new(
            "align_icp",
            "Align a source mesh onto a target mesh using Iterative Closest \
             Point (ICP). Writes the aligned source mesh to output_path.",
            schema(json!({
                "type": "object",
                "properties": {
                    "source_path": {
                        "type": "string",
                        "description": "Path to the scan to be aligned.",
                    },
                    "target_path": {
                        "type": "string",
                        "description": "Path to the fixed reference mesh.",
                    },
                    "output_path": {
                        "type": "string",
                        "description": "Path to write the aligned source mesh.",
                    },
                    "max_iterations": {
                        "type": "integer",
                        "default": 75,
                        "description": "Maximum ICP iterations.",
                    },
                    "tolerance": {
                        "type": "number",
                        "default": 1e-6,
                        "description": "RMS-change threshold for convergence.",
                    },
                },
                "required": ["source_path", "target_path", "output_path"],
            })),
        ),
        Tool::new(
            "align_points",
            "Align a mesh using at least three user-picked correspondence \
             point pairs, then write it to output_path.",
            schema(json!({
                "type": "object",
                "properties": {
                    "mesh_path": {
                        "type": "string",
                        "description": "Path to the mesh to align.",
                    },
                    "output_path": {
                        "type": "string",
                        "description": "Path to write the aligned mesh.",
                    },
                    "source_points": {
                        "type": "array",
                        "items": {"type": "array", "items": {"type": "number"}},
                        "description": "Picked points on the mesh, as [x, y, z] triples.",
                    },
                    "target_points": {
                        "type": "array",
                        "items": {"type": "array", "items": {"type": "number"}},
                        "description": "Matching destination points, same order.",
                    },
                },
                "required": ["mesh_path", "output_path", "source_points", "target_points"],
            })),
        ),
        Tool::new(
            "global_align",
            "Load every mesh in mesh_paths, align them all onto the first \
             one, and save each aligned mesh to output_dir under its \
             original filename.",
            schema(json!({
                "type": "object",
                "properties": {
                    "mesh_paths": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Paths to mesh files to align globally.",
                    },
                    "output_dir": {
                        "type": "string",
                        "description": "Directory to write the aligned meshes.",
                    },
                    "mesh_ids": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "description": "Ids (load order, from 0) of the meshes to align; \
                                        all loaded meshes when omitted.",
                    },
                },
                "required": ["mesh_paths", "output_dir"],
            })),
        ),
        Tool::new(
            "batch_repair",
            "Repair every mesh in an input directory and write results to \
             an output directory. Failures on single files are recorded and \
             the run continues.",
            schema(json!({
                "type": "object",
                "properties": {
                    "input_dir": {
                        "type": "string",
                        "description": "Directory containing input mesh files.",
                    },
                    "output_dir": {
                        "type": "string",
                        "description": "Directory where repaired meshes are saved.",
                    },
                    "max_hole_size": {"type": "integer", "default": 30},
                    "min_component_size": {"type": "integer", "default": 25},
                    "target_face_count": {"type": "integer"},
                },
                "required": ["input_dir", "output_dir"],
            })),
        ),
        Tool::new(
            "batch_align",
            "ICP-align every mesh in an input directory against a single \
             target (reference) mesh and write aligned meshes to an output \
             directory.",
            schema(json!({
                "type": "object",
                "properties": {
                    "input_dir": {
                        "type": "string",
                        "description": "Directory of scan files to align.",
                    },
                    "target_mesh": {
                        "type": "string",
                        "description": "Path to the fixed reference mesh.",
                    },
                    "output_dir": {
                        "type": "string",
                        "description": "Directory where aligned meshes are saved.",
                    },
                    "max_iterations": {"type": "integer", "default": 75},
                    "tolerance": {"type": "number", "default": 1e-6},
                },
                "required": ["input_dir", "target_mesh", "output_dir"],
            })),
        ),
    ]
}

// ============================================================================
// Dispatch
// ============================================================================

/// Route one tool call to the matching operation.
///
/// Everything underneath is blocking file and geometry work, so dispatch
/// itself is synchronous.
pub fn dispatch(name: &str, args: &JsonObject) -> MeshToolResult<Value> {
    match name {
        "load_mesh" => {
            let paths = require_str_array(args, "paths")?;
            let mut session = Session::new();
            let mut meshes = Vec::new();
            for path in &paths {
                let id = session.load(Path::new(path))?;
                meshes.push(serde_json::to_value(session.mesh_info(id)?).unwrap_or(Value::Null));
            }
            Ok(json!({ "meshes": meshes }))
        }

        "get_mesh_info" => {
            let path = require_str(args, "path")?;
            let mut session = Session::new();
            let id = session.load(Path::new(path))?;
            Ok(serde_json::to_value(session.mesh_info(id)?).unwrap_or(Value::Null))
        }

        "repair_mesh" => {
            let input_path = require_str(args, "input_path")?;
            let output_path = require_str(args, "output_path")?;
            let options = repair_options(args)?;

            let mut session = Session::new();
            let id = session.load(Path::new(input_path))?;
            let report = repair(&mut session, id, &options)?;
            session.save(id, Path::new(output_path))?;
            Ok(json!({ "repair": report.to_value(), "output": output_path }))
        }

        "align_icp" => {
            let source_path = require_str(args, "source_path")?;
            let target_path = require_str(args, "target_path")?;
            let output_path = require_str(args, "output_path")?;
            let options = icp_options(args)?;

            let mut session = Session::new();
            let target_id = session.load(Path::new(target_path))?;
            let source_id = session.load(Path::new(source_path))?;
            let report = align_icp(&mut session, source_id, target_id, &options)?;
            session.save(source_id, Path::new(output_path))?;
            Ok(json!({ "alignment": report.to_value(), "output": output_path }))
        }

        "align_points" => {
            let mesh_path = require_str(args, "mesh_path")?;
            let output_path = require_str(args, "output_path")?;
            let source_points = require_points(args, "source_points")?;
            let target_points = require_points(args, "target_points")?;

            let mut session = Session::new();
            let id = session.load(Path::new(mesh_path))?;
            let report = align_point_based(&mut session, id, source_points, target_points)?;
            session.save(id, Path::new(output_path))?;
            Ok(json!({
                "alignment": serde_json::to_value(&report).unwrap_or(Value::Null),
                "output": output_path,
            }))
        }

        "global_align" => {
            let mesh_paths = require_str_array(args, "mesh_paths")?;
            let output_dir = require_str(args, "output_dir")?;

            let mesh_ids = opt_id_array(args, "mesh_ids")?;
            let mut session = Session::new();
            for path in &mesh_paths {
                session.load(Path::new(path))?;
            }
            let report = global_align(&mut session, mesh_ids.as_deref(), &IcpOptions::default())?;

            std::fs::create_dir_all(output_dir).map_err(|e| {
                MeshToolError::Validation(format!("cannot create output directory {output_dir}: {e}"))
            })?;
            let mut outputs = Vec::new();
            for (id, path) in session.mesh_ids().into_iter().zip(&mesh_paths) {
                let name = Path::new(path)
                    .file_name()
                    .ok_or_else(|| {
                        MeshToolError::Validation(format!("mesh path has no filename: {path}"))
                    })?
                    .to_owned();
                let out = Path::new(output_dir).join(name);
                session.save(id, &out)?;
                outputs.push(out.to_string_lossy().into_owned());
            }
            Ok(json!({ "alignment": report.to_value(), "outputs": outputs }))
        }

        "batch_repair" => {
            let input_dir = require_str(args, "input_dir")?;
            let output_dir = require_str(args, "output_dir")?;
            let options = repair_options(args)?;
            let report = batch_repair(Path::new(input_dir), Path::new(output_dir), &options)?;
            Ok(json!({ "results": report.to_value() }))
        }

        "batch_align" => {
            let input_dir = require_str(args, "input_dir")?;
            let target_mesh = require_str(args, "target_mesh")?;
            let output_dir = require_str(args, "output_dir")?;
            let options = icp_options(args)?;
            let report = batch_align(
                Path::new(input_dir),
                Path::new(target_mesh),
                Path::new(output_dir),
                &options,
            )?;
            Ok(json!({ "results": report.to_value() }))
        }

        other => Err(MeshToolError::UnknownTool(other.to_string())),
    }
}

fn repair_options(args: &JsonObject) -> MeshToolResult<RepairOptions> {
    let defaults = RepairOptions::default();
    Ok(RepairOptions {
        max_hole_size: opt_u32(args, "max_hole_size")?.unwrap_or(defaults.max_hole_size),
        min_component_size: opt_u32(args, "min_component_size")?
            .unwrap_or(defaults.min_component_size),
        target_face_count: opt_u32(args, "target_face_count")?,
    })
}

fn icp_options(args: &JsonObject) -> MeshToolResult<IcpOptions> {
    let defaults = IcpOptions::default();
    Ok(IcpOptions {
        max_iterations: opt_u32(args, "max_iterations")?.unwrap_or(defaults.max_iterations),
        tolerance: opt_f64(args, "tolerance")?.unwrap_or(defaults.tolerance),
    })
}

// ============================================================================
// Argument extraction
// ============================================================================

fn require_str<'a>(args: &'a JsonObject, key: &str) -> MeshToolResult<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(MeshToolError::Validation(format!("'{key}' must be a string"))),
        None => Err(MeshToolError::Validation(format!(
            "missing required argument '{key}'"
        ))),
    }
}

fn require_str_array(args: &JsonObject, key: &str) -> MeshToolResult<Vec<String>> {
    let Some(value) = args.get(key) else {
        return Err(MeshToolError::Validation(format!(
            "missing required argument '{key}'"
        )));
    };
    let Some(items) = value.as_array() else {
        return Err(MeshToolError::Validation(format!(
            "'{key}' must be an array of strings"
        )));
    };
    items
        .iter()
        .map(|v| {
            v.as_str().map(str::to_owned).ok_or_else(|| {
                MeshToolError::Validation(format!("'{key}' must be an array of strings"))
            })
        })
        .collect()
}

fn require_points(args: &JsonObject, key: &str) -> MeshToolResult<Vec<[f64; 3]>> {
    let Some(value) = args.get(key) else {
        return Err(MeshToolError::Validation(format!(
            "missing required argument '{key}'"
        )));
    };
    let bad = || MeshToolError::Validation(format!("'{key}' must be an array of [x, y, z] triples"));
    let items = value.as_array().ok_or_else(bad)?;
    items
        .iter()
        .map(|triple| {
            let coords = triple.as_array().ok_or_else(bad)?;
            if coords.len() != 3 {
                return Err(bad());
            }
            let mut out = [0.0; 3];
            for (slot, coord) in out.iter_mut().zip(coords) {
                *slot = coord.as_f64().ok_or_else(bad)?;
            }
            Ok(out)
        })
        .collect()
}

fn opt_id_array(args: &JsonObject, key: &str) -> MeshToolResult<Option<Vec<u32>>> {
    let Some(value) = args.get(key) else {
        return Ok(None);
    };
    let bad = || MeshToolError::Validation(format!("'{key}' must be an array of mesh ids"));
    let items = value.as_array().ok_or_else(bad)?;
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(bad)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn opt_u32(args: &JsonObject, key: &str) -> MeshToolResult<Option<u32>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| {
                MeshToolError::Validation(format!("'{key}' must be a non-negative integer"))
            }),
    }
}

fn opt_f64(args: &JsonObject, key: &str) -> MeshToolResult<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| MeshToolError::Validation(format!("'{key}' must be a number"))),
    }
}

// ============================================================================
// ServerHandler
// ============================================================================

impl ServerHandler for MeshToolsService {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            next_cursor: None,
            tools: tool_catalog(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request.arguments.unwrap_or_default();
        info!("tool call: {}", request.name);

        // Failures become error payloads, never protocol errors: the client
        // should always get a readable result back.
        match dispatch(&request.name, &args) {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| result.to_string());
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(err) => {
                warn!("tool {} failed: {}", request.name, err);
                let payload = json!({ "error": err.to_string() });
                let text = serde_json::to_string_pretty(&payload)
                    .unwrap_or_else(|_| err.to_string());
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mesh-tools".to_string(),
                title: Some("Mesh Tools".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Mesh Tools MCP Server - load, repair, align, and batch-process 3D scan meshes"
                    .to_string(),
            ),
        }
    }
}
