//! Mesh Tools
//!
//! A control layer for 3D scan processing: load and save triangle meshes,
//! repair common scan defects, rigidly align scans with ICP, and batch the
//! whole thing over directories. Everything is exposed to AI assistants as
//! an MCP (Model Context Protocol) stdio server.
//!
//! The crate is layered:
//!
//! - [`engine`]: the [`engine::MeshEngine`] trait plus the built-in
//!   [`engine::NativeEngine`] backend with file IO and geometry filters
//! - [`session`]: stable mesh ids over one engine's working set
//! - [`repair`] and [`align`]: the repair pipeline and alignment operations
//! - [`batch`]: directory-level orchestration that continues past failures
//! - [`mcp`]: the MCP tool adapter and server
//!
//! # Example
//!
//! ```no_run
//! use mesh_tools::{repair, RepairOptions, Session};
//! use std::path::Path;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new();
//! let id = session.load(Path::new("scan.ply"))?;
//! let report = repair::repair(&mut session, id, &RepairOptions::default())?;
//! println!("closed holes: {:?}", report.hole_filling);
//! session.save(id, Path::new("scan_repaired.ply"))?;
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod batch;
pub mod engine;
pub mod mcp;
pub mod repair;
pub mod session;
pub mod types;

pub use align::{GlobalAlignReport, IcpOptions, IcpReport, PointAlignReport};
pub use batch::{BatchOutcome, BatchReport};
pub use repair::{RepairOptions, RepairReport};
pub use session::Session;
pub use types::{BoundingBox, MeshId, MeshInfo, MeshToolError, MeshToolResult};
