//! MCP (Model Context Protocol) server implementation
//!
//! This module provides a stdio-based MCP server using the official `rmcp`
//! SDK. It exposes mesh loading, repair, alignment, and batch processing to
//! AI clients.

mod server;

pub use server::MeshToolsService;
