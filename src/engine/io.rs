//! Mesh file I/O for PLY, OBJ, and STL.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Point3;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use tracing::{debug, info};

use super::{EngineError, TriMesh};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Ply,
    Obj,
    Stl,
}

impl MeshFormat {
    /// Detect format from file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .and_then(|ext| match ext.as_str() {
                "ply" => Some(MeshFormat::Ply),
                "obj" => Some(MeshFormat::Obj),
                "stl" => Some(MeshFormat::Stl),
                _ => None,
            })
    }
}

/// File extensions accepted by [`load_mesh`], without the leading dot.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["ply", "obj", "stl"];

fn unsupported(path: &Path) -> EngineError {
    EngineError::UnsupportedFormat {
        extension: path.extension().and_then(|e| e.to_str()).map(String::from),
    }
}

/// Load a mesh from file, auto-detecting the format from the extension.
pub fn load_mesh(path: &Path) -> Result<TriMesh, EngineError> {
    let format = MeshFormat::from_path(path).ok_or_else(|| unsupported(path))?;

    let mesh = match format {
        MeshFormat::Ply => load_ply(path)?,
        MeshFormat::Obj => load_obj(path)?,
        MeshFormat::Stl => load_stl(path)?,
    };

    if mesh.positions.is_empty() {
        return Err(EngineError::EmptyMesh {
            details: format!("{} contains no vertices", path.display()),
        });
    }

    info!(
        "loaded {}: {} vertices, {} faces",
        path.display(),
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(mesh)
}

/// Save a mesh to file, auto-detecting the format from the extension.
pub fn save_mesh(mesh: &TriMesh, path: &Path) -> Result<(), EngineError> {
    let format = MeshFormat::from_path(path).ok_or_else(|| unsupported(path))?;

    match format {
        MeshFormat::Ply => save_ply(mesh, path)?,
        MeshFormat::Obj => save_obj(mesh, path)?,
        MeshFormat::Stl => save_stl(mesh, path)?,
    }

    info!(
        "saved {}: {} vertices, {} faces",
        path.display(),
        mesh.vertex_count(),
        mesh.face_count()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// PLY
// ---------------------------------------------------------------------------

fn load_ply(path: &Path) -> Result<TriMesh, EngineError> {
    let file = File::open(path).map_err(|e| EngineError::IoRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<DefaultElement>::new();
    let header = parser.read_header(&mut reader).map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        details: format!("bad PLY header: {e}"),
    })?;
    let payload = parser
        .read_payload(&mut reader, &header)
        .map_err(|e| EngineError::Parse {
            path: path.to_path_buf(),
            details: format!("bad PLY payload: {e}"),
        })?;

    let mut mesh = TriMesh::new();

    if let Some(vertices) = payload.get("vertex") {
        mesh.positions.reserve(vertices.len());
        for element in vertices {
            let x = float_property(element, "x");
            let y = float_property(element, "y");
            let z = float_property(element, "z");
            match (x, y, z) {
                (Some(x), Some(y), Some(z)) => mesh.positions.push(Point3::new(x, y, z)),
                _ => {
                    return Err(EngineError::Parse {
                        path: path.to_path_buf(),
                        details: "vertex element missing x/y/z properties".to_string(),
                    })
                }
            }
        }
    }

    if let Some(faces) = payload.get("face") {
        mesh.faces.reserve(faces.len());
        for element in faces {
            let indices = index_list(element);
            if indices.len() >= 3 {
                // Fan-triangulate polygons
                for i in 1..indices.len() - 1 {
                    mesh.faces
                        .push([indices[0] as u32, indices[i] as u32, indices[i + 1] as u32]);
                }
            }
        }
    }

    debug!("PLY payload: {} vertices, {} faces", mesh.vertex_count(), mesh.face_count());
    Ok(mesh)
}

fn float_property(element: &DefaultElement, key: &str) -> Option<f64> {
    match element.get(key)? {
        Property::Float(v) => Some(f64::from(*v)),
        Property::Double(v) => Some(*v),
        _ => None,
    }
}

fn index_list(element: &DefaultElement) -> Vec<usize> {
    for key in &["vertex_indices", "vertex_index"] {
        if let Some(prop) = element.get(*key) {
            return match prop {
                Property::ListInt(v) => v.iter().map(|&i| i as usize).collect(),
                Property::ListUInt(v) => v.iter().map(|&i| i as usize).collect(),
                Property::ListChar(v) => v.iter().map(|&i| i as usize).collect(),
                Property::ListUChar(v) => v.iter().map(|&i| i as usize).collect(),
                Property::ListShort(v) => v.iter().map(|&i| i as usize).collect(),
                Property::ListUShort(v) => v.iter().map(|&i| i as usize).collect(),
                _ => continue,
            };
        }
    }
    Vec::new()
}

/// Write ASCII PLY. The header is emitted by hand so the output stays stable
/// across ply-rs versions.
fn save_ply(mesh: &TriMesh, path: &Path) -> Result<(), EngineError> {
    let file = File::create(path).map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut w = BufWriter::new(file);

    let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(w, "ply")?;
        writeln!(w, "format ascii 1.0")?;
        writeln!(w, "element vertex {}", mesh.positions.len())?;
        writeln!(w, "property double x")?;
        writeln!(w, "property double y")?;
        writeln!(w, "property double z")?;
        writeln!(w, "element face {}", mesh.faces.len())?;
        writeln!(w, "property list uchar int vertex_indices")?;
        writeln!(w, "end_header")?;
        for p in &mesh.positions {
            writeln!(w, "{} {} {}", p.x, p.y, p.z)?;
        }
        for &[i0, i1, i2] in &mesh.faces {
            writeln!(w, "3 {i0} {i1} {i2}")?;
        }
        w.flush()
    };

    write(&mut w).map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// OBJ
// ---------------------------------------------------------------------------

fn load_obj(path: &Path) -> Result<TriMesh, EngineError> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;

    let mut mesh = TriMesh::new();
    let mut vertex_offset = 0u32;

    for model in &models {
        let m = &model.mesh;
        for chunk in m.positions.chunks(3) {
            if chunk.len() == 3 {
                mesh.positions.push(Point3::new(
                    f64::from(chunk[0]),
                    f64::from(chunk[1]),
                    f64::from(chunk[2]),
                ));
            }
        }
        for chunk in m.indices.chunks(3) {
            if chunk.len() == 3 {
                mesh.faces.push([
                    chunk[0] + vertex_offset,
                    chunk[1] + vertex_offset,
                    chunk[2] + vertex_offset,
                ]);
            }
        }
        vertex_offset = mesh.positions.len() as u32;
    }

    debug!("OBJ: {} models merged", models.len());
    Ok(mesh)
}

fn save_obj(mesh: &TriMesh, path: &Path) -> Result<(), EngineError> {
    let file = File::create(path).map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut w = BufWriter::new(file);

    let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
        for p in &mesh.positions {
            writeln!(w, "v {} {} {}", p.x, p.y, p.z)?;
        }
        // OBJ indices are 1-based
        for &[i0, i1, i2] in &mesh.faces {
            writeln!(w, "f {} {} {}", i0 + 1, i1 + 1, i2 + 1)?;
        }
        w.flush()
    };

    write(&mut w).map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// STL
// ---------------------------------------------------------------------------

fn load_stl(path: &Path) -> Result<TriMesh, EngineError> {
    let file = File::open(path).map_err(|e| EngineError::IoRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let stl = stl_io::read_stl(&mut reader).map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;

    let mut mesh = TriMesh::with_capacity(stl.vertices.len(), stl.faces.len());
    // stl_io::Vertex is a Vector<f32> newtype over [f32; 3]
    for v in &stl.vertices {
        mesh.positions.push(Point3::new(
            f64::from(v.0[0]),
            f64::from(v.0[1]),
            f64::from(v.0[2]),
        ));
    }
    for face in &stl.faces {
        let indices = [
            face.vertices[0] as u32,
            face.vertices[1] as u32,
            face.vertices[2] as u32,
        ];
        // stl_io welding can leave degenerate faces behind
        if indices[0] != indices[1] && indices[1] != indices[2] && indices[0] != indices[2] {
            mesh.faces.push(indices);
        }
    }

    Ok(mesh)
}

fn save_stl(mesh: &TriMesh, path: &Path) -> Result<(), EngineError> {
    let file = File::create(path).map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);

    let triangles: Vec<stl_io::Triangle> = mesh
        .faces
        .iter()
        .map(|&[i0, i1, i2]| {
            let v0 = &mesh.positions[i0 as usize];
            let v1 = &mesh.positions[i1 as usize];
            let v2 = &mesh.positions[i2 as usize];
            stl_io::Triangle {
                normal: stl_io::Normal::new([0.0, 0.0, 0.0]), // readers recompute
                vertices: [
                    stl_io::Vertex::new([v0.x as f32, v0.y as f32, v0.z as f32]),
                    stl_io::Vertex::new([v1.x as f32, v1.y as f32, v1.z as f32]),
                    stl_io::Vertex::new([v2.x as f32, v2.y as f32, v2.z as f32]),
                ],
            }
        })
        .collect();

    stl_io::write_stl(&mut writer, triangles.iter()).map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: std::io::Error::other(e.to_string()),
    })?;

    writer.flush().map_err(|e| EngineError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}
