//! Batch orchestration over directories of mesh files.
//!
//! A batch run enumerates every supported mesh file in an input directory in
//! sorted filename order, runs an operation on each, and writes results to an
//! output directory under the same filename. A failure on one file is
//! recorded and the run continues; the orchestrator itself only fails when
//! the directories cannot be used at all.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::align::{align_icp, IcpOptions};
use crate::engine::SUPPORTED_EXTENSIONS;
use crate::repair::{repair, RepairOptions};
use crate::session::Session;
use crate::types::{MeshId, MeshToolError, MeshToolResult};

/// Per-file outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Success {
        input: PathBuf,
        output: PathBuf,
        result: Value,
    },
    Failure {
        input: PathBuf,
        error: String,
    },
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success { .. })
    }
}

/// Outcome of a whole batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Repair every mesh file in `input_dir`, writing repaired meshes to
/// `output_dir` under the same filename. Each file gets a fresh session, so
/// one corrupt input cannot poison the rest of the run.
pub fn batch_repair(
    input_dir: &Path,
    output_dir: &Path,
    options: &RepairOptions,
) -> MeshToolResult<BatchReport> {
    let files = mesh_files(input_dir)?;
    ensure_output_dir(output_dir)?;
    info!(
        "batch repair: {} files from {} to {}",
        files.len(),
        input_dir.display(),
        output_dir.display()
    );

    let outcomes = files
        .into_iter()
        .map(|input| {
            let output = output_dir.join(file_name(&input));
            let mut session = Session::new();
            run_one(&mut session, &input, &output, |session, id| {
                repair(session, id, options).map(|report| report.to_value())
            })
        })
        .collect();
    Ok(summarize(outcomes))
}

/// Align every mesh file in `input_dir` onto `target_path`, writing aligned
/// meshes to `output_dir` under the same filename.
///
/// The target is loaded once into a shared session; if the target itself
/// lives in `input_dir` it is skipped as an input. A corrupt input only adds
/// its own failure record since each alignment touches only its own mesh.
pub fn batch_align(
    input_dir: &Path,
    target_path: &Path,
    output_dir: &Path,
    options: &IcpOptions,
) -> MeshToolResult<BatchReport> {
    let files = mesh_files(input_dir)?;
    ensure_output_dir(output_dir)?;

    let mut session = Session::new();
    let target_id = session.load(target_path)?;
    info!(
        "batch align: {} files from {} onto {}",
        files.len(),
        input_dir.display(),
        target_path.display()
    );

    let outcomes = files
        .into_iter()
        .filter(|input| !same_file(input, target_path))
        .map(|input| {
            let output = output_dir.join(file_name(&input));
            run_one(&mut session, &input, &output, |session, id| {
                align_icp(session, id, target_id, options).map(|report| report.to_value())
            })
        })
        .collect();
    Ok(summarize(outcomes))
}

/// Load one file, run the operation, save the result. Any error becomes a
/// failure record for this file.
fn run_one(
    session: &mut Session,
    input: &Path,
    output: &Path,
    mut operation: impl FnMut(&mut Session, MeshId) -> MeshToolResult<Value>,
) -> BatchOutcome {
    let attempt = (|| {
        let id = session.load(input)?;
        let result = operation(session, id)?;
        session.save(id, output)?;
        Ok::<Value, MeshToolError>(result)
    })();

    match attempt {
        Ok(result) => BatchOutcome::Success {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            result,
        },
        Err(err) => {
            warn!("batch: {} failed: {}", input.display(), err);
            BatchOutcome::Failure {
                input: input.to_path_buf(),
                error: err.to_string(),
            }
        }
    }
}

/// Supported mesh files directly inside `dir`, sorted by filename.
fn mesh_files(dir: &Path) -> MeshToolResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        MeshToolError::Validation(format!("cannot read input directory {}: {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            MeshToolError::Validation(format!(
                "cannot read input directory {}: {e}",
                dir.display()
            ))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()));
        if supported {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn ensure_output_dir(dir: &Path) -> MeshToolResult<()> {
    fs::create_dir_all(dir).map_err(|e| {
        MeshToolError::Validation(format!(
            "cannot create output directory {}: {e}",
            dir.display()
        ))
    })
}

fn file_name(path: &Path) -> std::ffi::OsString {
    path.file_name().map(|n| n.to_os_string()).unwrap_or_default()
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

fn summarize(outcomes: Vec<BatchOutcome>) -> BatchReport {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = outcomes.len() - succeeded;
    info!("batch finished: {} ok, {} failed", succeeded, failed);
    BatchReport {
        processed: outcomes.len(),
        succeeded,
        failed,
        outcomes,
    }
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

    fn write_cube(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), CUBE_PLY).unwrap();
    }

    #[test]
    fn batch_repair_continues_past_a_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir(&input).unwrap();

        write_cube(&input, "a.ply");
        std::fs::write(input.join("b.ply"), "not a mesh at all").unwrap();
        write_cube(&input, "c.ply");
        std::fs::write(input.join("notes.txt"), "ignored").unwrap();

        let options = RepairOptions {
            min_component_size: 2,
            ..RepairOptions::default()
        };
        let report = batch_repair(&input, &output, &options).unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);

        // Sorted filename order, failure in the middle
        assert!(report.outcomes[0].is_success());
        assert!(!report.outcomes[1].is_success());
        assert!(report.outcomes[2].is_success());

        assert!(output.join("a.ply").is_file());
        assert!(!output.join("b.ply").exists());
        assert!(output.join("c.ply").is_file());
    }

    #[test]
    fn batch_repair_of_an_empty_directory_is_an_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir(&input).unwrap();

        let report = batch_repair(&input, &output, &RepairOptions::default()).unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.outcomes.is_empty());
        assert!(output.is_dir());
    }

    #[test]
    fn missing_input_directory_fails_the_whole_run() {
        let dir = tempfile::tempdir().unwrap();
        let err = batch_repair(
            &dir.path().join("nope"),
            &dir.path().join("out"),
            &RepairOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MeshToolError::Validation(_)));
    }

    #[test]
    fn batch_align_skips_the_target_inside_the_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir(&input).unwrap();

        write_cube(&input, "scan1.ply");
        write_cube(&input, "scan2.ply");
        write_cube(&input, "target.ply");

        let report = batch_align(
            &input,
            &input.join("target.ply"),
            &output,
            &IcpOptions::default(),
        )
        .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.succeeded, 2);
        assert!(output.join("scan1.ply").is_file());
        assert!(!output.join("target.ply").exists());
    }

    #[test]
    fn batch_align_records_a_missing_target_as_a_run_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir(&input).unwrap();
        write_cube(&input, "scan1.ply");

        let err = batch_align(
            &input,
            &dir.path().join("target.ply"),
            &dir.path().join("out"),
            &IcpOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MeshToolError::Load { .. }));
    }

    #[test]
    fn outcome_json_is_tagged_by_status() {
        let outcome = BatchOutcome::Failure {
            input: PathBuf::from("x.ply"),
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"], "boom");
    }
}
