use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use notebook::{Document, Output, mask_magics};

use super::{ExecutionFailure, Kernel, Namespace, EvalOutcome};
use crate::value::KernelValue;

const DRIVER: &str = include_str!("driver.py");

/// Characters of interpreter stderr kept when it dies without a result.
const STDERR_TAIL: usize = 2000;

/// Runs submissions with a local Python interpreter. Each call spawns a new
/// process, so every execution starts from an empty namespace.
#[derive(Debug, Clone)]
pub struct PythonKernel {
    program: String,
}

impl PythonKernel {
    pub fn new(program: impl Into<String>) -> Self {
        PythonKernel {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Write the driver and request to a scratch directory, run the interpreter
    /// and decode the response it leaves behind.
    fn invoke<T: DeserializeOwned>(
        &self,
        request: &Request<'_>,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<T, ExecutionFailure> {
        let scratch = tempfile::tempdir().map_err(|e| self.launch_error(e))?;
        let driver_path = scratch.path().join("nbgrade_driver.py");
        let request_path = scratch.path().join("request.json");
        let result_path = scratch.path().join("result.json");

        let request_json =
            serde_json::to_string(request).map_err(|e| ExecutionFailure::Protocol(e.to_string()))?;
        std::fs::write(&driver_path, DRIVER).map_err(|e| self.launch_error(e))?;
        std::fs::write(&request_path, request_json).map_err(|e| self.launch_error(e))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| self.launch_error(e))?;

        let start = Instant::now();
        let output = runtime.block_on(async {
            let child = Command::new(&self.program)
                .arg(&driver_path)
                .arg(&request_path)
                .arg(&result_path)
                .current_dir(workdir)
                .env("MPLBACKEND", "Agg")
                .env("PYTHONIOENCODING", "utf-8")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| self.launch_error(e))?;

            // Dropping the future on timeout kills the child.
            tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ExecutionFailure::Timeout(timeout))?
                .map_err(|e| self.launch_error(e))
        })?;

        debug!(
            program = %self.program,
            status = %output.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "kernel process finished"
        );

        let response = match std::fs::read_to_string(&result_path) {
            Ok(text) => text,
            Err(_) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = {
                    let chars: Vec<char> = stderr.trim().chars().collect();
                    chars[chars.len().saturating_sub(STDERR_TAIL)..].iter().collect()
                };
                warn!(status = %output.status, "kernel exited without writing a result");
                return Err(ExecutionFailure::Crashed {
                    status: output.status.to_string(),
                    stderr: tail,
                });
            }
        };

        serde_json::from_str(&response).map_err(|e| ExecutionFailure::Protocol(e.to_string()))
    }

    fn launch_error(&self, e: std::io::Error) -> ExecutionFailure {
        ExecutionFailure::Launch {
            program: self.program.clone(),
            message: e.to_string(),
        }
    }
}

impl Default for PythonKernel {
    fn default() -> Self {
        PythonKernel::new("python3")
    }
}

impl Kernel for PythonKernel {
    fn execute_notebook(
        &self,
        document: &Document,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<Document, ExecutionFailure> {
        let cells: Vec<CellSource> = document
            .code_cells()
            .map(|(index, cell)| CellSource {
                index,
                source: mask_magics(&cell.source),
            })
            .collect();
        debug!(cells = cells.len(), "executing notebook");

        let response: NotebookResponse =
            self.invoke(&Request::Notebook { cells }, workdir, timeout)?;

        let mut executed = document.clone();
        for run in response.cells {
            let cell = executed.cells.get_mut(run.index).ok_or_else(|| {
                ExecutionFailure::Protocol(format!("kernel reported unknown cell {}", run.index))
            })?;
            cell.attach_outputs(run.execution_count, run.outputs);
        }

        match response.error {
            Some(fault) => {
                warn!(cell = fault.cell, ename = %fault.ename, "notebook cell failed");
                Err(ExecutionFailure::Cell {
                    cell: fault.cell,
                    ename: fault.ename,
                    evalue: fault.evalue,
                    traceback: fault.traceback,
                })
            }
            None => Ok(executed),
        }
    }

    fn execute_source(
        &self,
        source: &str,
        exprs: &[String],
        workdir: &Path,
        timeout: Duration,
    ) -> Result<Namespace, ExecutionFailure> {
        let masked = mask_magics(source);
        let response: SourceResponse = self.invoke(
            &Request::Source {
                source: &masked,
                exprs,
            },
            workdir,
            timeout,
        )?;

        match response.error {
            Some(fault) => {
                warn!(line = fault.line, ename = %fault.ename, "source execution failed");
                Err(ExecutionFailure::Statement {
                    line: fault.line,
                    statement: fault.statement,
                    ename: fault.ename,
                    evalue: fault.evalue,
                    traceback: fault.traceback,
                })
            }
            None => Ok(Namespace {
                bindings: response.bindings,
                exprs: response.exprs,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver protocol
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum Request<'a> {
    Notebook { cells: Vec<CellSource> },
    Source { source: &'a str, exprs: &'a [String] },
}

#[derive(Serialize)]
struct CellSource {
    index: usize,
    source: String,
}

#[derive(Deserialize)]
struct NotebookResponse {
    cells: Vec<CellRun>,
    error: Option<CellFault>,
}

#[derive(Deserialize)]
struct CellRun {
    index: usize,
    execution_count: Option<u64>,
    outputs: Vec<Output>,
}

#[derive(Deserialize)]
struct CellFault {
    cell: usize,
    ename: String,
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

#[derive(Deserialize)]
struct SourceResponse {
    #[serde(default)]
    bindings: BTreeMap<String, KernelValue>,
    #[serde(default)]
    exprs: BTreeMap<String, EvalOutcome>,
    error: Option<StatementFault>,
}

#[derive(Deserialize)]
struct StatementFault {
    line: usize,
    statement: String,
    ename: String,
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encoding() {
        let exprs = vec!["x + 1".to_string()];
        let json = serde_json::to_value(Request::Source {
            source: "x = 1",
            exprs: &exprs,
        })
        .unwrap();
        assert_eq!(json["mode"], "source");
        assert_eq!(json["exprs"][0], "x + 1");

        let json = serde_json::to_value(Request::Notebook {
            cells: vec![CellSource {
                index: 3,
                source: "print(1)".into(),
            }],
        })
        .unwrap();
        assert_eq!(json["mode"], "notebook");
        assert_eq!(json["cells"][0]["index"], 3);
    }

    #[test]
    fn missing_interpreter_is_launch_failure() {
        let kernel = PythonKernel::new("nbgrade-no-such-python");
        let dir = tempfile::tempdir().unwrap();
        let err = kernel
            .execute_source("x = 1", &[], dir.path(), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, ExecutionFailure::Launch { .. }), "got {:?}", err);
    }

    #[test]
    fn driver_is_embedded() {
        assert!(DRIVER.contains("def run_notebook"));
        assert!(DRIVER.contains("def run_source"));
    }
}
