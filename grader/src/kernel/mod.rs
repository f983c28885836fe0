pub mod python;

pub use python::PythonKernel;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use notebook::Document;

use crate::value::KernelValue;

/// Default budget for one execution, in either mode.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Something that can run submitted code. Every call must start from a fresh
/// interpreter state; nothing carries over between calls.
pub trait Kernel {
    /// Run the document's code cells in order. Returns a copy of the document
    /// with outputs attached, or the first cell failure.
    fn execute_notebook(
        &self,
        document: &Document,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<Document, ExecutionFailure>;

    /// Run `source` as one module in a fresh namespace, then evaluate each
    /// expression against the resulting top-level bindings.
    fn execute_source(
        &self,
        source: &str,
        exprs: &[String],
        workdir: &Path,
        timeout: Duration,
    ) -> Result<Namespace, ExecutionFailure>;
}

/// Top-level bindings left behind by a successful source execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub bindings: BTreeMap<String, KernelValue>,
    #[serde(default)]
    pub exprs: BTreeMap<String, EvalOutcome>,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Option<&KernelValue> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn evaluated(&self, expr: &str) -> Option<&EvalOutcome> {
        self.exprs.get(expr)
    }
}

/// Result of evaluating one expression after execution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvalOutcome {
    Ok { value: KernelValue },
    Error { ename: String, evalue: String },
}

/// Why an execution produced no usable result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionFailure {
    /// `cell` is the zero-based document index; messages show it one-based.
    #[error("cell {} raised {ename}: {evalue}", .cell + 1)]
    Cell {
        cell: usize,
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },

    #[error("{ename} at line {line} (`{statement}`): {evalue}")]
    Statement {
        line: usize,
        statement: String,
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },

    #[error("execution timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("cannot start interpreter '{program}': {message}")]
    Launch { program: String, message: String },

    #[error("interpreter exited without a result ({status}): {stderr}")]
    Crashed { status: String, stderr: String },

    #[error("unreadable kernel response: {0}")]
    Protocol(String),
}

impl ExecutionFailure {
    /// Traceback lines, when the failure came from submitted code.
    pub fn traceback(&self) -> &[String] {
        match self {
            ExecutionFailure::Cell { traceback, .. }
            | ExecutionFailure::Statement { traceback, .. } => traceback,
            _ => &[],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFailure::Timeout(_))
    }
}
