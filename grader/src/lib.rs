pub mod error;
pub mod kernel;
pub mod pattern;
pub mod report;
pub mod rubric;
pub mod runner;
pub mod syntax;
pub mod value;

pub use error::{CheckError, GradeError};
pub use kernel::{ExecutionFailure, Kernel, Namespace, EvalOutcome, PythonKernel};
pub use report::{CheckResult, RubricReport};
pub use rubric::{Rubric, RubricError};
pub use runner::{Grader, GradingRun, RunState};
pub use value::KernelValue;
