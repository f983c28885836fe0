use thiserror::Error;

use notebook::LoadError;

use crate::rubric::RubricError;

/// Failures that abort a whole grading run. Nothing else does.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("submission could not be loaded: {0}")]
    Load(#[from] LoadError),

    #[error("rubric error: {0}")]
    Rubric(#[from] RubricError),
}

impl GradeError {
    pub fn load_error(&self) -> Option<&LoadError> {
        match self {
            GradeError::Load(e) => Some(e),
            GradeError::Rubric(_) => None,
        }
    }
}

/// An unexpected problem inside a check's own logic. Caught at the check
/// boundary and reported as a failing result; never aborts sibling checks.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("python grammar unavailable: {0}")]
    Grammar(String),

    #[error("check panicked: {0}")]
    Panicked(String),
}
