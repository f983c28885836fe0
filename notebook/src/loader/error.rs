use std::io;
use std::ops::Range;
use std::path::PathBuf;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use thiserror::Error;

/// Reasons a submission could not be turned into a [`Document`](crate::Document).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not JSON at all. `span` is a byte range into the file text.
    #[error("notebook is not valid JSON: {message}")]
    Json { message: String, span: Range<usize> },

    #[error("unsupported nbformat version {0} (expected 3 or 4)")]
    UnsupportedVersion(u64),

    /// JSON, but not shaped like a notebook.
    #[error("not a notebook: {0}")]
    Format(String),
}

impl LoadError {
    /// True when the artifact is simply absent, as opposed to unreadable or malformed.
    pub fn is_missing(&self) -> bool {
        matches!(self, LoadError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        let diagnostic = Diagnostic::error().with_message(self.to_string());
        match self {
            LoadError::Json { span, .. } => diagnostic
                .with_labels(vec![Label::primary(file_id, span.clone())])
                .with_notes(vec![
                    "save the submission from Jupyter or Colab as an .ipynb file".to_string(),
                ]),
            LoadError::Io { .. } if self.is_missing() => diagnostic.with_notes(vec![
                "check that the notebook was uploaded with the expected name".to_string(),
            ]),
            _ => diagnostic,
        }
    }
}

/// Convert a 1-based line/column pair (as reported by serde_json) to a byte offset.
pub(crate) fn line_col_to_offset(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}
