use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A notebook: an ordered sequence of cells plus notebook-level metadata.
/// Cell order is the order found in the source file and is never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub nbformat: u64,
    #[serde(default)]
    pub nbformat_minor: u64,
}

impl Document {
    pub fn empty() -> Self {
        Document {
            cells: Vec::new(),
            metadata: Map::new(),
            nbformat: 4,
            nbformat_minor: 5,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Code cells paired with their index in the document.
    pub fn code_cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_code())
    }

    /// Serialize back to nbformat JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "cell_type")]
    pub kind: CellKind,
    #[serde(deserialize_with = "multiline")]
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Only code cells carry outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Output>>,
    /// Everything else (`id`, `execution_count`, `attachments`) round-trips untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn code(source: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("execution_count".to_string(), Value::Null);
        Cell {
            kind: CellKind::Code,
            source: source.into(),
            metadata: Map::new(),
            outputs: Some(Vec::new()),
            extra,
        }
    }

    pub fn markdown(source: impl Into<String>) -> Self {
        Cell {
            kind: CellKind::Markdown,
            source: source.into(),
            metadata: Map::new(),
            outputs: None,
            extra: Map::new(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.kind == CellKind::Code
    }

    pub fn execution_count(&self) -> Option<u64> {
        self.extra.get("execution_count").and_then(Value::as_u64)
    }

    /// Replace this cell's outputs with the result of an execution.
    pub fn attach_outputs(&mut self, execution_count: Option<u64>, outputs: Vec<Output>) {
        self.extra.insert(
            "execution_count".to_string(),
            execution_count.map_or(Value::Null, Value::from),
        );
        self.outputs = Some(outputs);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Markdown,
    Raw,
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellKind::Code => write!(f, "code"),
            CellKind::Markdown => write!(f, "markdown"),
            CellKind::Raw => write!(f, "raw"),
        }
    }
}

/// A cell output in nbformat 4 shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        #[serde(deserialize_with = "multiline")]
        text: String,
    },
    ExecuteResult {
        execution_count: Option<u64>,
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    DisplayData {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Output {
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }
}

/// nbformat stores multi-line strings either whole or as a list of lines.
fn multiline<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Whole(String),
        Lines(Vec<String>),
    }

    Ok(match Text::deserialize(deserializer)? {
        Text::Whole(s) => s,
        Text::Lines(lines) => lines.concat(),
    })
}
