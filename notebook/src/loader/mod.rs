pub mod error;

pub use error::LoadError;

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::document::Document;
use error::line_col_to_offset;

/// Read and parse a notebook file.
pub fn load(path: &Path) -> Result<Document, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document = parse(&text)?;
    debug!(
        path = %path.display(),
        cells = document.cells.len(),
        "loaded notebook"
    );
    Ok(document)
}

/// Parse notebook JSON text. nbformat 3 documents are upconverted to the 4 layout.
pub fn parse(text: &str) -> Result<Document, LoadError> {
    let text = text.trim_start_matches('\u{feff}'); // strip BOM

    let mut value: Value = serde_json::from_str(text).map_err(|e| {
        let offset = line_col_to_offset(text, e.line(), e.column());
        LoadError::Json {
            message: e.to_string(),
            span: offset..(offset + 1).min(text.len()),
        }
    })?;

    let Some(root) = value.as_object_mut() else {
        return Err(LoadError::Format("top-level value is not an object".into()));
    };

    let version = root.get("nbformat").and_then(Value::as_u64);
    match version {
        Some(4) => {}
        Some(3) => upconvert_v3(root)?,
        Some(other) => return Err(LoadError::UnsupportedVersion(other)),
        None if root.contains_key("cells") => {
            root.insert("nbformat".into(), Value::from(4));
        }
        None => return Err(LoadError::Format("missing 'nbformat' and 'cells'".into())),
    }

    if !root.get("cells").is_some_and(Value::is_array) {
        return Err(LoadError::Format("'cells' must be a list".into()));
    }

    serde_json::from_value(value).map_err(|e| LoadError::Format(e.to_string()))
}

/// Flatten nbformat 3 worksheets into a v4 cell list.
/// Old outputs are dropped; they are regenerated when the notebook is executed.
fn upconvert_v3(root: &mut Map<String, Value>) -> Result<(), LoadError> {
    let worksheets = match root.remove("worksheets") {
        Some(Value::Array(sheets)) => sheets,
        Some(_) => return Err(LoadError::Format("'worksheets' must be a list".into())),
        None => Vec::new(),
    };

    let mut cells = Vec::new();
    for sheet in worksheets {
        let Some(Value::Array(sheet_cells)) = sheet.get("cells").cloned() else {
            continue;
        };
        for cell in sheet_cells {
            cells.push(upconvert_v3_cell(cell)?);
        }
    }

    debug!(cells = cells.len(), "upconverted nbformat 3 notebook");
    root.insert("cells".into(), Value::Array(cells));
    root.insert("nbformat".into(), Value::from(4));
    root.insert("nbformat_minor".into(), Value::from(0));
    Ok(())
}

fn upconvert_v3_cell(cell: Value) -> Result<Value, LoadError> {
    let Value::Object(mut cell) = cell else {
        return Err(LoadError::Format("cell is not an object".into()));
    };
    let kind = cell
        .get("cell_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = cell.remove("metadata").unwrap_or_else(|| Value::Object(Map::new()));

    let mut out = Map::new();
    match kind.as_str() {
        "code" => {
            out.insert("cell_type".into(), Value::from("code"));
            out.insert(
                "source".into(),
                cell.remove("input").unwrap_or_else(|| Value::from("")),
            );
            out.insert(
                "execution_count".into(),
                cell.remove("prompt_number").unwrap_or(Value::Null),
            );
            out.insert("outputs".into(), Value::Array(Vec::new()));
        }
        "heading" => {
            let level = cell.get("level").and_then(Value::as_u64).unwrap_or(1) as usize;
            let text = source_text(cell.get("source"));
            out.insert("cell_type".into(), Value::from("markdown"));
            out.insert(
                "source".into(),
                Value::from(format!("{} {}", "#".repeat(level.clamp(1, 6)), text)),
            );
        }
        "markdown" | "raw" => {
            out.insert("cell_type".into(), Value::from(kind.as_str()));
            out.insert(
                "source".into(),
                cell.remove("source").unwrap_or_else(|| Value::from("")),
            );
        }
        other => {
            return Err(LoadError::Format(format!("unknown cell type '{}'", other)));
        }
    }
    out.insert("metadata".into(), metadata);
    Ok(Value::Object(out))
}

fn source_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}
