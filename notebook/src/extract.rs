use crate::document::Document;

/// Separator placed between consecutive code cells.
pub const CELL_SEPARATOR: &str = "\n\n";

/// Concatenate the source of every code cell, in document order.
/// A document without code cells yields an empty string.
pub fn extract(document: &Document) -> String {
    document
        .code_cells()
        .map(|(_, cell)| cell.source.as_str())
        .collect::<Vec<_>>()
        .join(CELL_SEPARATOR)
}

/// Blank out IPython shell escapes and magics (`!pip install ...`, `%matplotlib inline`)
/// so the remaining text is plain Python. Byte offsets and line numbers are preserved.
pub fn mask_magics(source: &str) -> String {
    source
        .split_inclusive('\n')
        .map(|line| {
            let body = line.trim_start();
            if body.starts_with('!') || body.starts_with('%') {
                line.chars()
                    .map(|c| {
                        if c == '\n' || c == '\r' {
                            c.to_string()
                        } else {
                            " ".repeat(c.len_utf8())
                        }
                    })
                    .collect()
            } else {
                line.to_string()
            }
        })
        .collect()
}
