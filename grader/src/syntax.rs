use std::ops::Range;

use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

/// Why a source text could not be indexed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    /// The text is not valid Python. Positions are 1-based; `span` is a byte range.
    #[error("syntax error at line {line}, column {column}: {detail}")]
    Invalid {
        line: usize,
        column: usize,
        span: Range<usize>,
        detail: String,
    },

    #[error("python grammar unavailable: {0}")]
    Grammar(String),
}

/// Structural facts gathered from one parse of the extracted source.
#[derive(Debug, Clone, Default)]
pub struct SyntaxIndex {
    imports: Vec<String>,
}

impl SyntaxIndex {
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| SyntaxError::Grammar(e.to_string()))?;
        let tree: Tree = parser
            .parse(source, None)
            .ok_or_else(|| SyntaxError::Grammar("parser returned no tree".into()))?;

        let root = tree.root_node();
        if root.has_error() {
            if let Some(fault) = first_fault(root) {
                return Err(describe_fault(fault, source));
            }
        }

        let mut imports = Vec::new();
        let mut legacy = None;
        walk(root, |node| {
            if legacy.is_none() {
                legacy = python2_only(node).map(|detail| invalid_at(node, detail.to_string()));
            }
            collect_import(node, source.as_bytes(), &mut imports);
        });
        match legacy {
            Some(fault) => Err(fault),
            None => Ok(SyntaxIndex { imports }),
        }
    }

    /// Every `import X` and `from X import ...` target, in source order.
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// True when `module` is imported directly or through one of its submodules
    /// (`import matplotlib.pyplot` binds `matplotlib` as well).
    pub fn imports_module(&self, module: &str) -> bool {
        self.imports.iter().any(|name| {
            name == module
                || name
                    .strip_prefix(module)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

fn collect_import(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let target = if name.kind() == "aliased_import" {
                    name.child_by_field_name("name")
                } else {
                    Some(name)
                };
                if let Some(text) = target.and_then(|t| dotted_text(t, source)) {
                    out.push(text);
                }
            }
        }
        "import_from_statement" => {
            let Some(module) = node.child_by_field_name("module_name") else {
                return;
            };
            // `from . import x` has no module name; `from .pkg import x` names `pkg`.
            let target = if module.kind() == "relative_import" {
                let mut cursor = module.walk();
                let dotted = module
                    .named_children(&mut cursor)
                    .find(|c| c.kind() == "dotted_name");
                dotted
            } else {
                Some(module)
            };
            if let Some(text) = target.and_then(|t| dotted_text(t, source)) {
                out.push(text);
            }
        }
        "future_import_statement" => out.push("__future__".to_string()),
        _ => {}
    }
}

fn dotted_text(node: Node<'_>, source: &[u8]) -> Option<String> {
    let text = node.utf8_text(source).ok()?;
    Some(text.chars().filter(|c| !c.is_whitespace()).collect())
}

/// Pre-order traversal of every node under `root`.
fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// First ERROR or MISSING node in document order, descending only into
/// subtrees that contain one.
fn first_fault(root: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

/// Statements the grammar keeps for Python 2 sources but Python 3 rejects.
fn python2_only(node: Node<'_>) -> Option<&'static str> {
    match node.kind() {
        "print_statement" => Some("`print` statement is Python 2 syntax, call print(...)"),
        "exec_statement" => Some("`exec` statement is Python 2 syntax, call exec(...)"),
        "<>" if !node.is_named() => Some("`<>` is Python 2 syntax, use `!=`"),
        _ => None,
    }
}

fn invalid_at(node: Node<'_>, detail: String) -> SyntaxError {
    let position = node.start_position();
    SyntaxError::Invalid {
        line: position.row + 1,
        column: position.column + 1,
        span: node.start_byte()..node.end_byte(),
        detail,
    }
}

fn describe_fault(node: Node<'_>, source: &str) -> SyntaxError {
    let detail = if node.is_missing() {
        format!("expected `{}`", node.kind())
    } else {
        let text = node.utf8_text(source.as_bytes()).unwrap_or_default();
        let first_line = text.lines().next().unwrap_or_default().trim();
        if first_line.is_empty() {
            "invalid syntax".to_string()
        } else {
            let snippet: String = first_line.chars().take(40).collect();
            format!("invalid syntax near `{}`", snippet)
        }
    };
    invalid_at(node, detail)
}
