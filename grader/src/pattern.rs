//! Text predicates over extracted notebook source.
//!
//! These are deliberately lenient: a false positive (an assignment in an
//! unrelated cell) is acceptable, a false negative is not.

use regex::Regex;

use crate::syntax::{SyntaxError, SyntaxIndex};

/// True if `name` is assigned anywhere: the whole token followed by `=`.
pub fn symbol_defined(source: &str, name: &str) -> bool {
    let pattern = format!(r"\b{}\s*=", regex::escape(name));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(source))
}

/// Syntax-tree import check. Unparseable source is an error, not `false`.
pub fn module_imported(source: &str, module: &str) -> Result<bool, SyntaxError> {
    Ok(SyntaxIndex::parse(source)?.imports_module(module))
}

/// Literal substring test.
pub fn contains(source: &str, needle: &str) -> bool {
    source.contains(needle)
}

/// Regular-expression search anywhere in the source.
pub fn matches(source: &str, pattern: &str) -> Result<bool, regex::Error> {
    Ok(Regex::new(pattern)?.is_match(source))
}

/// Number of non-overlapping matches of `pattern`.
pub fn count_occurrences(source: &str, pattern: &str) -> Result<usize, regex::Error> {
    Ok(Regex::new(pattern)?.find_iter(source).count())
}

/// True if `container['label']` (or `container["label"]`) appears for any of
/// the accepted spellings. The container may end a longer name, as with
/// `mi_calidad_cafe['mala']`.
pub fn labeled_field_present<S: AsRef<str>>(source: &str, container: &str, spellings: &[S]) -> bool {
    if spellings.is_empty() {
        return false;
    }
    let alternatives: Vec<String> = spellings
        .iter()
        .map(|s| regex::escape(s.as_ref()))
        .collect();
    let pattern = format!(
        r#"{}\s*\[\s*(?:'(?:{alt})'|"(?:{alt})")\s*\]"#,
        regex::escape(container),
        alt = alternatives.join("|"),
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(source))
}

/// Substitute `{name}` in a pattern template with the regex-escaped name.
pub fn instantiate(template: &str, name: &str) -> String {
    template.replace("{name}", &regex::escape(name))
}
