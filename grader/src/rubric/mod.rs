use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::pattern;

/// The workshop rubric this grader ships with.
pub const BUILTIN: &str = include_str!("default.toml");

#[derive(Debug, Error)]
pub enum RubricError {
    #[error("cannot read rubric '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rubric TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("check '{check}': {message}")]
    Invalid { check: String, message: String },
}

/// An ordered, weighted list of checks plus grading defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Rubric {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(rename = "check", default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Notebook graded when no path is given on the command line.
    pub notebook: Option<PathBuf>,
    pub timeout_secs: u64,
    pub python: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            notebook: None,
            timeout_secs: crate::kernel::DEFAULT_TIMEOUT.as_secs(),
            python: "python3".to_string(),
        }
    }
}

/// One weighted rubric item. Its assertions run in order and the first
/// failure decides the outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct Check {
    pub id: String,
    pub title: String,
    pub weight: u32,
    #[serde(rename = "assert", default)]
    pub assertions: Vec<Assertion>,
}

/// A single requirement. `message` templates may use `{name}`, `{label}`,
/// `{container}`, `{count}`, `{min}`, `{max}`, `{value}`, `{expr}` and `{error}`
/// where the assertion provides them.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    /// The submission file exists.
    Exists {
        #[serde(default)]
        message: Option<String>,
    },
    /// `pattern` matches and its first capture group, trimmed, has at least `min_chars` characters.
    Captured {
        pattern: String,
        #[serde(default = "default_min_chars")]
        min_chars: usize,
        #[serde(default)]
        message: Option<String>,
    },
    /// Checked against the syntax tree; unparseable source fails with `on_error`.
    Imported {
        modules: Vec<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        on_error: Option<String>,
    },
    Defined {
        symbols: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Labels {
        container: String,
        labels: Vec<LabelSpec>,
        #[serde(default)]
        message: Option<String>,
    },
    ContainsAny {
        needles: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Regex search; with `names`, the pattern is instantiated once per name via `{name}`.
    Matches {
        pattern: String,
        #[serde(default)]
        names: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Total matches across `patterns` is at least `min`.
    CountAtLeast {
        patterns: Vec<String>,
        min: usize,
        #[serde(default)]
        message: Option<String>,
    },
    /// The whole notebook runs cell by cell without error.
    Executes {
        #[serde(default)]
        message: Option<String>,
    },
    /// After running the extracted source, these names are bound at top level.
    Bound {
        names: Vec<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        on_error: Option<String>,
    },
    /// After running the extracted source, `expr` evaluates to a number in `[min, max]`.
    InRange {
        expr: String,
        min: f64,
        max: f64,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        on_error: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
}

fn default_min_chars() -> usize {
    1
}

/// A required label and the spellings accepted for it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LabelSpec {
    Plain(String),
    Variants { label: String, variants: Vec<String> },
}

impl LabelSpec {
    pub fn label(&self) -> &str {
        match self {
            LabelSpec::Plain(label) | LabelSpec::Variants { label, .. } => label,
        }
    }

    /// The canonical label followed by its accepted variants.
    pub fn spellings(&self) -> Vec<&str> {
        match self {
            LabelSpec::Plain(label) => vec![label.as_str()],
            LabelSpec::Variants { label, variants } => std::iter::once(label.as_str())
                .chain(variants.iter().map(String::as_str))
                .collect(),
        }
    }
}

impl Rubric {
    pub fn builtin() -> Result<Self, RubricError> {
        Self::parse(BUILTIN)
    }

    pub fn load(path: &Path) -> Result<Self, RubricError> {
        let text = std::fs::read_to_string(path).map_err(|source| RubricError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, RubricError> {
        let rubric: Rubric = toml::from_str(text)?;
        rubric.validate()?;
        Ok(rubric)
    }

    pub fn total_weight(&self) -> u32 {
        self.checks.iter().map(|c| c.weight).sum()
    }

    /// Expressions needed by any runtime assertion, deduplicated in
    /// declaration order.
    pub fn expressions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.checks
            .iter()
            .flat_map(|c| &c.assertions)
            .filter_map(|a| match a {
                Assertion::InRange { expr, .. } => Some(expr.clone()),
                _ => None,
            })
            .filter(|expr| seen.insert(expr.clone()))
            .collect()
    }

    /// Reject rubrics that could only fail for reasons unrelated to the submission.
    fn validate(&self) -> Result<(), RubricError> {
        if self.checks.is_empty() {
            return Err(RubricError::Invalid {
                check: "<rubric>".into(),
                message: "no checks defined".into(),
            });
        }

        let mut ids = HashSet::new();
        for check in &self.checks {
            let invalid = |message: String| RubricError::Invalid {
                check: check.id.clone(),
                message,
            };
            if !ids.insert(check.id.as_str()) {
                return Err(invalid("duplicate check id".into()));
            }
            if check.assertions.is_empty() {
                return Err(invalid("no assertions".into()));
            }
            for assertion in &check.assertions {
                validate_assertion(assertion).map_err(invalid)?;
            }
        }
        Ok(())
    }
}

fn validate_assertion(assertion: &Assertion) -> Result<(), String> {
    let compile = |pattern: &str| Regex::new(pattern).map_err(|e| e.to_string());
    match assertion {
        Assertion::Captured { pattern, .. } => {
            if compile(pattern)?.captures_len() < 2 {
                return Err(format!("pattern `{}` needs a capture group", pattern));
            }
        }
        Assertion::Matches { pattern, names, .. } => {
            if names.is_empty() {
                compile(pattern)?;
            }
            for name in names {
                compile(&pattern::instantiate(pattern, name))?;
            }
        }
        Assertion::CountAtLeast { patterns, .. } => {
            if patterns.is_empty() {
                return Err("count_at_least needs at least one pattern".into());
            }
            for p in patterns {
                compile(p)?;
            }
        }
        Assertion::InRange { min, max, .. } if min > max => {
            return Err(format!("empty range [{}, {}]", min, max));
        }
        Assertion::Labels { labels, .. } if labels.is_empty() => {
            return Err("labels list is empty".into());
        }
        _ => {}
    }
    Ok(())
}
