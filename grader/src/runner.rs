use std::any::Any;
use std::cell::OnceCell;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use notebook::{Document, mask_magics};

use crate::error::{CheckError, GradeError};
use crate::kernel::{ExecutionFailure, Kernel, Namespace, EvalOutcome};
use crate::pattern;
use crate::report::{CheckResult, RubricReport};
use crate::rubric::{Assertion, Check, Rubric};
use crate::syntax::{SyntaxError, SyntaxIndex};

/// Where a [`GradingRun`] is in its lifecycle. A run whose notebook cannot be
/// loaded is never constructed, so there is no "not loaded" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Loaded,
    Extracted,
    /// This many checks have produced a result.
    Checked(usize),
    Reported,
}

/// A rubric bound to an execution kernel.
pub struct Grader<'a> {
    rubric: Rubric,
    kernel: &'a dyn Kernel,
    timeout: Duration,
}

impl<'a> Grader<'a> {
    /// Uses the rubric's configured timeout.
    pub fn new(rubric: Rubric, kernel: &'a dyn Kernel) -> Self {
        let timeout = Duration::from_secs(rubric.settings.timeout_secs);
        Grader {
            rubric,
            kernel,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Load, extract, check and report in one go. Only a load failure is an `Err`.
    pub fn grade(&self, path: &Path) -> Result<RubricReport, GradeError> {
        let mut run = GradingRun::load(self, path)?;
        run.extract();
        run.run_checks();
        Ok(run.finish())
    }
}

/// One pass of a rubric over one submission. Source extraction, the syntax
/// parse and each execution mode happen at most once per run.
pub struct GradingRun<'a> {
    grader: &'a Grader<'a>,
    state: RunState,
    path: PathBuf,
    workdir: PathBuf,
    document: Document,
    exprs: Vec<String>,
    source: OnceCell<String>,
    syntax: OnceCell<Result<SyntaxIndex, SyntaxError>>,
    notebook_run: OnceCell<Result<Document, ExecutionFailure>>,
    source_run: OnceCell<Result<Namespace, ExecutionFailure>>,
    results: Vec<CheckResult>,
}

impl<'a> GradingRun<'a> {
    pub fn load(grader: &'a Grader<'a>, path: &Path) -> Result<Self, GradeError> {
        info!(notebook = %path.display(), checks = grader.rubric.checks.len(), "grading submission");
        let document = notebook::load(path).inspect_err(|e| {
            debug!(notebook = %path.display(), error = %e, "submission could not be loaded");
        })?;

        let workdir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!(cells = document.cells.len(), workdir = %workdir.display(), "run state: loaded");

        Ok(GradingRun {
            grader,
            state: RunState::Loaded,
            path: path.to_path_buf(),
            workdir,
            document,
            exprs: grader.rubric.expressions(),
            source: OnceCell::new(),
            syntax: OnceCell::new(),
            notebook_run: OnceCell::new(),
            source_run: OnceCell::new(),
            results: Vec::new(),
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The concatenated code cells. Idempotent.
    pub fn extract(&mut self) -> &str {
        if self.state == RunState::Loaded {
            let len = self.source().len();
            self.advance(RunState::Extracted);
            debug!(bytes = len, "source extracted");
        }
        self.source()
    }

    /// Run the next pending check, returning its result, or `None` once every
    /// check has run.
    pub fn step(&mut self) -> Option<&CheckResult> {
        let grader = self.grader;
        let done = self.results.len();
        let check = grader.rubric.checks.get(done)?;
        if self.state == RunState::Loaded {
            self.extract();
        }

        let result = self.run_check(check);
        debug!(check = %check.id, passed = result.passed, "check finished");
        self.results.push(result);
        self.advance(RunState::Checked(done + 1));
        self.results.last()
    }

    pub fn run_checks(&mut self) {
        while self.step().is_some() {}
    }

    /// Finish any pending checks and build the report.
    pub fn finish(mut self) -> RubricReport {
        self.run_checks();
        self.advance(RunState::Reported);

        let executed = match self.notebook_run.take() {
            Some(Ok(document)) => Some(document),
            _ => None,
        };
        let source = self.source.take().unwrap_or_default();
        let report = RubricReport::new(self.path, self.results, source, executed);
        info!(
            points = report.points,
            max_points = report.max_points,
            failed = report.failures().count(),
            "grading finished"
        );
        report
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    fn run_check(&self, check: &Check) -> CheckResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate_check(check)))
            .unwrap_or_else(|payload| Err(CheckError::Panicked(panic_message(payload))));

        match outcome {
            Ok(Verdict::Pass(detail)) => {
                CheckResult::pass(&check.id, &check.title, check.weight, detail)
            }
            Ok(Verdict::Fail { message, span }) => {
                CheckResult::fail(&check.id, &check.title, check.weight, message, span)
            }
            Err(err) => {
                warn!(check = %check.id, error = %err, "check errored");
                CheckResult::fail(
                    &check.id,
                    &check.title,
                    check.weight,
                    format!("internal error: {}", err),
                    None,
                )
            }
        }
    }

    fn evaluate_check(&self, check: &Check) -> Result<Verdict, CheckError> {
        let mut detail = None;
        for assertion in &check.assertions {
            match self.evaluate(assertion)? {
                Verdict::Pass(Some(text)) => detail = Some(text),
                Verdict::Pass(None) => {}
                failed => return Ok(failed),
            }
        }
        Ok(Verdict::Pass(detail))
    }

    fn evaluate(&self, assertion: &Assertion) -> Result<Verdict, CheckError> {
        let source = self.source();
        let verdict = match assertion {
            Assertion::Exists { message } => {
                if self.path.is_file() {
                    Verdict::Pass(None)
                } else {
                    let name = self.path.display().to_string();
                    Verdict::fail(render(
                        message,
                        "notebook '{name}' does not exist",
                        &[("name", name)],
                    ))
                }
            }

            Assertion::Captured {
                pattern,
                min_chars,
                message,
            } => {
                let re = Regex::new(pattern)?;
                let filled = re
                    .captures(source)
                    .and_then(|caps| caps.get(1))
                    .is_some_and(|m| m.as_str().trim().chars().count() >= *min_chars);
                if filled {
                    Verdict::Pass(None)
                } else {
                    Verdict::fail(render(
                        message,
                        "expected a value of at least {min} characters for `{pattern}`",
                        &[("pattern", pattern.clone()), ("min", min_chars.to_string())],
                    ))
                }
            }

            Assertion::Imported {
                modules,
                message,
                on_error,
            } => match self.syntax() {
                Ok(index) => match modules.iter().find(|m| !index.imports_module(m)) {
                    None => Verdict::Pass(None),
                    Some(missing) => Verdict::fail(render(
                        message,
                        "module '{name}' is not imported",
                        &[("name", missing.clone())],
                    )),
                },
                Err(err @ SyntaxError::Invalid { span, .. }) => Verdict::Fail {
                    message: render(on_error, "{error}", &[("error", err.to_string())]),
                    span: Some(span.clone()),
                },
                Err(SyntaxError::Grammar(reason)) => {
                    return Err(CheckError::Grammar(reason.clone()));
                }
            },

            Assertion::Defined { symbols, message } => {
                match symbols.iter().find(|s| !pattern::symbol_defined(source, s)) {
                    None => Verdict::Pass(None),
                    Some(missing) => Verdict::fail(render(
                        message,
                        "'{name}' is never assigned",
                        &[("name", missing.clone())],
                    )),
                }
            }

            Assertion::Labels {
                container,
                labels,
                message,
            } => {
                let missing = labels.iter().find(|spec| {
                    !pattern::labeled_field_present(source, container, &spec.spellings())
                });
                match missing {
                    None => Verdict::Pass(None),
                    Some(spec) => Verdict::fail(render(
                        message,
                        "{container}['{label}'] is not defined",
                        &[
                            ("label", spec.label().to_string()),
                            ("container", container.clone()),
                        ],
                    )),
                }
            }

            Assertion::ContainsAny { needles, message } => {
                if needles.iter().any(|n| pattern::contains(source, n)) {
                    Verdict::Pass(None)
                } else {
                    Verdict::fail(render(
                        message,
                        "none of {name} appears in the code",
                        &[("name", needles.join(", "))],
                    ))
                }
            }

            Assertion::Matches {
                pattern: template,
                names,
                message,
            } => {
                if names.is_empty() {
                    if pattern::matches(source, template)? {
                        Verdict::Pass(None)
                    } else {
                        Verdict::fail(render(
                            message,
                            "no code matches `{pattern}`",
                            &[("pattern", template.clone()), ("name", template.clone())],
                        ))
                    }
                } else {
                    let mut missing = None;
                    for name in names {
                        if !pattern::matches(source, &pattern::instantiate(template, name))? {
                            missing = Some(name);
                            break;
                        }
                    }
                    match missing {
                        None => Verdict::Pass(None),
                        Some(name) => Verdict::fail(render(
                            message,
                            "no code matches `{pattern}` for '{name}'",
                            &[("pattern", template.clone()), ("name", name.clone())],
                        )),
                    }
                }
            }

            Assertion::CountAtLeast {
                patterns,
                min,
                message,
            } => {
                let mut count = 0;
                for p in patterns {
                    count += pattern::count_occurrences(source, p)?;
                }
                if count >= *min {
                    Verdict::Pass(None)
                } else {
                    Verdict::fail(render(
                        message,
                        "expected at least {min} matches, found {count}",
                        &[("min", min.to_string()), ("count", count.to_string())],
                    ))
                }
            }

            Assertion::Executes { message } => match self.notebook_run() {
                Ok(_) => Verdict::Pass(None),
                Err(failure) => Verdict::fail(render(
                    message,
                    "notebook failed to execute: {error}",
                    &[("error", failure.to_string())],
                )),
            },

            Assertion::Bound {
                names,
                message,
                on_error,
            } => match self.source_run() {
                Err(failure) => Verdict::fail(render(
                    on_error,
                    "code failed to run: {error}",
                    &[("error", failure.to_string())],
                )),
                Ok(namespace) => match names.iter().find(|n| !namespace.contains(n)) {
                    None => Verdict::Pass(None),
                    Some(missing) => Verdict::fail(render(
                        message,
                        "'{name}' is not bound after running the code",
                        &[("name", missing.clone())],
                    )),
                },
            },

            Assertion::InRange {
                expr,
                min,
                max,
                message,
                on_error,
                detail,
            } => {
                let range_vars = |value: String| {
                    vec![
                        ("expr", expr.clone()),
                        ("min", min.to_string()),
                        ("max", max.to_string()),
                        ("value", value),
                    ]
                };
                let errored = |error: String| {
                    let mut vars = range_vars(String::new());
                    vars.push(("error", error));
                    Verdict::fail(render(on_error, "could not evaluate `{expr}`: {error}", &vars))
                };

                match self.source_run() {
                    Err(failure) => errored(failure.to_string()),
                    Ok(namespace) => match namespace.evaluated(expr) {
                        None => errored("expression was not evaluated".to_string()),
                        Some(EvalOutcome::Error { ename, evalue }) => {
                            errored(format!("{}: {}", ename, evalue))
                        }
                        Some(EvalOutcome::Ok { value }) => match value.as_f64() {
                            None => errored(format!("{} is not a number", value.type_name())),
                            Some(v) if (*min..=*max).contains(&v) => {
                                let vars = range_vars(format!("{:.2}", v));
                                Verdict::Pass(detail.as_ref().map(|_| render(detail, "", &vars)))
                            }
                            Some(v) => Verdict::fail(render(
                                message,
                                "`{expr}` = {value} is outside [{min}, {max}]",
                                &range_vars(format!("{:.2}", v)),
                            )),
                        },
                    },
                }
            }
        };
        Ok(verdict)
    }

    fn source(&self) -> &str {
        self.source
            .get_or_init(|| notebook::extract(&self.document))
    }

    fn syntax(&self) -> &Result<SyntaxIndex, SyntaxError> {
        self.syntax
            .get_or_init(|| SyntaxIndex::parse(&mask_magics(self.source())))
    }

    fn notebook_run(&self) -> &Result<Document, ExecutionFailure> {
        if self.notebook_run.get().is_some() {
            debug!("reusing notebook execution");
        }
        self.notebook_run.get_or_init(|| {
            info!(timeout_secs = self.grader.timeout.as_secs(), "executing notebook");
            self.grader
                .kernel
                .execute_notebook(&self.document, &self.workdir, self.grader.timeout)
        })
    }

    fn source_run(&self) -> &Result<Namespace, ExecutionFailure> {
        if self.source_run.get().is_some() {
            debug!("reusing source execution");
        }
        self.source_run.get_or_init(|| {
            info!(
                timeout_secs = self.grader.timeout.as_secs(),
                exprs = self.exprs.len(),
                "executing extracted source"
            );
            self.grader.kernel.execute_source(
                self.source(),
                &self.exprs,
                &self.workdir,
                self.grader.timeout,
            )
        })
    }
}

enum Verdict {
    Pass(Option<String>),
    Fail {
        message: String,
        span: Option<Range<usize>>,
    },
}

impl Verdict {
    fn fail(message: String) -> Self {
        Verdict::Fail {
            message,
            span: None,
        }
    }
}

/// Fill `{key}` placeholders in the rubric's message, or in `default` when the
/// rubric gives none.
fn render(template: &Option<String>, default: &str, vars: &[(&str, String)]) -> String {
    let mut text = template.as_deref().unwrap_or(default).to_string();
    for (key, value) in vars {
        text = text.replace(&format!("{{{}}}", key), value);
    }
    text
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
