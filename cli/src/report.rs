use std::io::{self, Write};

use grader::{CheckResult, Rubric, RubricReport};

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn dim(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[2m{}\x1b[0m", s)
    }
}

fn score(result: &CheckResult) -> String {
    format!("[{:>2}/{:<2}]", result.points(), result.weight)
}

/// Itemized console report: one line per check, then failure details and
/// the score summary.
pub fn write_text(out: &mut impl Write, report: &RubricReport, no_color: bool) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", bold(&report.notebook.display().to_string(), no_color))?;

    for result in &report.results {
        let label = if result.passed {
            pass_label(no_color)
        } else {
            fail_label(no_color)
        };
        writeln!(out, "  {}  {} {}", label, score(result), result.title)?;
        if let Some(detail) = &result.detail {
            writeln!(out, "              {}", dim(detail, no_color))?;
        }
    }

    let failures: Vec<&CheckResult> = report.failures().collect();
    if !failures.is_empty() {
        writeln!(out)?;
        writeln!(out, "failures:")?;
        for f in &failures {
            writeln!(out)?;
            writeln!(out, "  --- {} ---", f.id)?;
            for line in f.message.as_deref().unwrap_or_default().lines() {
                writeln!(out, "  {}", line)?;
            }
        }
    }

    let passed = report.results.len() - failures.len();
    writeln!(out)?;
    writeln!(
        out,
        "score: {}/{} ({:.1}%)",
        report.points, report.max_points, report.percent
    )?;
    if failures.is_empty() {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        writeln!(out, "grade result: {}. {} passed, 0 failed", ok, passed)
    } else {
        let failed = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        writeln!(
            out,
            "grade result: {}. {} passed, {} failed (of {})",
            failed,
            passed,
            failures.len(),
            report.results.len()
        )
    }
}

pub fn write_json(out: &mut impl Write, report: &RubricReport) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)
}

/// Lists the rubric's checks with their weights.
pub fn write_rubric(out: &mut impl Write, rubric: &Rubric, no_color: bool) -> io::Result<()> {
    if let Some(title) = &rubric.title {
        writeln!(out, "{}", bold(title, no_color))?;
    }
    if let Some(notebook) = &rubric.settings.notebook {
        writeln!(out, "notebook: {}", notebook.display())?;
    }
    writeln!(out, "timeout: {}s", rubric.settings.timeout_secs)?;
    writeln!(out)?;

    let width = rubric.checks.iter().map(|c| c.id.len()).max().unwrap_or(0);
    for check in &rubric.checks {
        writeln!(
            out,
            "  {:>3}  {:<width$}  {}",
            check.weight,
            check.id,
            check.title,
            width = width
        )?;
    }
    writeln!(out)?;
    writeln!(out, "total: {}", rubric.total_weight())
}
