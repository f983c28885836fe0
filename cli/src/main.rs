mod report;

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use grader::{GradeError, Grader, PythonKernel, Rubric, RubricReport};
use notebook::LoadError;

const SUBCOMMANDS: &[&str] = &["grade", "extract", "rubric", "help"];

const EXIT_FAILED_CHECKS: i32 = 1;
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "nbgrade", version, about = "Rubric autograder for Jupyter notebook workshops")]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// More logging on stderr (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Grade a notebook against a rubric
    Grade(GradeArgs),

    /// Print the code the checks see: every code cell, in order
    Extract(ExtractArgs),

    /// List the rubric's checks and weights
    Rubric(RubricArgs),
}

#[derive(clap::Args)]
struct GradeArgs {
    /// Notebook to grade. Defaults to the rubric's configured path.
    notebook: Option<PathBuf>,

    /// Rubric TOML file. Defaults to the built-in workshop rubric.
    #[arg(short, long)]
    rubric: Option<PathBuf>,

    /// Execution timeout in seconds, per execution
    #[arg(short, long, env = "NBGRADE_TIMEOUT")]
    timeout: Option<u64>,

    /// Python interpreter used to run the submission
    #[arg(long, env = "NBGRADE_PYTHON")]
    python: Option<String>,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Write the executed notebook (outputs attached) to this path
    #[arg(long)]
    executed_out: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ExtractArgs {
    notebook: PathBuf,
}

#[derive(clap::Args)]
struct RubricArgs {
    /// Rubric TOML file. Defaults to the built-in workshop rubric.
    #[arg(short, long)]
    rubric: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    // `nbgrade Taller_3.ipynb` and a bare `nbgrade` mean `nbgrade grade ...`.
    let mut args: Vec<String> = std::env::args().collect();
    let first_pos = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let wants_info = args
        .iter()
        .skip(1)
        .any(|a| matches!(a.as_str(), "-h" | "--help" | "-V" | "--version"));
    let inject = match first_pos {
        Some(first) => !SUBCOMMANDS.contains(&first.as_str()),
        None => !wants_info,
    };
    if inject {
        args.insert(1.min(args.len()), "grade".to_string());
    }

    let cli = Cli::parse_from(&args);
    init_tracing(cli.verbose);

    let color = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let code = match cli.command {
        Command::Grade(grade_args) => do_grade(grade_args, cli.no_color, color),
        Command::Extract(extract_args) => do_extract(&extract_args.notebook, color),
        Command::Rubric(rubric_args) => match load_rubric(rubric_args.rubric.as_deref()) {
            Ok(rubric) => finish_output(report::write_rubric(
                &mut io::stdout().lock(),
                &rubric,
                cli.no_color,
            )),
            Err(e) => {
                eprintln!("error: {}", e);
                EXIT_FATAL
            }
        },
    };
    process::exit(code);
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn load_rubric(path: Option<&Path>) -> Result<Rubric, GradeError> {
    let rubric = match path {
        Some(path) => Rubric::load(path)?,
        None => Rubric::builtin()?,
    };
    Ok(rubric)
}

fn do_grade(args: GradeArgs, no_color: bool, color: ColorChoice) -> i32 {
    let mut rubric = match load_rubric(args.rubric.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_FATAL;
        }
    };
    if let Some(secs) = args.timeout {
        rubric.settings.timeout_secs = secs;
    }

    let Some(path) = args.notebook.or_else(|| rubric.settings.notebook.clone()) else {
        eprintln!("error: no notebook given and the rubric does not name one");
        return EXIT_FATAL;
    };

    let python = args.python.unwrap_or_else(|| rubric.settings.python.clone());
    debug!(python = %python, timeout_secs = rubric.settings.timeout_secs, "grading");
    let kernel = PythonKernel::new(python);
    let grader = Grader::new(rubric, &kernel);

    let report = match grader.grade(&path) {
        Ok(report) => report,
        Err(GradeError::Load(e)) => {
            emit_load_error(&path, &e, color);
            return EXIT_FATAL;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_FATAL;
        }
    };

    emit_syntax_diagnostics(&report, color);

    if let Some(out) = &args.executed_out {
        if let Err(code) = write_executed(&report, out) {
            return code;
        }
    }

    let mut stdout = io::stdout().lock();
    let written = match args.format {
        Format::Text => report::write_text(&mut stdout, &report, no_color),
        Format::Json => report::write_json(&mut stdout, &report),
    };
    match finish_output(written) {
        0 if report.passed() => 0,
        0 => EXIT_FAILED_CHECKS,
        code => code,
    }
}

fn write_executed(report: &RubricReport, out: &Path) -> Result<(), i32> {
    let Some(executed) = &report.executed else {
        warn!(path = %out.display(), "notebook did not execute cleanly; no executed copy written");
        return Ok(());
    };
    let json = executed.to_json().map_err(|e| {
        eprintln!("error: cannot serialize executed notebook: {}", e);
        EXIT_FATAL
    })?;
    std::fs::write(out, json).map_err(|e| {
        eprintln!("error: cannot write '{}': {}", out.display(), e);
        EXIT_FATAL
    })
}

fn do_extract(path: &Path, color: ColorChoice) -> i32 {
    match notebook::load(path) {
        Ok(document) => {
            println!("{}", notebook::extract(&document));
            0
        }
        Err(e) => {
            emit_load_error(path, &e, color);
            EXIT_FATAL
        }
    }
}

fn finish_output(result: io::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => 0,
        Err(e) => {
            eprintln!("error: cannot write report: {}", e);
            EXIT_FATAL
        }
    }
}

/// Load errors with a span are rendered against the notebook text.
fn emit_load_error(path: &Path, error: &LoadError, color: ColorChoice) {
    let text = match error {
        LoadError::Json { .. } => std::fs::read_to_string(path).unwrap_or_default(),
        _ => String::new(),
    };
    let mut files = SimpleFiles::new();
    let file_id = files.add(path.display().to_string(), text);
    let diagnostic = error.to_diagnostic(file_id);

    let writer = StandardStream::stderr(color);
    let config = term::Config::default();
    let _ = term::emit_to_write_style(&mut writer.lock(), &config, &files, &diagnostic);
}

/// Failing checks that carry a span point into the extracted source.
fn emit_syntax_diagnostics(report: &RubricReport, color: ColorChoice) {
    let spanned: Vec<_> = report
        .failures()
        .filter_map(|r| r.span.clone().map(|span| (r, span)))
        .collect();
    if spanned.is_empty() {
        return;
    }

    let mut files = SimpleFiles::new();
    let name = format!("{} (code cells)", report.notebook.display());
    let file_id = files.add(name, report.source.clone());
    let writer = StandardStream::stderr(color);
    let config = term::Config::default();

    for (result, span) in spanned {
        let diagnostic = Diagnostic::error()
            .with_message(format!("check '{}' failed", result.id))
            .with_labels(vec![
                Label::primary(file_id, span).with_message(result.message.clone().unwrap_or_default()),
            ]);
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, &files, &diagnostic);
    }
}
