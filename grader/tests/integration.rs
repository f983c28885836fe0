use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use grader::{
    ExecutionFailure, GradeError, Grader, Kernel, KernelValue, Namespace, EvalOutcome, Rubric,
};
use notebook::Document;

const SATISFACTION: &str = "simulador.output['satisfaccion']";

/// Kernel double that replays canned outcomes and counts invocations.
struct ScriptedKernel {
    notebook: Result<(), ExecutionFailure>,
    satisfaction: Option<KernelValue>,
    source_error: Option<ExecutionFailure>,
    notebook_calls: Cell<usize>,
    source_calls: Cell<usize>,
}

impl ScriptedKernel {
    fn passing(value: f64) -> Self {
        ScriptedKernel {
            notebook: Ok(()),
            satisfaction: Some(KernelValue::Float { value }),
            source_error: None,
            notebook_calls: Cell::new(0),
            source_calls: Cell::new(0),
        }
    }
}

impl Kernel for ScriptedKernel {
    fn execute_notebook(
        &self,
        document: &Document,
        _workdir: &Path,
        _timeout: Duration,
    ) -> Result<Document, ExecutionFailure> {
        self.notebook_calls.set(self.notebook_calls.get() + 1);
        self.notebook.clone().map(|()| document.clone())
    }

    fn execute_source(
        &self,
        _source: &str,
        exprs: &[String],
        _workdir: &Path,
        _timeout: Duration,
    ) -> Result<Namespace, ExecutionFailure> {
        self.source_calls.set(self.source_calls.get() + 1);
        if let Some(failure) = &self.source_error {
            return Err(failure.clone());
        }
        let mut namespace = Namespace::default();
        namespace.bindings.insert(
            "simulador".into(),
            KernelValue::Object {
                type_name: "ControlSystemSimulation".into(),
                repr: "<ControlSystemSimulation>".into(),
            },
        );
        for expr in exprs.iter().filter(|e| e.as_str() == SATISFACTION) {
            let outcome = match &self.satisfaction {
                Some(value) => EvalOutcome::Ok {
                    value: value.clone(),
                },
                None => EvalOutcome::Error {
                    ename: "KeyError".into(),
                    evalue: "'satisfaccion'".into(),
                },
            };
            namespace.exprs.insert(expr.clone(), outcome);
        }
        Ok(namespace)
    }
}

const INFO: &str = r#"Nombre = "Ana María Pérez"
Cédula = "1020304050""#;

const IMPORTS: &str = r#"import numpy as np
import skfuzzy as fuzz
from skfuzzy import control as ctrl
import matplotlib.pyplot as plt"#;

const VARIABLES: &str = r#"calidad_cafe = ctrl.Antecedent(np.arange(0, 11, 1), 'calidad_cafe')
atencion_barista = ctrl.Antecedent(np.arange(0, 11, 1), 'atencion_barista')
rapidez_servicio = ctrl.Antecedent(np.arange(0, 11, 1), 'rapidez_servicio')
satisfaccion = ctrl.Consequent(np.arange(0, 101, 1), 'satisfaccion')"#;

const MEMBERSHIP: &str = r#"def concentracion(mf):
    return mf ** 2

calidad_cafe['mala'] = fuzz.gaussmf(calidad_cafe.universe, 0, 1.5)
calidad_cafe['aceptable'] = fuzz.trimf(calidad_cafe.universe, [2, 5, 8])
calidad_cafe['excelente'] = fuzz.trimf(calidad_cafe.universe, [6, 10, 10])
calidad_cafe['muy_excelente'] = concentracion(calidad_cafe['excelente'].mf)

atencion_barista['deficiente'] = fuzz.trimf(atencion_barista.universe, [0, 0, 4])
atencion_barista['normal'] = fuzz.trimf(atencion_barista.universe, [3, 5, 7])
atencion_barista['más o menos normal'] = fuzz.trimf(atencion_barista.universe, [2, 5, 8])
atencion_barista['excelente'] = fuzz.trimf(atencion_barista.universe, [6, 10, 10])

rapidez_servicio['lenta'] = fuzz.trapmf(rapidez_servicio.universe, [0, 0, 2, 4])
rapidez_servicio['moderada'] = fuzz.trimf(rapidez_servicio.universe, [3, 5, 7])
rapidez_servicio['rapida'] = fuzz.trimf(rapidez_servicio.universe, [6, 10, 10])

satisfaccion['baja'] = fuzz.trimf(satisfaccion.universe, [0, 0, 50])
satisfaccion['media'] = fuzz.trimf(satisfaccion.universe, [25, 50, 75])
satisfaccion['alta'] = fuzz.trimf(satisfaccion.universe, [50, 100, 100])
calidad_cafe.view()"#;

fn rules(count: usize) -> String {
    (1..=count)
        .map(|i| {
            format!(
                "regla{} = ctrl.Rule(calidad_cafe['mala'], satisfaccion['baja'])",
                i
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn system(rule_count: usize) -> String {
    let names: Vec<String> = (1..=rule_count).map(|i| format!("regla{}", i)).collect();
    format!(
        "sistema = ctrl.ControlSystem([{}])\nsimulador = ctrl.ControlSystemSimulation(sistema)\n\
         simulador.input['calidad_cafe'] = 8\n\
         simulador.input['atencion_barista'] = 7.5\n\
         simulador.input['rapidez_servicio'] = 6\n\
         simulador.compute()\nprint(simulador.output['satisfaccion'])",
        names.join(", ")
    )
}

fn complete_cells(rule_count: usize) -> Vec<String> {
    vec![
        INFO.to_string(),
        IMPORTS.to_string(),
        VARIABLES.to_string(),
        MEMBERSHIP.to_string(),
        rules(rule_count),
        system(rule_count),
    ]
}

fn write_notebook(dir: &Path, cells: &[String]) -> PathBuf {
    let mut all = vec![serde_json::json!({
        "cell_type": "markdown",
        "metadata": {},
        "source": ["# Taller 3\n", "Lógica difusa"]
    })];
    all.extend(cells.iter().map(|src| {
        serde_json::json!({
            "cell_type": "code",
            "execution_count": null,
            "metadata": {},
            "outputs": [],
            "source": src
        })
    }));
    let json = serde_json::json!({
        "cells": all,
        "metadata": {"kernelspec": {"name": "python3"}},
        "nbformat": 4,
        "nbformat_minor": 5
    });
    let path = dir.join("Taller_3.ipynb");
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
    path
}

fn grade(cells: &[String], kernel: &ScriptedKernel) -> grader::RubricReport {
    let dir = tempfile::tempdir().unwrap();
    let path = write_notebook(dir.path(), cells);
    let grader = Grader::new(Rubric::builtin().unwrap(), kernel);
    grader.grade(&path).unwrap()
}

fn message<'r>(report: &'r grader::RubricReport, id: &str) -> &'r str {
    report
        .get(id)
        .and_then(|r| r.message.as_deref())
        .unwrap_or_default()
}

#[test]
fn complete_submission_scores_full_marks() {
    let kernel = ScriptedKernel::passing(72.5);
    let report = grade(&complete_cells(7), &kernel);

    let failed: Vec<_> = report.failures().map(|r| (&r.id, &r.message)).collect();
    assert!(failed.is_empty(), "unexpected failures: {:?}", failed);
    assert_eq!(report.points, report.max_points);
    assert_eq!(report.percent, 100.0);
    assert_eq!(
        report.get("satisfaction_value").unwrap().detail.as_deref(),
        Some("Satisfacción calculada: 72.50/100")
    );
    assert!(report.executed.is_some());
}

#[test]
fn missing_label_fails_exactly_one_check() {
    let cells: Vec<String> = complete_cells(7)
        .into_iter()
        .map(|c| c.replace("satisfaccion['media'] = ", "satisfaccion_media = "))
        .collect();
    let report = grade(&cells, &ScriptedKernel::passing(72.5));

    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1, "failures: {:?}", failed);
    assert_eq!(failed[0].id, "membership_satisfaccion");
    assert!(failed[0].message.as_deref().unwrap().contains("'media'"));
    assert_eq!(report.points, report.max_points - 8);
}

#[test]
fn middle_cell_error_fails_checks_that_need_execution() {
    let mut kernel = ScriptedKernel::passing(72.5);
    kernel.notebook = Err(ExecutionFailure::Cell {
        cell: 2,
        ename: "NameError".into(),
        evalue: "name 'ctrl' is not defined".into(),
        traceback: vec![],
    });
    let report = grade(&complete_cells(7), &kernel);

    let failed: Vec<_> = report.failures().map(|r| r.id.as_str()).collect();
    assert_eq!(failed, vec!["executes", "satisfaction_value"]);
    let text = message(&report, "executes");
    assert!(text.contains("cell 3"), "{}", text);
    assert!(text.contains("NameError"), "{}", text);
    let text = message(&report, "satisfaction_value");
    assert!(text.contains("cell 3 raised NameError"), "{}", text);
    assert!(report.get("imports").unwrap().passed);
    assert_eq!(report.points, report.max_points - 15 - 10);
    assert!(report.executed.is_none());
}

#[test]
fn accented_label_spellings_are_accepted() {
    for spelling in ["más o menos normal", "más o menos_normal", "mas o menos normal"] {
        let cells: Vec<String> = complete_cells(7)
            .into_iter()
            .map(|c| c.replace("'más o menos normal'", &format!("'{}'", spelling)))
            .collect();
        let report = grade(&cells, &ScriptedKernel::passing(72.5));
        assert!(
            report.get("membership_atencion_barista").unwrap().passed,
            "{}: {}",
            spelling,
            message(&report, "membership_atencion_barista")
        );
    }
}

#[test]
fn rule_count_threshold() {
    let at_seven = grade(&complete_cells(7), &ScriptedKernel::passing(50.0));
    assert!(at_seven.get("rules").unwrap().passed);

    let at_six = grade(&complete_cells(6), &ScriptedKernel::passing(50.0));
    assert!(!at_six.get("rules").unwrap().passed);
    assert_eq!(
        message(&at_six, "rules"),
        "Se esperan 7 reglas, pero solo se encontraron 6. Debes definir regla1, regla2, ..., regla7"
    );
}

#[test]
fn zero_code_cells_fail_text_checks_without_panicking() {
    let kernel = ScriptedKernel {
        satisfaction: None,
        ..ScriptedKernel::passing(0.0)
    };
    let report = grade(&[], &kernel);

    assert_eq!(report.source, "");
    assert!(report.get("notebook_exists").unwrap().passed);
    for id in ["student_info", "imports", "input_variables", "rules", "visualizations"] {
        assert!(!report.get(id).unwrap().passed, "{} should fail", id);
    }
    assert!(!report.get("satisfaction_value").unwrap().passed);
    assert!(message(&report, "satisfaction_value").contains("KeyError"));
}

#[test]
fn syntax_error_is_reported_apart_from_missing_import() {
    let mut cells = complete_cells(7);
    cells[1] = format!("{}\nprint((1, 2)", IMPORTS);
    let report = grade(&cells, &ScriptedKernel::passing(72.5));

    let imports = report.get("imports").unwrap();
    assert!(!imports.passed);
    let text = imports.message.as_deref().unwrap();
    assert!(text.starts_with("Error de sintaxis"), "{}", text);
    assert!(imports.span.is_some());

    let mut cells = complete_cells(7);
    cells[1] = IMPORTS.replace("import numpy as np\n", "");
    let report = grade(&cells, &ScriptedKernel::passing(72.5));
    let text = message(&report, "imports");
    assert!(text.starts_with("Falta el import de numpy"), "{}", text);
    assert!(report.get("imports").unwrap().span.is_none());
}

#[test]
fn out_of_range_value_reports_it() {
    let report = grade(&complete_cells(7), &ScriptedKernel::passing(150.0));
    assert_eq!(
        message(&report, "satisfaction_value"),
        "La satisfacción debe estar entre 0 y 100, pero se obtuvo 150.00"
    );
    assert_eq!(report.failures().count(), 1);
}

#[test]
fn source_failure_fails_runtime_checks_only() {
    let mut kernel = ScriptedKernel::passing(72.5);
    kernel.source_error = Some(ExecutionFailure::Timeout(Duration::from_secs(600)));
    let report = grade(&complete_cells(7), &kernel);

    let failed: Vec<_> = report.failures().map(|r| r.id.as_str()).collect();
    assert_eq!(failed, vec!["satisfaction_value"]);
    assert!(message(&report, "satisfaction_value").contains("timed out"));
}

#[test]
fn each_execution_mode_runs_once() {
    let kernel = ScriptedKernel::passing(72.5);
    grade(&complete_cells(7), &kernel);
    assert_eq!(kernel.notebook_calls.get(), 1);
    assert_eq!(kernel.source_calls.get(), 1);
}

#[test]
fn magic_lines_do_not_break_the_import_parse() {
    let mut cells = complete_cells(7);
    cells.insert(0, "!pip install scikit-fuzzy\n%matplotlib inline".to_string());
    let report = grade(&cells, &ScriptedKernel::passing(72.5));
    assert!(report.get("imports").unwrap().passed, "{}", message(&report, "imports"));
}

#[test]
fn missing_notebook_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = ScriptedKernel::passing(72.5);
    let grader = Grader::new(Rubric::builtin().unwrap(), &kernel);

    let err = grader.grade(&dir.path().join("Taller_3.ipynb")).unwrap_err();
    assert!(matches!(err, GradeError::Load(ref e) if e.is_missing()), "{:?}", err);
    assert_eq!(kernel.notebook_calls.get(), 0);

    let garbage = dir.path().join("roto.ipynb");
    std::fs::write(&garbage, "{ not json").unwrap();
    assert!(matches!(grader.grade(&garbage), Err(GradeError::Load(_))));
}
