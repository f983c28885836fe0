use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;

use notebook::Document;

/// Outcome of one rubric check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub id: String,
    pub title: String,
    pub weight: u32,
    pub passed: bool,
    /// Why the check failed, written for the submitter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra information on success (e.g. a computed value).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Byte range into the extracted source, for syntax failures.
    #[serde(skip)]
    pub span: Option<Range<usize>>,
}

impl CheckResult {
    pub fn pass(id: &str, title: &str, weight: u32, detail: Option<String>) -> Self {
        CheckResult {
            id: id.to_string(),
            title: title.to_string(),
            weight,
            passed: true,
            message: None,
            detail,
            span: None,
        }
    }

    pub fn fail(
        id: &str,
        title: &str,
        weight: u32,
        message: String,
        span: Option<Range<usize>>,
    ) -> Self {
        CheckResult {
            id: id.to_string(),
            title: title.to_string(),
            weight,
            passed: false,
            message: Some(message),
            detail: None,
            span,
        }
    }

    /// Points earned: the full weight or nothing.
    pub fn points(&self) -> u32 {
        if self.passed { self.weight } else { 0 }
    }
}

/// All check results of one grading run, in rubric order.
#[derive(Debug, Clone, Serialize)]
pub struct RubricReport {
    pub notebook: PathBuf,
    pub results: Vec<CheckResult>,
    pub points: u32,
    pub max_points: u32,
    /// `points` scaled to 0–100.
    pub percent: f64,
    /// The extracted source the spans refer to.
    #[serde(skip)]
    pub source: String,
    /// The notebook with outputs attached, when full execution succeeded.
    #[serde(skip)]
    pub executed: Option<Document>,
}

impl RubricReport {
    pub fn new(
        notebook: PathBuf,
        results: Vec<CheckResult>,
        source: String,
        executed: Option<Document>,
    ) -> Self {
        let points: u32 = results.iter().map(CheckResult::points).sum();
        let max_points: u32 = results.iter().map(|r| r.weight).sum();
        let percent = if max_points == 0 {
            0.0
        } else {
            f64::from(points) * 100.0 / f64::from(max_points)
        };
        RubricReport {
            notebook,
            results,
            points,
            max_points,
            percent,
            source,
            executed,
        }
    }

    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn get(&self, id: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_percent() {
        let report = RubricReport::new(
            PathBuf::from("Taller_3.ipynb"),
            vec![
                CheckResult::pass("a", "A", 3, None),
                CheckResult::fail("b", "B", 5, "falta".into(), None),
                CheckResult::pass("c", "C", 2, Some("ok".into())),
            ],
            String::new(),
            None,
        );
        assert_eq!(report.points, 5);
        assert_eq!(report.max_points, 10);
        assert_eq!(report.percent, 50.0);
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.get("b").and_then(|r| r.message.as_deref()), Some("falta"));
    }

    #[test]
    fn json_shape() {
        let report = RubricReport::new(
            PathBuf::from("n.ipynb"),
            vec![CheckResult::pass("a", "A", 3, None)],
            "x = 1".into(),
            None,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["points"], 3);
        assert_eq!(json["results"][0]["passed"], true);
        assert!(json["results"][0].get("message").is_none());
        assert!(json.get("source").is_none());
    }
}
