//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::diagnostic::{Diagnostic, DiagnosticCode, Severity};
use crate::model::Materialization;
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Why a model was not executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// An upstream model failed to materialize
    UpstreamFailure { upstream: String },

    /// An upstream model's error-severity test failed (per-wave policy)
    UpstreamTestFailure { upstream: String },

    /// The run was cancelled before this model started
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamFailure { upstream } => write!(f, "upstream model '{}' failed", upstream),
            Self::UpstreamTestFailure { upstream } => {
                write!(f, "tests on upstream model '{}' failed", upstream)
            }
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Terminal status of a model in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Success,
    Failed { reason: String },
    Skipped(SkipReason),
}

impl ModelStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed { .. } => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Per-model outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: String,
    pub relation: String,
    pub materialization: Materialization,
    pub wave: usize,
    #[serde(flatten)]
    pub status: ModelStatus,
    pub duration_ms: u64,
}

/// Outcome of a data test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// No violating rows
    Passed,

    /// Violations on a warn-severity test
    Warned,

    /// Violations on an error-severity test
    Failed,

    /// Not evaluated because an upstream model was not built
    Skipped,
}

/// Per-test outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub kind: String,
    pub severity: Severity,
    pub status: TestStatus,

    /// Number of violating rows
    pub failures: u64,

    /// Node the test is attached to (generic tests)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Error or skip explanation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub duration_ms: u64,
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub models_succeeded: usize,
    pub models_failed: usize,
    pub models_skipped: usize,
    pub tests_passed: usize,
    pub tests_warned: usize,
    pub tests_failed: usize,
    pub tests_skipped: usize,
    pub waves: usize,
    pub elapsed_ms: u64,
}

/// Run report (run_results.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Whether the run succeeded (no error-severity failure)
    pub success: bool,

    pub summary: RunSummary,

    pub models: Vec<ModelResult>,

    pub tests: Vec<TestResult>,

    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            success: true,
            summary: RunSummary::default(),
            models: Vec::new(),
            tests: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// A report for a run aborted during pre-flight validation
    pub fn from_preflight(diagnostics: Vec<Diagnostic>) -> Self {
        let mut report = Self::new();
        for diagnostic in diagnostics {
            report.add_diagnostic(diagnostic);
        }
        report
    }

    /// Record a model outcome
    pub fn add_model(&mut self, result: ModelResult) {
        match &result.status {
            ModelStatus::Success => self.summary.models_succeeded += 1,
            ModelStatus::Failed { reason } => {
                self.summary.models_failed += 1;
                self.success = false;
                self.diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::MaterializationFailed,
                        format!("Model '{}' failed to materialize: {}", result.model, reason),
                    )
                    .with_node(result.model.clone()),
                );
            }
            ModelStatus::Skipped(reason) => {
                self.summary.models_skipped += 1;
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticCode::ModelSkipped,
                        Severity::Warn,
                        format!("Model '{}' skipped: {}", result.model, reason),
                    )
                    .with_node(result.model.clone()),
                );
            }
        }
        self.models.push(result);
    }

    /// Record a test outcome
    pub fn add_test(&mut self, result: TestResult) {
        match result.status {
            TestStatus::Passed => self.summary.tests_passed += 1,
            TestStatus::Warned => {
                self.summary.tests_warned += 1;
                self.diagnostics.push(violation_diagnostic(&result, Severity::Warn));
            }
            TestStatus::Failed => {
                self.summary.tests_failed += 1;
                self.success = false;
                self.diagnostics.push(violation_diagnostic(&result, Severity::Error));
            }
            TestStatus::Skipped => {
                self.summary.tests_skipped += 1;
                let message = result.message.clone().unwrap_or_else(|| "not evaluated".to_string());
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticCode::TestSkipped,
                        Severity::Warn,
                        format!("Test '{}' skipped: {}", result.test_id, message),
                    )
                    .with_node(result.test_id.clone()),
                );
            }
        }
        self.tests.push(result);
    }

    /// Add a free-standing diagnostic; error severity fails the run
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            self.success = false;
        }
        self.diagnostics.push(diagnostic);
    }

    /// Find a model result by name
    pub fn model(&self, name: &str) -> Option<&ModelResult> {
        self.models.iter().find(|m| m.model == name)
    }

    /// Find a test result by id
    pub fn test(&self, test_id: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.test_id == test_id)
    }

    /// Process exit code: non-zero iff an error-severity failure occurred
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

fn violation_diagnostic(result: &TestResult, severity: Severity) -> Diagnostic {
    let mut diag = Diagnostic::new(
        DiagnosticCode::TestViolation,
        severity,
        format!(
            "Test '{}' ({}) found {} violating row(s)",
            result.test_id, result.kind, result.failures
        ),
    );
    if let Some(node) = &result.node {
        diag = diag.with_node(node.clone());
    }
    diag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, status: ModelStatus) -> ModelResult {
        ModelResult {
            model: name.to_string(),
            relation: format!("db.schema.{}", name),
            materialization: Materialization::View,
            wave: 0,
            status,
            duration_ms: 1,
        }
    }

    fn test(id: &str, severity: Severity, status: TestStatus, failures: u64) -> TestResult {
        TestResult {
            test_id: id.to_string(),
            kind: "unique".to_string(),
            severity,
            status,
            failures,
            node: Some("model.orders".to_string()),
            message: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn empty_report() {
        let report = RunReport::new();
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert!(report.success);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn warn_violation_keeps_run_successful() {
        let mut report = RunReport::new();
        report.add_model(model("orders", ModelStatus::Success));
        report.add_test(test("unique_orders_id", Severity::Warn, TestStatus::Warned, 3));

        assert!(report.success);
        assert_eq!(report.summary.tests_warned, 1);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].severity, Severity::Warn);
    }

    #[test]
    fn error_violation_fails_run() {
        let mut report = RunReport::new();
        report.add_test(test("unique_orders_id", Severity::Error, TestStatus::Failed, 1));
        assert!(!report.success);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn failed_and_skipped_models() {
        let mut report = RunReport::new();
        report.add_model(model("a", ModelStatus::Failed { reason: "boom".into() }));
        report.add_model(model(
            "b",
            ModelStatus::Skipped(SkipReason::UpstreamFailure { upstream: "a".into() }),
        ));

        assert!(!report.success);
        assert_eq!(report.summary.models_failed, 1);
        assert_eq!(report.summary.models_skipped, 1);
        assert_eq!(report.model("b").unwrap().status.label(), "skipped");
    }

    #[test]
    fn report_serialization() {
        let mut report = RunReport::new();
        report.add_model(model("orders", ModelStatus::Failed { reason: "syntax".into() }));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"status\": \"failed\""));
        assert!(json.contains("MATERIALIZATION_FAILED"));
    }
}
