//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the run report format.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Pre-flight structural errors (1xxx)
    /// Malformed template, macro file, or YAML declaration
    ParseError,

    /// A symbol in a template could not be resolved by the renderer
    UnresolvedReference,

    /// A macro was invoked with the wrong number of arguments
    MacroArity,

    /// A ref()/source() target does not exist in the project
    UnknownReference,

    /// The model graph contains a cycle
    CyclicDependency,

    // Runtime errors (2xxx)
    /// The warehouse rejected a model's materialization statement
    MaterializationFailed,

    /// A model was not executed because of an upstream problem
    ModelSkipped,

    // Data tests (3xxx)
    /// A data test returned violating rows
    TestViolation,

    /// A data test could not run (upstream failure or query error)
    TestSkipped,

    // General (9xxx)
    /// General informational message
    Info,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::UnresolvedReference => "UNRESOLVED_REFERENCE",
            Self::MacroArity => "MACRO_ARITY",
            Self::UnknownReference => "UNKNOWN_REFERENCE",
            Self::CyclicDependency => "CYCLIC_DEPENDENCY",
            Self::MaterializationFailed => "MATERIALIZATION_FAILED",
            Self::ModelSkipped => "MODEL_SKIPPED",
            Self::TestViolation => "TEST_VIOLATION",
            Self::TestSkipped => "TEST_SKIPPED",
            Self::Info => "INFO",
        }
    }

    /// Whether this code is raised by the pre-flight validation pass
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ParseError
                | Self::UnresolvedReference
                | Self::MacroArity
                | Self::UnknownReference
                | Self::CyclicDependency
        )
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity level
///
/// Shared by diagnostics and data tests: a test declared `warn` produces a
/// `Warn` diagnostic when violated and never fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - recorded but not blocking
    Warn,

    /// Error - fails the run
    Error,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to project root
    pub file: String,

    /// Optional line number (1-indexed)
    pub line: Option<usize>,

    /// Optional column number (1-indexed)
    pub column: Option<usize>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }

    /// Create a location with file and line number
    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            column: None,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{}:{}", self.file, line, column),
            (Some(line), None) => write!(f, "{}:{}", self.file, line),
            _ => write!(f, "{}", self.file),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Node the diagnostic is about (model name, test id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Source location (best-effort)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Downstream models impacted by this issue
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            node: None,
            location: None,
            impact: Vec::new(),
        }
    }

    /// Shorthand for an error-severity diagnostic
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    /// Set the node this diagnostic is attached to
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set downstream impact
    pub fn with_impact(mut self, impact: Vec<String>) -> Self {
        self.impact = impact;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        assert_eq!(DiagnosticCode::CyclicDependency.as_str(), "CYCLIC_DEPENDENCY");
        assert_eq!(DiagnosticCode::TestViolation.as_str(), "TEST_VIOLATION");
        assert!(DiagnosticCode::MacroArity.is_structural());
        assert!(!DiagnosticCode::MaterializationFailed.is_structural());
    }

    #[test]
    fn severity_parsing_and_order() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!("ERROR".parse::<Severity>().unwrap(), Severity::Error);
        assert!("fatal".parse::<Severity>().is_err());
        assert!(Severity::Error > Severity::Warn);
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::error(DiagnosticCode::UnknownReference, "ref('missing') is not a model")
            .with_node("fct_orders")
            .with_location(Location::with_line("models/fct_orders.sql", 3));

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("UNKNOWN_REFERENCE"));
        assert!(json.contains("\"error\""));
        assert!(!json.contains("impact"));
        assert_eq!(diag.location.unwrap().to_string(), "models/fct_orders.sql:3");
    }
}
