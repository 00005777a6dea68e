//! Rivulet Core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the run report format.

pub mod diagnostic;
pub mod model;
pub mod report;
pub mod config;
pub mod checksum;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use model::{
    model_id, source_id, ColumnDecl, Macro, MacroParam, Materialization, Model, NodeId, Relation,
    Source, TestCase, TestDefinition, TestKind, TestTarget,
};
pub use report::{ModelResult, ModelStatus, ReportVersion, RunReport, RunSummary, SkipReason, TestResult, TestStatus};
pub use config::{Config, ConfigError, DialectConfig, SeverityThreshold, TargetConfig, TestPolicy, WarehouseConfig};
