//! Rivulet engine - planning and execution
//!
//! This crate turns a loaded project into warehouse work:
//! - Pre-flight validation and compilation
//! - Wave planning over the dependency graph
//! - View/table materialization
//! - Data tests with severities
//! - Run orchestration with skip propagation and cancellation
//! - Scheduler export (JSON task graph, Airflow DAG)

pub mod materializer;
pub mod pipeline;
pub mod planner;
pub mod preflight;
pub mod scheduler;
pub mod testing;

pub use materializer::{CompiledModel, Materializer};
pub use pipeline::{CancellationFlag, Pipeline};
pub use planner::ExecutionPlan;
pub use preflight::{preflight, write_compiled, CompileManifest, CompiledProject, ManifestEntry, PreflightError};
pub use scheduler::{Task, TaskGraph};
pub use testing::{compile_test, CompiledTest, TestRunner};
