//! Project loading and DAG construction
//!
//! This crate handles:
//! - Discovering models, macros and tests under a project root
//! - Parsing YAML declarations (sources, model config, column tests)
//! - Building dependency graphs (DAG) with cycle detection
//! - Impact analysis (upstream and downstream dependencies)

pub mod dag;
pub mod project;
pub mod schema_yml;

pub use dag::{DependencyGraph, GraphError, NodeKind};
pub use project::{LoadError, Project};
pub use schema_yml::{ModelDecl, SchemaFile, SourceDecl, TestYml};
