//! Pre-flight validation and compilation
//!
//! Everything that can be checked without a warehouse is checked here:
//! dependency graph, node selection, template rendering of every model and
//! test, and (optionally) SQL syntax. Any structural problem aborts the run
//! before a single statement is issued.

use crate::materializer::CompiledModel;
use crate::planner::ExecutionPlan;
use crate::testing::{compile_test, CompiledTest};
use rivulet_core::checksum::sha256_hex;
use rivulet_core::{Diagnostic, Materialization, NodeId};
use rivulet_jinja::{RenderContext, Renderer, SymbolTable};
use rivulet_project::{DependencyGraph, Project};
use rivulet_sql::SqlParser;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Structural errors found before execution
#[derive(Debug, Clone, thiserror::Error)]
#[error("pre-flight validation failed with {} error(s)", .diagnostics.len())]
pub struct PreflightError {
    pub diagnostics: Vec<Diagnostic>,
}

impl PreflightError {
    fn single(diagnostic: Diagnostic) -> Self {
        Self { diagnostics: vec![diagnostic] }
    }
}

/// A validated project: graph, plan, and rendered SQL for every node
#[derive(Debug, Clone)]
pub struct CompiledProject {
    pub graph: DependencyGraph,
    pub plan: ExecutionPlan,

    /// Selected model ids
    pub selected: HashSet<NodeId>,

    /// Every model, rendered, keyed by node id
    pub models: HashMap<NodeId, CompiledModel>,

    /// Tests included by the selection, in declaration order
    pub tests: Vec<CompiledTest>,
}

impl CompiledProject {
    pub fn model(&self, node_id: &str) -> Option<&CompiledModel> {
        self.models.get(node_id)
    }

    /// Rendered models in declaration order
    pub fn models_in_order(&self) -> Vec<&CompiledModel> {
        self.graph
            .models()
            .into_iter()
            .filter_map(|id| self.models.get(id))
            .collect()
    }

    /// Planned models in wave order
    pub fn planned_models(&self) -> Vec<&CompiledModel> {
        self.plan
            .waves()
            .iter()
            .flatten()
            .filter_map(|id| self.models.get(id))
            .collect()
    }
}

/// Validate and compile a project for the given node selectors.
///
/// All rendering and parse problems are collected, so one pass reports
/// every broken file.
pub fn preflight(project: &Project, selectors: &[String]) -> Result<CompiledProject, PreflightError> {
    let graph = DependencyGraph::build_with_macros(&project.models, &project.sources, &project.macros)
        .map_err(|errors| PreflightError {
            diagnostics: errors.iter().map(|e| e.to_diagnostic()).collect(),
        })?;

    let selected = graph
        .select(selectors)
        .map_err(|e| PreflightError::single(e.to_diagnostic()))?;

    let plan = ExecutionPlan::build(&graph, &selected)
        .map_err(|e| PreflightError::single(e.to_diagnostic()))?;

    let renderer = Renderer::new(
        SymbolTable::from_parts(&project.models, &project.sources, &project.macros),
        RenderContext::from_config(&project.config),
    );
    let parser = SqlParser::from_dialect(&project.config.dialect);

    let mut diagnostics = Vec::new();
    let mut models = HashMap::new();

    for model in &project.models {
        let rendered = match renderer.render_model(model) {
            Ok(sql) => sql,
            Err(e) => {
                diagnostics.push(e.to_diagnostic().with_node(model.name.clone()));
                continue;
            }
        };

        let compiled = CompiledModel::new(model, &rendered);

        if project.config.validate_sql {
            if let Err(e) = parser.validate_query(&compiled.sql, Some(&model.path)) {
                diagnostics.push(e.to_diagnostic().with_node(model.name.clone()));
                continue;
            }
        }

        models.insert(compiled.node_id.clone(), compiled);
    }

    let mut tests = Vec::new();
    for test in project.tests() {
        match compile_test(test, &renderer) {
            Ok(compiled) => {
                if is_test_selected(&compiled, selectors, &selected) {
                    tests.push(compiled);
                }
            }
            Err(e) => diagnostics.push(e.to_diagnostic().with_node(test.id.clone())),
        }
    }

    if !diagnostics.is_empty() {
        return Err(PreflightError { diagnostics });
    }

    tracing::info!(
        models = models.len(),
        selected = selected.len(),
        waves = plan.len(),
        tests = tests.len(),
        "pre-flight passed"
    );

    Ok(CompiledProject {
        graph,
        plan,
        selected,
        models,
        tests,
    })
}

/// With selectors, a test runs when every model it guards is selected
fn is_test_selected(test: &CompiledTest, selectors: &[String], selected: &HashSet<NodeId>) -> bool {
    selectors.is_empty() || (!test.blocks.is_empty() && test.blocks.iter().all(|id| selected.contains(id)))
}

/// One entry of `target/compiled/manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub model: String,
    pub relation: String,
    pub materialization: Materialization,

    /// Compiled file, relative to the output directory
    pub path: PathBuf,

    /// sha256 of the compiled SQL
    pub checksum: String,
}

/// Checksums of the compiled SQL files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileManifest {
    pub generated_at: String,
    pub models: Vec<ManifestEntry>,
}

/// Write `<out>/<model>.sql` for every model plus `<out>/manifest.json`
pub fn write_compiled(compiled: &CompiledProject, out_dir: &Path) -> std::io::Result<CompileManifest> {
    std::fs::create_dir_all(out_dir)?;

    let mut entries = Vec::new();
    for model in compiled.models_in_order() {
        let file_name = PathBuf::from(format!("{}.sql", model.name));
        std::fs::write(out_dir.join(&file_name), format!("{}\n", model.sql))?;

        entries.push(ManifestEntry {
            model: model.name.clone(),
            relation: model.relation.fqn(),
            materialization: model.materialization,
            path: file_name,
            checksum: sha256_hex(&model.sql),
        });
    }

    let manifest = CompileManifest {
        generated_at: chrono::Utc::now().to_rfc3339(),
        models: entries,
    };

    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    std::fs::write(out_dir.join("manifest.json"), json)?;

    Ok(manifest)
}
