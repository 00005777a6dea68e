//! Project loading
//!
//! Discovers models, YAML declarations, macros and singular tests under a
//! project root and resolves each model's configuration.

use crate::schema_yml::{ColumnYml, ModelDecl, SchemaFile};
use rivulet_core::{
    ColumnDecl, Config, Diagnostic, DiagnosticCode, Location, Macro, Materialization, Model, Relation, Severity,
    Source, TestCase, TestTarget,
};
use rivulet_jinja::{parse_macros, MacroParseError};
use rivulet_sql::ReferenceExtractor;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Error while loading a project
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {}: {message}", .path.display())]
    Yaml { path: PathBuf, message: String },

    #[error(transparent)]
    Macro(#[from] MacroParseError),

    #[error("Model '{name}' is defined twice ({} and {})", .first.display(), .second.display())]
    DuplicateModel { name: String, first: PathBuf, second: PathBuf },

    #[error("Macro '{name}' is defined twice ({} and {})", .first.display(), .second.display())]
    DuplicateMacro { name: String, first: PathBuf, second: PathBuf },

    #[error("Invalid configuration in {}: {message}", .path.display())]
    InvalidConfig { path: PathBuf, message: String },

    #[error("Test id '{id}' is declared more than once")]
    DuplicateTest { id: String },
}

impl LoadError {
    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Macro(err) => err.to_diagnostic(),
            Self::DuplicateTest { id } => {
                Diagnostic::new(DiagnosticCode::ParseError, Severity::Error, self.to_string()).with_node(id.clone())
            }
            Self::Io { path, .. }
            | Self::Yaml { path, .. }
            | Self::InvalidConfig { path, .. }
            | Self::DuplicateModel { second: path, .. }
            | Self::DuplicateMacro { second: path, .. } => {
                Diagnostic::new(DiagnosticCode::ParseError, Severity::Error, self.to_string())
                    .with_location(Location::new(path.display().to_string()))
            }
        }
    }
}

/// A loaded project
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root
    pub root: PathBuf,

    pub config: Config,

    /// Models in declaration order (sorted by path)
    pub models: Vec<Model>,

    pub sources: Vec<Source>,

    pub macros: Vec<Macro>,

    /// Singular tests from `tests/`
    pub singular_tests: Vec<TestCase>,
}

impl Project {
    /// Load a project from disk
    pub fn load(root: &Path, config: Config) -> Result<Self, LoadError> {
        let mut sources = Vec::new();
        let mut model_decls: HashMap<String, (ModelDecl, PathBuf)> = HashMap::new();

        for path in discover(&root.join("models"), &["yml", "yaml"]) {
            let text = read(&path)?;
            let file = SchemaFile::from_yaml(&text).map_err(|e| LoadError::Yaml {
                path: relative(root, &path),
                message: e.to_string(),
            })?;

            sources.extend(build_sources(&file, &relative(root, &path), &config)?);
            for decl in file.models {
                model_decls.insert(decl.name.clone(), (decl, relative(root, &path)));
            }
        }

        let mut models: Vec<Model> = Vec::new();
        for path in discover(&root.join("models"), &["sql"]) {
            let raw_sql = read(&path)?;
            let rel_path = relative(root, &path);
            let name = file_stem(&path);

            if let Some(existing) = models.iter().find(|m| m.name == name) {
                return Err(LoadError::DuplicateModel {
                    name,
                    first: existing.path.clone(),
                    second: rel_path,
                });
            }

            let decl = model_decls.remove(&name);
            models.push(build_model(name, rel_path, raw_sql, decl, &config)?);
        }

        for (name, (_, path)) in &model_decls {
            tracing::warn!(model = %name, file = %path.display(), "YAML declares a model with no SQL file");
        }

        let mut macros: Vec<Macro> = Vec::new();
        for path in discover(&root.join("macros"), &["sql"]) {
            let text = read(&path)?;
            for m in parse_macros(&text, &relative(root, &path))? {
                if let Some(existing) = macros.iter().find(|e| e.name == m.name) {
                    return Err(LoadError::DuplicateMacro {
                        name: m.name.clone(),
                        first: existing.path.clone(),
                        second: m.path.clone(),
                    });
                }
                macros.push(m);
            }
        }

        let mut singular_tests = Vec::new();
        for path in discover(&root.join("tests"), &["sql"]) {
            let raw_sql = read(&path)?;
            let name = file_stem(&path);
            let declared = ReferenceExtractor::extract_config(&raw_sql)
                .get("severity")
                .map(|s| s.parse::<Severity>())
                .transpose()
                .map_err(|message| LoadError::InvalidConfig { path: relative(root, &path), message })?
                .unwrap_or_default();
            let severity = config.severity.get_severity(&name, declared);
            singular_tests.push(TestCase::singular(name, relative(root, &path), raw_sql, severity));
        }

        tracing::debug!(
            models = models.len(),
            sources = sources.len(),
            macros = macros.len(),
            singular_tests = singular_tests.len(),
            "Loaded project"
        );

        let project = Self {
            root: root.to_path_buf(),
            config,
            models,
            sources,
            macros,
            singular_tests,
        };
        project.check_unique_test_ids()?;

        Ok(project)
    }

    /// Results and severity overrides are keyed by test id
    fn check_unique_test_ids(&self) -> Result<(), LoadError> {
        let mut seen = HashSet::new();
        for test in self.tests() {
            if !seen.insert(test.id.as_str()) {
                return Err(LoadError::DuplicateTest { id: test.id.clone() });
            }
        }
        Ok(())
    }

    /// Build a project from already-loaded parts
    pub fn from_parts(config: Config, models: Vec<Model>, sources: Vec<Source>, macros: Vec<Macro>) -> Self {
        Self {
            root: config.project_root.clone(),
            config,
            models,
            sources,
            macros,
            singular_tests: Vec::new(),
        }
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Every test: generic tests on sources, then models, then singular tests
    pub fn tests(&self) -> Vec<&TestCase> {
        self.sources
            .iter()
            .flat_map(|s| s.tests())
            .chain(self.models.iter().flat_map(|m| m.tests()))
            .chain(self.singular_tests.iter())
            .collect()
    }
}

fn build_sources(file: &SchemaFile, path: &Path, config: &Config) -> Result<Vec<Source>, LoadError> {
    let mut sources = Vec::new();

    for decl in &file.sources {
        for table in &decl.tables {
            let relation = Relation::new(
                decl.database.clone().or_else(|| config.target.database.clone()),
                decl.schema.clone().unwrap_or_else(|| decl.name.clone()),
                table.identifier.clone().unwrap_or_else(|| table.name.clone()),
            );
            let target = TestTarget::Source {
                source_name: decl.name.clone(),
                table_name: table.name.clone(),
            };

            sources.push(Source {
                source_name: decl.name.clone(),
                table_name: table.name.clone(),
                relation,
                path: path.to_path_buf(),
                columns: build_columns(&table.columns, &target, path, config)?,
            });
        }
    }

    Ok(sources)
}

/// Resolve a model's configuration.
///
/// Precedence: `config()` in the SQL, then the YAML `config:` block, then
/// the project default.
fn build_model(
    name: String,
    path: PathBuf,
    raw_sql: String,
    decl: Option<(ModelDecl, PathBuf)>,
    config: &Config,
) -> Result<Model, LoadError> {
    let sql_config = ReferenceExtractor::extract_config(&raw_sql);
    let (decl, yml_path) = match decl {
        Some((decl, yml_path)) => (Some(decl), Some(yml_path)),
        None => (None, None),
    };
    let yml_config = decl.as_ref().map(|d| d.config.clone()).unwrap_or_default();

    let materialization = match sql_config.get("materialized").or(yml_config.materialized.as_ref()) {
        Some(value) => value
            .parse::<Materialization>()
            .map_err(|message| LoadError::InvalidConfig { path: path.clone(), message })?,
        None => config.default_materialization,
    };

    let relation = Relation::new(
        sql_config
            .get("database")
            .cloned()
            .or(yml_config.database)
            .or_else(|| config.target.database.clone()),
        sql_config
            .get("schema")
            .cloned()
            .or(yml_config.schema)
            .unwrap_or_else(|| config.target.schema.clone()),
        sql_config
            .get("alias")
            .cloned()
            .or(yml_config.alias)
            .unwrap_or_else(|| name.clone()),
    );

    let target = TestTarget::Model { name: name.clone() };
    let columns = match (&decl, &yml_path) {
        (Some(decl), Some(yml_path)) => build_columns(&decl.columns, &target, yml_path, config)?,
        _ => Vec::new(),
    };

    Ok(Model {
        description: decl.map(|d| d.description).unwrap_or_default(),
        name,
        path,
        raw_sql,
        materialization,
        relation,
        columns,
    })
}

fn build_columns(
    columns: &[ColumnYml],
    target: &TestTarget,
    path: &Path,
    config: &Config,
) -> Result<Vec<ColumnDecl>, LoadError> {
    columns
        .iter()
        .map(|column| {
            let tests = column
                .tests
                .iter()
                .map(|test| {
                    let (kind, declared) = test.resolve().map_err(|message| LoadError::InvalidConfig {
                        path: path.to_path_buf(),
                        message: format!("column '{}': {}", column.name, message),
                    })?;
                    let mut case = TestCase::generic(target.clone(), column.name.clone(), kind, declared.unwrap_or_default());
                    case.severity = config.severity.get_severity(&case.id, case.severity);
                    Ok(case)
                })
                .collect::<Result<Vec<_>, LoadError>>()?;

            Ok(ColumnDecl {
                name: column.name.clone(),
                description: column.description.clone(),
                tests,
            })
        })
        .collect()
}

/// Files under `dir` with one of `extensions`, sorted by path
fn discover(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();

    files.sort();
    files
}

fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
