//! Template rendering
//!
//! Converts model, test and macro templates to plain SQL.

use crate::context::RenderContext;
use crate::functions;
use crate::symbols::{SymbolError, SymbolTable};
use minijinja::{Environment, Error as JinjaError, ErrorKind, UndefinedBehavior};
use rivulet_core::{Diagnostic, DiagnosticCode, Location, Model, Relation, Severity};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error during template rendering
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    /// A ref, source, macro or variable could not be resolved
    #[error("Unresolved reference: {reference}")]
    UnresolvedReference {
        reference: String,
        file_path: Option<PathBuf>,
        line: Option<usize>,
    },

    /// A macro was called with an argument count outside `[required, max]`
    #[error("{message}")]
    MacroArity {
        name: String,
        message: String,
        file_path: Option<PathBuf>,
        line: Option<usize>,
    },

    /// Malformed template syntax or a failing expression
    #[error("Template error: {message}")]
    Template {
        message: String,
        file_path: Option<PathBuf>,
        line: Option<usize>,
    },
}

impl RenderError {
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::UnresolvedReference { file_path, .. }
            | Self::MacroArity { file_path, .. }
            | Self::Template { file_path, .. } => file_path.as_deref(),
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Self::UnresolvedReference { line, .. }
            | Self::MacroArity { line, .. }
            | Self::Template { line, .. } => *line,
        }
    }

    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::UnresolvedReference { .. } => DiagnosticCode::UnresolvedReference,
            Self::MacroArity { .. } => DiagnosticCode::MacroArity,
            Self::Template { .. } => DiagnosticCode::ParseError,
        }
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::new(self.code(), Severity::Error, self.to_string());

        if let Some(path) = self.file_path() {
            let mut location = Location::new(path.display().to_string());
            location.line = self.line();
            diag = diag.with_location(location);
        }

        diag
    }
}

/// Template renderer bound to one project's symbols
pub struct Renderer {
    env: Environment<'static>,
    symbols: Arc<SymbolTable>,
    context: RenderContext,
}

impl Renderer {
    /// Create a renderer; undefined names are strict errors
    pub fn new(symbols: SymbolTable, context: RenderContext) -> Self {
        let symbols = Arc::new(symbols);
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        functions::register_all(&mut env, symbols.clone(), Arc::new(context.vars.clone()));

        Self { env, symbols, context }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Check if text contains template syntax
    pub fn has_jinja(sql: &str) -> bool {
        sql.contains("{{") || sql.contains("{%") || sql.contains("{#")
    }

    /// Render a template. `this` is the relation of the model being rendered.
    pub fn render(&self, template: &str, this: Option<&Relation>, file_path: Option<&Path>) -> Result<String, RenderError> {
        if !Self::has_jinja(template) {
            return Ok(template.to_string());
        }

        self.env
            .render_str(template, self.context.globals(this))
            .map_err(|e| classify_error(e, file_path))
    }

    /// Render a model's template with `this` bound to its relation
    pub fn render_model(&self, model: &Model) -> Result<String, RenderError> {
        self.render(&model.raw_sql, Some(&model.relation), Some(&model.path))
    }

    /// Evaluate a bare expression such as `ref('dim_customers')`
    pub fn render_expression(&self, expression: &str, file_path: Option<&Path>) -> Result<String, RenderError> {
        let template = format!("{{{{ {} }}}}", expression);
        self.render(&template, None, file_path)
    }
}

/// Classify a MiniJinja error by the symbol failure that caused it, if any
fn classify_error(error: JinjaError, file_path: Option<&Path>) -> RenderError {
    let file_path = file_path.map(|p| p.to_path_buf());
    let line = error.line();

    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(&error);
    while let Some(err) = cause {
        if let Some(symbol) = err.downcast_ref::<SymbolError>() {
            return match symbol {
                SymbolError::MacroArity { name, .. } => RenderError::MacroArity {
                    name: name.clone(),
                    message: symbol.to_string(),
                    file_path,
                    line,
                },
                other => RenderError::UnresolvedReference {
                    reference: other.to_string(),
                    file_path,
                    line,
                },
            };
        }
        cause = err.source();
    }

    match error.kind() {
        ErrorKind::UndefinedError | ErrorKind::UnknownFunction => RenderError::UnresolvedReference {
            reference: error.detail().unwrap_or("undefined value").to_string(),
            file_path,
            line,
        },
        _ => RenderError::Template {
            message: error.to_string(),
            file_path,
            line,
        },
    }
}
