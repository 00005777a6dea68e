//! Typed symbol table for template resolution
//!
//! Every name a template can resolve is registered here with an explicit
//! kind, so lookups never fall back to the raw name.

use rivulet_core::{Macro, MacroParam, Model, Relation, Source};
use std::collections::{BTreeMap, HashMap};

/// `ref('name')` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSymbol {
    pub model_name: String,
    pub relation: Relation,
}

/// `source('source', 'table')` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSymbol {
    pub source_name: String,
    pub table_name: String,
    pub relation: Relation,
}

/// A callable macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroSymbol {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: String,
}

impl MacroSymbol {
    pub fn required_args(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    pub fn max_args(&self) -> usize {
        self.params.len()
    }

    /// Check an argument count against `[required, max]`
    pub fn check_arity(&self, got: usize) -> Result<(), SymbolError> {
        let required = self.required_args();
        let max = self.max_args();
        if got < required || got > max {
            return Err(SymbolError::MacroArity {
                name: self.name.clone(),
                required,
                max,
                got,
            });
        }
        Ok(())
    }
}

impl From<&Macro> for MacroSymbol {
    fn from(m: &Macro) -> Self {
        Self {
            name: m.name.clone(),
            params: m.params.clone(),
            body: m.body.clone(),
        }
    }
}

/// Resolution failure raised from inside a template function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("ref('{0}') does not match any model")]
    UnknownModel(String),

    #[error("source('{0}', '{1}') is not declared")]
    UnknownSource(String, String),

    #[error("var('{0}') is not defined and has no default")]
    UnknownVariable(String),

    #[error("macro '{name}' takes {} argument(s) but {got} were given", arity_range(.required, .max))]
    MacroArity {
        name: String,
        required: usize,
        max: usize,
        got: usize,
    },
}

fn arity_range(required: &usize, max: &usize) -> String {
    if required == max {
        required.to_string()
    } else {
        format!("{} to {}", required, max)
    }
}

/// All names resolvable by the renderer
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    refs: HashMap<String, RefSymbol>,
    sources: HashMap<(String, String), SourceSymbol>,
    macros: BTreeMap<String, MacroSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from loaded project parts
    pub fn from_parts(models: &[Model], sources: &[Source], macros: &[Macro]) -> Self {
        let mut table = Self::new();
        for model in models {
            table.add_model(model);
        }
        for source in sources {
            table.add_source(source);
        }
        for m in macros {
            table.add_macro(MacroSymbol::from(m));
        }
        table
    }

    pub fn add_model(&mut self, model: &Model) -> &mut Self {
        self.refs.insert(
            model.name.clone(),
            RefSymbol {
                model_name: model.name.clone(),
                relation: model.relation.clone(),
            },
        );
        self
    }

    pub fn add_source(&mut self, source: &Source) -> &mut Self {
        self.sources.insert(
            (source.source_name.clone(), source.table_name.clone()),
            SourceSymbol {
                source_name: source.source_name.clone(),
                table_name: source.table_name.clone(),
                relation: source.relation.clone(),
            },
        );
        self
    }

    pub fn add_macro(&mut self, symbol: MacroSymbol) -> &mut Self {
        self.macros.insert(symbol.name.clone(), symbol);
        self
    }

    pub fn resolve_ref(&self, model_name: &str) -> Result<&RefSymbol, SymbolError> {
        self.refs
            .get(model_name)
            .ok_or_else(|| SymbolError::UnknownModel(model_name.to_string()))
    }

    pub fn resolve_source(&self, source_name: &str, table_name: &str) -> Result<&SourceSymbol, SymbolError> {
        self.sources
            .get(&(source_name.to_string(), table_name.to_string()))
            .ok_or_else(|| SymbolError::UnknownSource(source_name.to_string(), table_name.to_string()))
    }

    pub fn macro_symbol(&self, name: &str) -> Option<&MacroSymbol> {
        self.macros.get(name)
    }

    pub fn macros(&self) -> impl Iterator<Item = &MacroSymbol> {
        self.macros.values()
    }
}
