//! Template functions
//!
//! Implements ref(), source(), var(), config() and one function per macro.
//! Resolution failures carry a [`SymbolError`] as the error source so the
//! renderer can classify them.

use crate::symbols::{MacroSymbol, SymbolError, SymbolTable};
use minijinja::value::{Object, Rest};
use minijinja::{Environment, Error, ErrorKind, State, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn symbol_error(error: SymbolError) -> Error {
    Error::new(ErrorKind::InvalidOperation, error.to_string()).with_source(error)
}

/// Register every project function on the environment
pub(crate) fn register_all(
    env: &mut Environment<'static>,
    symbols: Arc<SymbolTable>,
    vars: Arc<BTreeMap<String, serde_json::Value>>,
) {
    let table = symbols.clone();
    env.add_function("ref", move |first: String, second: Option<String>| {
        ref_function(&table, first, second)
    });

    let table = symbols.clone();
    env.add_function("source", move |source_name: String, table_name: String| {
        source_function(&table, &source_name, &table_name)
    });

    env.add_function("var", move |name: String, default: Option<Value>| {
        var_function(&vars, &name, default)
    });

    env.add_function("config", config_function);

    for symbol in symbols.macros() {
        env.add_global(symbol.name.clone(), Value::from_object(MacroFunction(symbol.clone())));
    }
}

/// ref('model') or ref('package', 'model') → fully-qualified relation
///
/// The package argument is accepted but not checked; a project has a
/// single namespace.
pub fn ref_function(symbols: &SymbolTable, first: String, second: Option<String>) -> Result<Value, Error> {
    let model_name = second.unwrap_or(first);
    let symbol = symbols.resolve_ref(&model_name).map_err(symbol_error)?;
    Ok(Value::from(symbol.relation.fqn()))
}

/// source('source_name', 'table_name') → fully-qualified relation
pub fn source_function(symbols: &SymbolTable, source_name: &str, table_name: &str) -> Result<Value, Error> {
    let symbol = symbols
        .resolve_source(source_name, table_name)
        .map_err(symbol_error)?;
    Ok(Value::from(symbol.relation.fqn()))
}

/// var('name') or var('name', default)
pub fn var_function(
    vars: &BTreeMap<String, serde_json::Value>,
    name: &str,
    default: Option<Value>,
) -> Result<Value, Error> {
    match (vars.get(name), default) {
        (Some(value), _) => Ok(Value::from_serialize(value)),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(symbol_error(SymbolError::UnknownVariable(name.to_string()))),
    }
}

/// config(...) is metadata for the loader and renders to nothing
pub fn config_function(_args: Rest<Value>) -> Result<Value, Error> {
    Ok(Value::from(""))
}

/// A macro exposed as a callable template global
#[derive(Debug)]
struct MacroFunction(MacroSymbol);

impl Object for MacroFunction {
    /// Render the macro body with its parameters bound.
    ///
    /// Arguments are positional. Missing trailing arguments take their
    /// default expression, evaluated in the same environment.
    fn call(self: &Arc<Self>, state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let symbol = &self.0;
        symbol.check_arity(args.len()).map_err(symbol_error)?;

        let mut locals: BTreeMap<String, Value> = BTreeMap::new();
        for name in ["this", "target"] {
            if let Some(value) = state.lookup(name) {
                locals.insert(name.to_string(), value);
            }
        }

        let mut source = String::new();
        for (idx, param) in symbol.params.iter().enumerate() {
            match args.get(idx) {
                Some(value) => {
                    locals.insert(param.name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &param.default {
                        source.push_str(&format!("{{% set {} = ({}) %}}", param.name, default));
                    }
                }
            }
        }
        source.push_str(&symbol.body);

        let rendered = state.env().render_str(&source, &locals)?;
        Ok(Value::from_safe_string(rendered))
    }
}
