//! Template rendering for SQL models
//!
//! This crate handles:
//! - A typed symbol table of refs, sources and macros
//! - Rendering model and test templates to plain SQL
//! - Providing template context (ref, source, var, config, this, target)
//! - Parsing macro definition files
//! - Error handling with detailed diagnostics

pub mod context;
pub mod functions;
pub mod macros;
pub mod renderer;
pub mod symbols;

pub use context::{RenderContext, RenderContextBuilder, TargetContext};
pub use macros::{parse_macros, MacroParseError};
pub use renderer::{RenderError, Renderer};
pub use symbols::{MacroSymbol, RefSymbol, SourceSymbol, SymbolError, SymbolTable};
