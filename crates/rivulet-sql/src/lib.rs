//! SQL scanning and validation
//!
//! This crate handles:
//! - Static extraction of template calls (ref, source, config)
//! - Parsing rendered SQL using datafusion-sqlparser-rs
//! - Extracting location information for diagnostics

pub mod parser;
pub mod refs;

pub use parser::{SqlParser, ParseError};
pub use refs::{LocatedCall, LocatedReference, ReferenceExtractor, StaticReference};
