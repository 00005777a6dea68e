//! SQL syntax validation using datafusion-sqlparser-rs
//!
//! Rendered model SQL is parsed during pre-flight so syntax errors surface
//! before any statement reaches the warehouse.

use rivulet_core::{Diagnostic, DiagnosticCode, DialectConfig, Location, Severity};
use sqlparser::ast::Statement;
use sqlparser::dialect::{AnsiDialect, BigQueryDialect, Dialect, PostgreSqlDialect, SnowflakeDialect};
use sqlparser::parser::{Parser, ParserError};
use std::path::{Path, PathBuf};

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Box<dyn Dialect + Send + Sync>,
}

impl SqlParser {
    /// Create a new SQL parser with the ANSI dialect
    pub fn new() -> Self {
        Self {
            dialect: Box::new(AnsiDialect {}),
        }
    }

    /// Create a parser from a dialect config
    pub fn from_dialect(dialect: &DialectConfig) -> Self {
        let dialect: Box<dyn Dialect + Send + Sync> = match dialect {
            DialectConfig::BigQuery => Box::new(BigQueryDialect {}),
            DialectConfig::Snowflake => Box::new(SnowflakeDialect {}),
            DialectConfig::Postgres => Box::new(PostgreSqlDialect {}),
            DialectConfig::Ansi => Box::new(AnsiDialect {}),
        };
        Self { dialect }
    }

    /// Parse SQL string into statements
    pub fn parse(&self, sql: &str, file_path: Option<&Path>) -> Result<Vec<Statement>, ParseError> {
        Parser::parse_sql(&*self.dialect, sql).map_err(|error| ParseError {
            error,
            file_path: file_path.map(|p| p.to_path_buf()),
        })
    }

    /// Check that `sql` is exactly one query (what a model must render to)
    pub fn validate_query(&self, sql: &str, file_path: Option<&Path>) -> Result<(), ParseError> {
        let statements = self.parse(sql, file_path)?;

        match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [] => Err(ParseError::custom("model renders to an empty statement", file_path)),
            [_] => Err(ParseError::custom("model must render to a single SELECT query", file_path)),
            _ => Err(ParseError::custom(
                format!("model renders to {} statements, expected one query", statements.len()),
                file_path,
            )),
        }
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// SQL parse error with location
#[derive(Debug, thiserror::Error)]
#[error("SQL parse error{}: {error}", .file_path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
pub struct ParseError {
    /// The underlying parser error
    pub error: ParserError,

    /// Source file path (if any)
    pub file_path: Option<PathBuf>,
}

impl ParseError {
    fn custom(message: impl Into<String>, file_path: Option<&Path>) -> Self {
        Self {
            error: ParserError::ParserError(message.into()),
            file_path: file_path.map(|p| p.to_path_buf()),
        }
    }

    /// Extract line/column from the error message ("... at Line: 3, Column: 7")
    pub fn position(&self) -> Option<(usize, usize)> {
        let message = self.error.to_string();
        let line_idx = message.find("Line: ")?;
        let rest = &message[line_idx + 6..];
        let line: usize = rest.split(',').next()?.trim().parse().ok()?;
        let col_idx = rest.find("Column: ")?;
        let column: usize = rest[col_idx + 8..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok()?;
        Some((line, column))
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::new(DiagnosticCode::ParseError, Severity::Error, self.to_string());

        if let Some(path) = &self.file_path {
            let mut location = Location::new(path.display().to_string());
            if let Some((line, column)) = self.position() {
                location.line = Some(line);
                location.column = Some(column);
            }
            diag = diag.with_location(location);
        }

        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::new();
        let statements = parser.parse("SELECT id, name FROM users", None).unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn validate_query_accepts_cte() {
        let parser = SqlParser::from_dialect(&DialectConfig::Snowflake);
        let sql = "with o as (select o_orderkey as order_key from db.tpch.orders) select * from o";
        assert!(parser.validate_query(sql, None).is_ok());
    }

    #[test]
    fn validate_query_rejects_ddl_and_multiple_statements() {
        let parser = SqlParser::new();
        assert!(parser.validate_query("CREATE TABLE t (id INT)", None).is_err());
        assert!(parser.validate_query("SELECT 1; SELECT 2", None).is_err());
    }

    #[test]
    fn parse_error_diagnostic() {
        let parser = SqlParser::new();
        let err = parser
            .validate_query("SELECT FROM WHERE", Some(Path::new("models/bad.sql")))
            .unwrap_err();

        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::ParseError);
        assert_eq!(diag.location.unwrap().file, "models/bad.sql");
    }
}
