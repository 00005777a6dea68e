//! Macro file parsing
//!
//! Extracts `{% macro name(p1, p2=default) %} ... {% endmacro %}` blocks
//! from files under `macros/`.

use once_cell::sync::Lazy;
use regex::Regex;
use rivulet_core::{Diagnostic, DiagnosticCode, Location, Macro, MacroParam, Severity};
use std::path::{Path, PathBuf};

static MACRO_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%-?\s*macro\s+([A-Za-z_][A-Za-z0-9_]*)\s*\((.*?)\)\s*-?%\}").expect("valid regex")
});

static MACRO_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{%-?\s*endmacro\s*-?%\}").expect("valid regex"));

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Malformed macro definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}:{line}: {message}", .path.display())]
pub struct MacroParseError {
    pub path: PathBuf,
    pub line: usize,
    pub message: String,
}

impl MacroParseError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(DiagnosticCode::ParseError, Severity::Error, self.message.clone())
            .with_location(Location::with_line(self.path.display().to_string(), self.line))
    }
}

/// Parse every macro block in a file, in order of definition
pub fn parse_macros(text: &str, path: &Path) -> Result<Vec<Macro>, MacroParseError> {
    let mut macros = Vec::new();
    let mut cursor = 0;

    while let Some(open) = MACRO_OPEN.captures_at(text, cursor) {
        let whole = open.get(0).map(|m| (m.start(), m.end())).unwrap_or((cursor, cursor));
        let name = open[1].to_string();
        let line = line_of(text, whole.0);

        let close = MACRO_CLOSE.find_at(text, whole.1).ok_or_else(|| MacroParseError {
            path: path.to_path_buf(),
            line,
            message: format!("macro '{}' is missing {{% endmacro %}}", name),
        })?;

        // A second opening tag before this block closes means nesting or a missing end tag
        if let Some(next) = MACRO_OPEN.find_at(text, whole.1) {
            if next.start() < close.start() {
                return Err(MacroParseError {
                    path: path.to_path_buf(),
                    line,
                    message: format!("macro '{}' is not closed before the next macro starts", name),
                });
            }
        }

        let params = parse_params(&open[2]).map_err(|message| MacroParseError {
            path: path.to_path_buf(),
            line,
            message: format!("macro '{}': {}", name, message),
        })?;

        macros.push(Macro {
            name,
            params,
            body: text[whole.1..close.start()].to_string(),
            path: path.to_path_buf(),
        });

        cursor = close.end();
    }

    if let Some(stray) = MACRO_CLOSE.find_at(text, cursor) {
        return Err(MacroParseError {
            path: path.to_path_buf(),
            line: line_of(text, stray.start()),
            message: "{% endmacro %} without a matching {% macro %}".to_string(),
        });
    }

    Ok(macros)
}

/// Parse `a, b='x', c=ref('m')` into parameters
fn parse_params(list: &str) -> Result<Vec<MacroParam>, String> {
    let mut params: Vec<MacroParam> = Vec::new();

    for part in split_top_level(list) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (name, default) = match part.split_once('=') {
            Some((name, default)) => (name.trim(), Some(default.trim().to_string())),
            None => (part, None),
        };

        if !IDENTIFIER.is_match(name) {
            return Err(format!("invalid parameter name '{}'", name));
        }
        if params.iter().any(|p| p.name == name) {
            return Err(format!("duplicate parameter '{}'", name));
        }
        if default.is_none() && params.iter().any(|p| p.default.is_some()) {
            return Err(format!("parameter '{}' without default follows a defaulted parameter", name));
        }

        params.push(MacroParam {
            name: name.to_string(),
            default,
        });
    }

    Ok(params)
}

/// Split on commas that are not inside quotes or brackets
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, c) in list.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(&list[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
}

fn line_of(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset.min(text.len())].matches('\n').count() + 1
}
