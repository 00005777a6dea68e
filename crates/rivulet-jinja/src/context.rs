//! Render context for templates
//!
//! Provides the variables and target information visible to every template.

use rivulet_core::{Config, Relation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Project-wide render context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderContext {
    /// Project variables read through var()
    pub vars: BTreeMap<String, serde_json::Value>,

    /// Build target exposed as `target`
    pub target: TargetContext,
}

/// `{{ target.* }}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetContext {
    pub name: String,
    pub schema: String,
    pub database: Option<String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
            target: TargetContext::default(),
        }
    }

    /// Context for a configured project
    pub fn from_config(config: &Config) -> Self {
        Self {
            vars: config.vars.clone(),
            target: TargetContext {
                name: config.target.name.clone(),
                schema: config.target.schema.clone(),
                database: config.target.database.clone(),
            },
        }
    }

    /// Add a project variable
    pub fn add_var(&mut self, key: impl Into<String>, value: serde_json::Value) -> &mut Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Per-template globals: `target`, plus `this` when rendering a model
    pub(crate) fn globals(&self, this: Option<&Relation>) -> TemplateGlobals<'_> {
        TemplateGlobals {
            this: this.map(|r| r.fqn()),
            target: &self.target,
        }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for TargetContext {
    fn default() -> Self {
        Self {
            name: "dev".to_string(),
            schema: "public".to_string(),
            database: None,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct TemplateGlobals<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub this: Option<String>,
    pub target: &'a TargetContext,
}

/// Builder for RenderContext
pub struct RenderContextBuilder {
    context: RenderContext,
}

impl RenderContextBuilder {
    pub fn new() -> Self {
        Self {
            context: RenderContext::new(),
        }
    }

    pub fn var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.add_var(key, value);
        self
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.context.target.name = name.into();
        self
    }

    pub fn target_schema(mut self, schema: impl Into<String>) -> Self {
        self.context.target.schema = schema.into();
        self
    }

    pub fn target_database(mut self, database: impl Into<String>) -> Self {
        self.context.target.database = Some(database.into());
        self
    }

    pub fn build(self) -> RenderContext {
        self.context
    }
}

impl Default for RenderContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_from_config() {
        let config = Config::from_toml(
            r#"
            [target]
            name = "prod"
            schema = "MARTS"

            [vars]
            start_date = "1999-01-01"
            "#,
        )
        .unwrap();

        let context = RenderContext::from_config(&config);
        assert_eq!(context.target.name, "prod");
        assert_eq!(context.target.schema, "MARTS");
        assert_eq!(context.target.database, None);
        assert_eq!(context.vars["start_date"], serde_json::json!("1999-01-01"));
    }

    #[test]
    fn this_omitted_outside_models() {
        let context = RenderContextBuilder::new().target_schema("staging").build();
        let globals = serde_json::to_value(context.globals(None)).unwrap();
        assert!(globals.get("this").is_none());
        assert_eq!(globals["target"]["schema"], "staging");
    }
}
