//! Jinja2-compatible expression evaluation powered by minijinja.
//!
//! Variable resolution is two-phase: the effective mapping is built eagerly
//! by the [`crate::vars`] layer fold, but `{{ expr }}` references embedded in
//! values are only evaluated here, when a consuming operation reads the
//! value. An expression referencing a missing key therefore surfaces
//! [`Error::UndefinedVariable`] at read time, never at merge time.

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::vars::Vars;

/// Template engine with strict undefined-variable handling.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Render a template string against the effective mapping.
    pub fn render_str(&self, template: &str, vars: &Vars) -> Result<String> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }

        self.env
            .render_str(template, vars)
            .map_err(|e| map_template_error(template, e))
    }

    /// Evaluate a single expression against the effective mapping.
    pub fn eval_expression(&self, expr: &str, vars: &Vars) -> Result<JsonValue> {
        let value = eval_raw(expr, vars)?;
        serde_json::to_value(&value).map_err(Error::from)
    }

    /// Evaluate a condition guard to a boolean.
    ///
    /// Bare booleans and variable names are accepted alongside full
    /// expressions (`count > 3`, `pkg is defined`).
    pub fn eval_condition(&self, expr: &str, vars: &Vars) -> Result<bool> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(true);
        }

        Ok(eval_raw(expr, vars)?.is_true())
    }

    /// Recursively render templates embedded in a value.
    ///
    /// A string that is exactly one `{{ expr }}` reference is evaluated as
    /// an expression so the resolved value keeps its type; any other string
    /// is rendered to text. Mappings and sequences are templated element by
    /// element.
    pub fn render_value(&self, value: &JsonValue, vars: &Vars) -> Result<JsonValue> {
        match value {
            JsonValue::String(s) => {
                if let Some(expr) = as_bare_expression(s) {
                    self.eval_expression(expr, vars)
                } else {
                    self.render_str(s, vars).map(JsonValue::String)
                }
            }
            JsonValue::Array(items) => {
                let rendered: Result<Vec<JsonValue>> =
                    items.iter().map(|v| self.render_value(v, vars)).collect();
                Ok(JsonValue::Array(rendered?))
            }
            JsonValue::Object(map) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in map {
                    rendered.insert(k.clone(), self.render_value(v, vars)?);
                }
                Ok(JsonValue::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Read one key from the effective mapping, resolving any template
    /// expression embedded in its value.
    pub fn resolve_key(&self, vars: &Vars, key: &str) -> Result<JsonValue> {
        let raw = vars
            .get(key)
            .ok_or_else(|| Error::UndefinedVariable(key.to_string()))?;
        self.render_value(raw, vars)
    }
}

/// Compile and evaluate one expression. Compiled expressions borrow their
/// source for the environment's lifetime, so evaluation uses a scoped
/// environment.
fn eval_raw(expr: &str, vars: &Vars) -> Result<minijinja::Value> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let compiled = env
        .compile_expression(expr)
        .map_err(|e| map_template_error(expr, e))?;
    compiled.eval(vars).map_err(|e| map_template_error(expr, e))
}

/// If the whole string is a single `{{ expr }}`, return the inner
/// expression.
fn as_bare_expression(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn map_template_error(source: &str, err: minijinja::Error) -> Error {
    if err.kind() == minijinja::ErrorKind::UndefinedError {
        Error::UndefinedVariable(source.to_string())
    } else {
        Error::template_render(source, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.insert("name".into(), json!("web1"));
        vars.insert("port".into(), json!(8080));
        vars.insert("enabled".into(), json!(true));
        vars
    }

    #[test]
    fn test_render_plain_string_passthrough() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render_str("no templates", &vars()).unwrap(), "no templates");
    }

    #[test]
    fn test_render_str() {
        let engine = TemplateEngine::new();
        let out = engine.render_str("host={{ name }}", &vars()).unwrap();
        assert_eq!(out, "host=web1");
    }

    #[test]
    fn test_bare_expression_preserves_type() {
        let engine = TemplateEngine::new();
        let out = engine.render_value(&json!("{{ port }}"), &vars()).unwrap();
        assert_eq!(out, json!(8080));
    }

    #[test]
    fn test_render_nested_value() {
        let engine = TemplateEngine::new();
        let out = engine
            .render_value(&json!({"listen": "{{ name }}:{{ port }}"}), &vars())
            .unwrap();
        assert_eq!(out, json!({"listen": "web1:8080"}));
    }

    #[test]
    fn test_undefined_surfaces_at_read_time() {
        let engine = TemplateEngine::new();
        let err = engine.render_str("{{ missing }}", &vars()).unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(_)));
    }

    #[test]
    fn test_eval_condition() {
        let engine = TemplateEngine::new();
        let vars = vars();
        assert!(engine.eval_condition("enabled", &vars).unwrap());
        assert!(engine.eval_condition("port > 80", &vars).unwrap());
        assert!(!engine.eval_condition("port > 9000", &vars).unwrap());
        assert!(engine.eval_condition("missing is not defined", &vars).unwrap());
    }

    #[test]
    fn test_condition_on_undefined_is_an_error() {
        let engine = TemplateEngine::new();
        let err = engine.eval_condition("missing > 3", &vars()).unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(_)));
    }

    #[test]
    fn test_resolve_key_missing() {
        let engine = TemplateEngine::new();
        let err = engine.resolve_key(&vars(), "absent").unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(name) if name == "absent"));
    }
}
