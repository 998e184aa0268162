//! Non-fatal configuration validation.
//!
//! A [`ConfigSchema`] is a list of per-key [`FieldRule`]s. Validation never
//! fails; it reports every [`Violation`] it finds so callers can decide
//! whether to abort, warn or continue.
//!
//! ```rust,ignore
//! let schema = ConfigSchema::new()
//!     .field("server.port", FieldRule::integer().required().range(1.0, 65535.0))
//!     .field("log.level", FieldRule::string().one_of(["trace", "debug", "info", "warn", "error"]));
//!
//! for violation in config.validate(&schema) {
//!     warn!(key = %violation.key, "{}", violation.message);
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::value::{ConfigObject, get_path, kind_name};

/// Expected type of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    /// A number without fractional part.
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }
}

type CheckFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Constraints for a single key.
#[derive(Clone, Default)]
pub struct FieldRule {
    kind: Option<ValueKind>,
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    one_of: Vec<Value>,
    checks: Vec<CheckFn>,
}

impl FieldRule {
    /// A rule with no type constraint.
    pub fn any() -> Self {
        Self::default()
    }

    /// A rule requiring the given type.
    pub fn of(kind: ValueKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::of(ValueKind::String)
    }

    pub fn number() -> Self {
        Self::of(ValueKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(ValueKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(ValueKind::Boolean)
    }

    pub fn array() -> Self {
        Self::of(ValueKind::Array)
    }

    pub fn object() -> Self {
        Self::of(ValueKind::Object)
    }

    /// The key must be present.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Lower bound: numeric value, or length for strings and arrays.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Upper bound: numeric value, or length for strings and arrays.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Shorthand for `min(min).max(max)`.
    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    /// The value must equal one of `allowed`.
    pub fn one_of<I, V>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.one_of = allowed.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a custom check returning an error message on failure.
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    fn measure(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(items) => Some(items.len() as f64),
            _ => None,
        }
    }

    fn validate(&self, key: &str, value: Option<&Value>, out: &mut Vec<Violation>) {
        let Some(value) = value else {
            if self.required {
                out.push(Violation::new(key, "required key is missing"));
            }
            return;
        };

        if let Some(kind) = self.kind
            && !kind.matches(value)
        {
            out.push(Violation::new(
                key,
                format!("expected {}, found {}", kind.as_str(), kind_name(value)),
            ));
            return;
        }

        if let Some(measured) = Self::measure(value) {
            if let Some(min) = self.min
                && measured < min
            {
                out.push(Violation::new(key, format!("must be at least {min}")));
            }
            if let Some(max) = self.max
                && measured > max
            {
                out.push(Violation::new(key, format!("must be at most {max}")));
            }
        }

        if !self.one_of.is_empty() && !self.one_of.contains(value) {
            let allowed: Vec<String> = self.one_of.iter().map(Value::to_string).collect();
            out.push(Violation::new(
                key,
                format!("must be one of [{}]", allowed.join(", ")),
            ));
        }

        for check in &self.checks {
            if let Err(message) = check(value) {
                out.push(Violation::new(key, message));
            }
        }
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("one_of", &self.one_of)
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// A set of per-key rules.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    fields: Vec<(String, FieldRule)>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for a dotted key.
    pub fn field(mut self, key: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((key.into(), rule));
        self
    }

    /// Validates `tree`, returning every violation in rule order.
    pub fn validate(&self, tree: &ConfigObject) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (key, rule) in &self.fields {
            rule.validate(key, get_path(tree, key), &mut violations);
        }
        violations
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Offending key.
    pub key: String,
    /// Human-readable description.
    pub message: String,
}

impl Violation {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> ConfigObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_valid_tree_has_no_violations() {
        let schema = ConfigSchema::new()
            .field("server.port", FieldRule::integer().required().range(1.0, 65535.0))
            .field("name", FieldRule::string().min(1.0));
        let config = tree(json!({"server": {"port": 8080}, "name": "app"}));
        assert!(schema.validate(&config).is_empty());
    }

    #[test]
    fn test_reports_all_violations() {
        let schema = ConfigSchema::new()
            .field("server.port", FieldRule::integer().required())
            .field("server.host", FieldRule::string().required())
            .field("log.level", FieldRule::string().one_of(["info", "debug"]))
            .field("workers", FieldRule::number().max(8.0));
        let config = tree(json!({
            "server": {"port": "80"},
            "log": {"level": "loud"},
            "workers": 16
        }));

        let keys: Vec<String> = schema
            .validate(&config)
            .into_iter()
            .map(|v| v.key)
            .collect();
        assert_eq!(keys, vec!["server.port", "server.host", "log.level", "workers"]);
    }

    #[test]
    fn test_custom_check() {
        let schema = ConfigSchema::new().field(
            "url",
            FieldRule::string().check(|v| match v.as_str() {
                Some(s) if s.starts_with("https://") => Ok(()),
                _ => Err("must use https".to_string()),
            }),
        );
        let violations = schema.validate(&tree(json!({"url": "http://x"})));
        assert_eq!(violations, vec![Violation::new("url", "must use https")]);
    }

    #[test]
    fn test_optional_missing_key_is_fine() {
        let schema = ConfigSchema::new().field("theme", FieldRule::string());
        assert!(schema.validate(&ConfigObject::new()).is_empty());
    }
}
