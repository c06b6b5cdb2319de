//! Converters that turn deployment strings into typed option values.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

const TRUTHY: &[&str] = &["true", "yes", "on", "y", "t", "1"];
const FALSY: &[&str] = &["false", "no", "off", "n", "f", "0"];

pub fn asbool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if TRUTHY.contains(&lowered.as_str()) {
                Ok(true)
            } else if FALSY.contains(&lowered.as_str()) {
                Ok(false)
            } else {
                Err(format!("string is not a boolean: {s:?}"))
            }
        }
        Value::Null => Ok(false),
        other => Err(format!("cannot interpret {other} as a boolean")),
    }
}

pub fn asint(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("bad integer value {s:?}: {e}")),
        other => Err(format!("cannot interpret {other} as an integer")),
    }
}

/// Split a string on `sep` (comma when `None`). Arrays pass through, scalars become one-element lists.
pub fn aslist(value: &Value, sep: Option<&str>, strip: bool) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        Value::String(s) => {
            let sep = sep.unwrap_or(",");
            let parts = s.split(sep).map(|part| {
                if strip {
                    part.trim().to_string()
                } else {
                    part.to_string()
                }
            });
            Ok(parts
                .filter(|part| !(strip && part.is_empty()))
                .map(Value::String)
                .collect())
        }
        other => Ok(vec![other.clone()]),
    }
}

fn placeholder_re() -> Result<&'static Regex, String> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}"))
        .as_ref()
        .map_err(|e| e.to_string())
}

/// A string with `${name}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    source: String,
    names: Vec<String>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, String> {
        let re = placeholder_re()?;
        let names: Vec<String> = re.captures_iter(source).map(|c| c[1].to_string()).collect();
        let stripped = re.replace_all(source, "");
        if stripped.contains("${") {
            return Err(format!("unterminated or invalid placeholder in {source:?}"));
        }
        Ok(Template {
            source: source.to_string(),
            names,
        })
    }

    pub fn placeholders(&self) -> &[String] {
        &self.names
    }

    /// Replace every placeholder; a missing name is an error.
    pub fn substitute(&self, vars: &serde_json::Map<String, Value>) -> Result<String, String> {
        if let Some(missing) = self.names.iter().find(|n| lookup(vars, n).is_none()) {
            return Err(format!("no value for placeholder ${{{missing}}}"));
        }
        Ok(self.safe_substitute(vars))
    }

    /// Replace known placeholders and leave the others untouched.
    pub fn safe_substitute(&self, vars: &serde_json::Map<String, Value>) -> String {
        let Ok(re) = placeholder_re() else {
            return self.source.clone();
        };
        re.replace_all(&self.source, |caps: &regex::Captures<'_>| match lookup(vars, &caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
    }
}

fn lookup<'a>(vars: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a Value> {
    let mut parts = name.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub fn astemplate(value: &Value) -> Result<Template, String> {
    match value {
        Value::String(s) => Template::parse(s),
        other => Err(format!("cannot interpret {other} as a template")),
    }
}

/// A named logger; events go through `tracing` with a `logger` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Logger {
    name: String,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        Logger { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(logger = %self.name, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(logger = %self.name, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(logger = %self.name, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(logger = %self.name, "{}", message);
    }
}

impl fmt::Display for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub fn aslogger(value: &Value) -> Result<Logger, String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(Logger::new(s.trim())),
        other => Err(format!("cannot interpret {other} as a logger name")),
    }
}

pub type CustomCoercer = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Entry of the coercion map.
#[derive(Clone)]
pub enum Coercion {
    Bool,
    Int,
    List { sep: Option<String>, strip: bool },
    Template,
    Logger,
    Custom(CustomCoercer),
}

impl Coercion {
    pub fn list() -> Self {
        Coercion::List {
            sep: None,
            strip: true,
        }
    }

    pub fn list_with(sep: &str) -> Self {
        Coercion::List {
            sep: Some(sep.to_string()),
            strip: true,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Coercion::Custom(Arc::new(f))
    }

    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        match self {
            Coercion::Bool => asbool(value).map(Value::Bool),
            Coercion::Int => asint(value).map(Value::from),
            Coercion::List { sep, strip } => aslist(value, sep.as_deref(), *strip).map(Value::Array),
            Coercion::Template => astemplate(value).map(|t| Value::String(t.to_string())),
            Coercion::Logger => aslogger(value).map(|l| Value::String(l.to_string())),
            Coercion::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coercion::Bool => f.write_str("Bool"),
            Coercion::Int => f.write_str("Int"),
            Coercion::List { sep, strip } => f
                .debug_struct("List")
                .field("sep", sep)
                .field("strip", strip)
                .finish(),
            Coercion::Template => f.write_str("Template"),
            Coercion::Logger => f.write_str("Logger"),
            Coercion::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booleans_accept_every_documented_literal() {
        for s in TRUTHY {
            assert_eq!(asbool(&json!(s.to_uppercase())), Ok(true));
        }
        for s in FALSY {
            assert_eq!(asbool(&json!(s)), Ok(false));
        }
        assert!(asbool(&json!("maybe")).is_err());
        assert_eq!(asbool(&json!(true.to_string())), Ok(true));
    }

    #[test]
    fn integers_round_trip_through_strings() {
        for x in [0_i64, 7, -12, 4096] {
            assert_eq!(asint(&json!(x.to_string())), Ok(x));
        }
        assert!(asint(&json!("0x10")).is_err());
    }

    #[test]
    fn lists_split_and_strip() {
        assert_eq!(
            aslist(&json!(" a, b ,c,"), None, true).unwrap(),
            vec![json!("a"), json!("b"), json!("c")]
        );
        assert_eq!(
            aslist(&json!("a|b"), Some("|"), false).unwrap(),
            vec![json!("a"), json!("b")]
        );
        assert_eq!(aslist(&json!(["x"]), None, true).unwrap(), vec![json!("x")]);
    }

    #[test]
    fn templates_substitute_dotted_names() {
        let tpl = astemplate(&json!("Hello ${user.name}, ${greeting}")).unwrap();
        assert_eq!(tpl.placeholders(), &["user.name".to_string(), "greeting".to_string()]);
        let vars = json!({"user": {"name": "alice"}, "greeting": "hi"});
        assert_eq!(
            tpl.substitute(vars.as_object().unwrap()).unwrap(),
            "Hello alice, hi"
        );
        assert_eq!(tpl.to_string(), "Hello ${user.name}, ${greeting}");
        assert!(astemplate(&json!("broken ${")).is_err());
    }

    #[test]
    fn safe_substitute_keeps_unknown_placeholders() {
        let tpl = Template::parse("${a}-${b}").unwrap();
        let vars = json!({"a": 1});
        assert_eq!(tpl.safe_substitute(vars.as_object().unwrap()), "1-${b}");
        assert!(tpl.substitute(vars.as_object().unwrap()).is_err());
    }

    #[test]
    fn loggers_are_named() {
        assert_eq!(aslogger(&json!("tg.app")).unwrap().name(), "tg.app");
        assert!(aslogger(&json!("")).is_err());
    }

    #[test]
    fn coercion_map_entries_produce_typed_values() {
        assert_eq!(Coercion::Bool.apply(&json!("on")), Ok(json!(true)));
        assert_eq!(Coercion::Int.apply(&json!("42")), Ok(json!(42)));
        assert_eq!(Coercion::list().apply(&json!("a,b")), Ok(json!(["a", "b"])));
        let upper = Coercion::custom(|v| Ok(json!(v.as_str().unwrap_or_default().to_uppercase())));
        assert_eq!(upper.apply(&json!("x")), Ok(json!("X")));
    }
}
