use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Text form of a variable: strings verbatim, anything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute `{{ name }}` placeholders; unknown names render empty.
pub fn render(template: &str, variables: &HashMap<String, Value>) -> String {
    render_with(template, |name| variables.get(name).map(display_value))
}

/// Substitute placeholders through an arbitrary lookup.
pub fn render_with<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder()
        .replace_all(template, |caps: &Captures| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
