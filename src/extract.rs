//! Extraction of named values from completed container results.
//!
//! Each [`OutputDefinition`] selects a source (stdout, stderr, exit code,
//! or a file), optionally narrows it through a minimal JSONPath and a
//! regex, trims the outcome, and falls back to a default where one is set.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

use crate::container::ContainerResult;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("output '{name}': {message}"))]
    Extraction { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where an output value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputSource {
    Stdout,
    Stderr,
    ExitCode,
    File,
}

/// One named output captured from a completed container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefinition {
    /// Name, unique within the owning node.
    pub name: String,
    pub source: OutputSource,
    /// Path to read; required when `source` is `File`.
    #[serde(default)]
    pub path: Option<String>,
    /// Minimal JSONPath (`$.a.b[i].c`) applied to the selection.
    #[serde(default)]
    pub json_path: Option<String>,
    /// Regex applied after the JSONPath; the first capture group wins,
    /// otherwise the whole match.
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

impl OutputDefinition {
    #[must_use]
    pub fn stdout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: OutputSource::Stdout,
            path: None,
            json_path: None,
            regex: None,
            default: None,
        }
    }

    #[must_use]
    pub fn stderr(name: impl Into<String>) -> Self {
        Self {
            source: OutputSource::Stderr,
            ..Self::stdout(name)
        }
    }

    #[must_use]
    pub fn exit_code(name: impl Into<String>) -> Self {
        Self {
            source: OutputSource::ExitCode,
            ..Self::stdout(name)
        }
    }

    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source: OutputSource::File,
            path: Some(path.into()),
            ..Self::stdout(name)
        }
    }

    #[must_use]
    pub fn with_json_path(mut self, json_path: impl Into<String>) -> Self {
        self.json_path = Some(json_path.into());
        self
    }

    #[must_use]
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A JSONPath leaf, kept tagged until it is rendered to a string at the
/// binder boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    Str(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
    Complex(Value),
}

impl ExtractedValue {
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => ExtractedValue::Str(s.clone()),
            Value::Number(n) => ExtractedValue::Number(n.clone()),
            Value::Bool(b) => ExtractedValue::Bool(*b),
            Value::Null => ExtractedValue::Null,
            Value::Array(_) | Value::Object(_) => ExtractedValue::Complex(value.clone()),
        }
    }

    /// String form: strings pass through, numbers format as plain decimal,
    /// booleans as `true`/`false`, null as empty, and complex values as
    /// their canonical JSON serialization.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            ExtractedValue::Str(s) => s.clone(),
            ExtractedValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.to_string()
                } else if let Some(u) = n.as_u64() {
                    u.to_string()
                } else {
                    // f64 Display never uses exponent notation
                    n.as_f64().map(|f| format!("{f}")).unwrap_or_default()
                }
            }
            ExtractedValue::Bool(b) => b.to_string(),
            ExtractedValue::Null => String::new(),
            ExtractedValue::Complex(value) => value.to_string(),
        }
    }
}

/// Apply a list of definitions, producing a name -> value map. The first
/// uncaught failure aborts the whole batch.
pub fn extract_outputs(
    definitions: &[OutputDefinition],
    result: &ContainerResult,
) -> Result<IndexMap<String, String>> {
    let mut outputs = IndexMap::new();
    for definition in definitions {
        outputs.insert(definition.name.clone(), extract_one(definition, result)?);
    }
    Ok(outputs)
}

fn extract_one(definition: &OutputDefinition, result: &ContainerResult) -> Result<String> {
    let fallback = |message: String| match &definition.default {
        Some(default) => Ok(default.clone()),
        None => ExtractionSnafu {
            name: definition.name.clone(),
            message,
        }
        .fail(),
    };

    let selected = match definition.source {
        OutputSource::Stdout => result.stdout.clone(),
        OutputSource::Stderr => result.stderr.clone(),
        OutputSource::ExitCode => result.exit_code.to_string(),
        OutputSource::File => {
            let path = definition.path.as_deref().ok_or_else(|| Error::Extraction {
                name: definition.name.clone(),
                message: "file source requires a path".to_string(),
            })?;
            match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(err) => return fallback(format!("reading '{path}': {err}")),
            }
        }
    };

    let selected = match &definition.json_path {
        Some(path) => match apply_json_path(path, &selected) {
            Ok(value) => value,
            Err(message) => return fallback(message),
        },
        None => selected,
    };

    let selected = match &definition.regex {
        Some(pattern) => {
            let re = Regex::new(pattern).map_err(|err| Error::Extraction {
                name: definition.name.clone(),
                message: format!("invalid pattern '{pattern}': {err}"),
            })?;
            match re.captures(&selected) {
                Some(captures) => {
                    let matched = if re.captures_len() > 1 {
                        captures.get(1)
                    } else {
                        captures.get(0)
                    };
                    match matched {
                        Some(m) => m.as_str().to_string(),
                        None => return fallback(format!("pattern '{pattern}' matched no text")),
                    }
                }
                None => return fallback(format!("pattern '{pattern}' did not match")),
            }
        }
        None => selected,
    };

    let trimmed = selected.trim();
    if trimmed.is_empty() {
        if let Some(default) = &definition.default {
            return Ok(default.clone());
        }
    }
    Ok(trimmed.to_string())
}

/// Navigate a minimal JSONPath over the selection parsed as JSON.
/// Supported tokens: `.field` on objects and `[n]` on arrays; a leading
/// `$` or `$.` is optional.
fn apply_json_path(path: &str, text: &str) -> std::result::Result<String, String> {
    let document: Value =
        serde_json::from_str(text).map_err(|err| format!("invalid JSON: {err}"))?;

    let mut rest = path.trim();
    rest = rest.strip_prefix('$').unwrap_or(rest);

    let mut current = &document;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('[') {
            let end = tail.find(']').ok_or("unterminated index bracket")?;
            let (digits, remainder) = tail.split_at(end);
            let index: usize = digits
                .parse()
                .map_err(|_| format!("invalid array index '{digits}'"))?;
            current = current
                .as_array()
                .ok_or_else(|| format!("index [{index}] applied to a non-array"))?
                .get(index)
                .ok_or_else(|| format!("index {index} out of bounds"))?;
            rest = remainder.strip_prefix(']').unwrap_or(remainder);
        } else {
            let tail = rest.strip_prefix('.').unwrap_or(rest);
            let end = tail
                .find(|c| c == '.' || c == '[')
                .unwrap_or(tail.len());
            let (field, remainder) = tail.split_at(end);
            if field.is_empty() {
                return Err(format!("empty path segment at '{rest}'"));
            }
            current = current
                .as_object()
                .ok_or_else(|| format!("field '{field}' accessed on a non-object"))?
                .get(field)
                .ok_or_else(|| format!("missing field '{field}'"))?;
            rest = remainder;
        }
    }

    Ok(ExtractedValue::from_json(current).render())
}
