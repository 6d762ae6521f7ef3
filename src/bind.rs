//! Binding of upstream step outputs into a container's environment.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::container::ContainerSpec;

/// Step outputs keyed by producer name, then output name.
pub type StepOutputs = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "input '{name}': malformed source reference '{from}' (expected producer.output)"
    ))]
    MalformedReference { name: String, from: String },

    #[snafu(display("input '{name}': no value available from '{from}'"))]
    MissingInput { name: String, from: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One environment variable resolved from a producer's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMapping {
    /// Environment variable to set.
    pub name: String,
    /// Source reference of the form `producer.output`.
    pub from: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl InputMapping {
    #[must_use]
    pub fn required(name: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            required: true,
            default: None,
        }
    }

    #[must_use]
    pub fn optional(
        name: impl Into<String>,
        from: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            required: false,
            default: Some(default.into()),
        }
    }
}

/// Resolve each mapping against the collected step outputs and bind it
/// into the spec's environment, overwriting existing entries of the same
/// name. Unresolvable optional mappings fall back to a non-empty default
/// or are omitted.
pub fn bind_inputs(
    spec: &mut ContainerSpec,
    mappings: &[InputMapping],
    outputs: &StepOutputs,
) -> Result<()> {
    for mapping in mappings {
        if let Some(value) = resolve(mapping, outputs)? {
            spec.env.insert(mapping.name.clone(), value);
        }
    }
    Ok(())
}

fn resolve(mapping: &InputMapping, outputs: &StepOutputs) -> Result<Option<String>> {
    let parts: Vec<&str> = mapping.from.split('.').collect();
    let (producer, output) = match parts.as_slice() {
        [producer, output] if !producer.is_empty() && !output.is_empty() => (*producer, *output),
        _ => {
            if mapping.required {
                return MalformedReferenceSnafu {
                    name: mapping.name.clone(),
                    from: mapping.from.clone(),
                }
                .fail();
            }
            return Ok(fallback(mapping));
        }
    };

    match outputs.get(producer).and_then(|values| values.get(output)) {
        Some(value) => Ok(Some(value.clone())),
        None => {
            if mapping.required {
                MissingInputSnafu {
                    name: mapping.name.clone(),
                    from: mapping.from.clone(),
                }
                .fail()
            } else {
                Ok(fallback(mapping))
            }
        }
    }
}

fn fallback(mapping: &InputMapping) -> Option<String> {
    mapping
        .default
        .as_ref()
        .filter(|default| !default.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs_with(producer: &str, output: &str, value: &str) -> StepOutputs {
        let mut inner = IndexMap::new();
        inner.insert(output.to_string(), value.to_string());
        let mut outputs = IndexMap::new();
        outputs.insert(producer.to_string(), inner);
        outputs
    }

    #[test]
    fn resolved_value_overwrites_existing_binding() {
        let mut spec = ContainerSpec::new("alpine").with_env("VERSION", "stale");
        let outputs = outputs_with("build", "version", "1.2.3");
        bind_inputs(
            &mut spec,
            &[InputMapping::required("VERSION", "build.version")],
            &outputs,
        )
        .unwrap();
        assert_eq!(spec.env.get("VERSION").map(String::as_str), Some("1.2.3"));
    }

    #[test]
    fn malformed_reference_is_fatal_when_required() {
        let mut spec = ContainerSpec::new("alpine");
        let err = bind_inputs(
            &mut spec,
            &[InputMapping::required("X", "build.version.extra")],
            &StepOutputs::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedReference { .. }));
    }

    #[test]
    fn malformed_reference_falls_back_when_optional() {
        let mut spec = ContainerSpec::new("alpine");
        bind_inputs(
            &mut spec,
            &[InputMapping::optional("X", "noseparator", "d")],
            &StepOutputs::new(),
        )
        .unwrap();
        assert_eq!(spec.env.get("X").map(String::as_str), Some("d"));
    }

    #[test]
    fn missing_producer_is_fatal_when_required() {
        let mut spec = ContainerSpec::new("alpine");
        let err = bind_inputs(
            &mut spec,
            &[InputMapping::required("X", "ghost.out")],
            &StepOutputs::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }

    #[test]
    fn missing_output_with_empty_default_is_omitted() {
        let mut spec = ContainerSpec::new("alpine");
        let mapping = InputMapping {
            name: "X".into(),
            from: "build.missing".into(),
            required: false,
            default: Some(String::new()),
        };
        bind_inputs(&mut spec, &[mapping], &outputs_with("build", "version", "1")).unwrap();
        assert!(!spec.env.contains_key("X"));
    }

    #[test]
    fn missing_output_with_default_binds_default() {
        let mut spec = ContainerSpec::new("alpine");
        bind_inputs(
            &mut spec,
            &[InputMapping::optional("X", "build.missing", "fallback")],
            &outputs_with("build", "version", "1"),
        )
        .unwrap();
        assert_eq!(spec.env.get("X").map(String::as_str), Some("fallback"));
    }
}
