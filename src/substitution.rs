//! Literal placeholder substitution over container specs.
//!
//! Three placeholder forms, all replaced globally and non-recursively:
//! `{{item}}`, `{{index}}`, and `{{.name}}`/`{{name}}` for named
//! parameters. Unreferenced placeholders are left intact.

use indexmap::IndexMap;

use crate::container::ContainerSpec;
use crate::workflow::Parameter;

/// Expand a template spec for one loop iteration.
///
/// Replacement touches image, command and entrypoint elements, environment
/// keys and values, name, working directory, and volume keys and values.
/// Ports, labels, user, wait strategy, and timeouts pass through untouched.
#[must_use]
pub fn substitute_spec(
    template: &ContainerSpec,
    item: &str,
    index: usize,
    params: &IndexMap<String, String>,
) -> ContainerSpec {
    let sub = |s: &str| substitute_str(s, item, index, params);

    let mut spec = template.clone();
    spec.image = sub(&template.image);
    spec.command = template.command.iter().map(|c| sub(c)).collect();
    spec.entrypoint = template
        .entrypoint
        .as_ref()
        .map(|entrypoint| entrypoint.iter().map(|e| sub(e)).collect());
    spec.env = template
        .env
        .iter()
        .map(|(name, value)| (sub(name), sub(value)))
        .collect();
    spec.name = template.name.as_deref().map(&sub);
    spec.working_dir = template.working_dir.as_deref().map(&sub);
    spec.volumes = template
        .volumes
        .iter()
        .map(|(host, container)| (sub(host), sub(container)))
        .collect();
    spec
}

/// Replace every placeholder in one string. The dotted parameter form is
/// replaced before the bare form so `{{.name}}` never survives as a
/// half-substituted `{{.value}}`.
#[must_use]
pub fn substitute_str(
    input: &str,
    item: &str,
    index: usize,
    params: &IndexMap<String, String>,
) -> String {
    let mut out = input.replace("{{item}}", item);
    out = out.replace("{{index}}", &index.to_string());
    for (name, value) in params {
        out = out.replace(&format!("{{{{.{name}}}}}"), value);
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// Apply named parameters to one spec the way the parameter workflow does:
/// `{{.name}}` replacement in environment values and command elements only.
#[must_use]
pub fn apply_parameters(spec: &ContainerSpec, parameters: &[Parameter]) -> ContainerSpec {
    let mut spec = spec.clone();
    for parameter in parameters {
        let needle = format!("{{{{.{}}}}}", parameter.name);
        spec.command = spec
            .command
            .iter()
            .map(|element| element.replace(&needle, &parameter.value))
            .collect();
        for value in spec.env.values_mut() {
            *value = value.replace(&needle, &parameter.value);
        }
    }
    spec
}

/// Apply named parameters to a bare string (used for `when` expressions).
#[must_use]
pub fn apply_parameters_str(input: &str, parameters: &[Parameter]) -> String {
    let mut out = input.to_string();
    for parameter in parameters {
        out = out.replace(&format!("{{{{.{}}}}}", parameter.name), &parameter.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ContainerSpec {
        ContainerSpec::new("registry/{{item}}:v{{index}}")
            .with_command(["process", "{{item}}", "{{.mode}}"])
            .with_env("INPUT_{{index}}", "{{item}}")
            .with_name("job-{{index}}")
            .with_working_dir("/work/{{item}}")
            .with_volume("/data/{{item}}", "/mnt/in")
            .with_port("8080:80")
            .with_label("team", "{{item}}")
    }

    #[test]
    fn no_placeholders_returns_equal_spec() {
        let plain = ContainerSpec::new("alpine").with_command(["echo", "hi"]);
        let substituted = substitute_spec(&plain, "x", 3, &IndexMap::new());
        assert_eq!(substituted, plain);
    }

    #[test]
    fn item_and_index_are_replaced_everywhere() {
        let mut params = IndexMap::new();
        params.insert("mode".to_string(), "fast".to_string());
        let spec = substitute_spec(&template(), "alpha", 2, &params);

        assert_eq!(spec.image, "registry/alpha:v2");
        assert_eq!(spec.command, vec!["process", "alpha", "fast"]);
        assert_eq!(spec.env.get("INPUT_2").map(String::as_str), Some("alpha"));
        assert_eq!(spec.name.as_deref(), Some("job-2"));
        assert_eq!(spec.working_dir.as_deref(), Some("/work/alpha"));
        assert_eq!(
            spec.volumes.get("/data/alpha").map(String::as_str),
            Some("/mnt/in")
        );
    }

    #[test]
    fn ports_and_labels_pass_through_untouched() {
        let spec = substitute_spec(&template(), "alpha", 0, &IndexMap::new());
        assert_eq!(spec.ports, vec!["8080:80"]);
        assert_eq!(spec.labels.get("team").map(String::as_str), Some("{{item}}"));
    }

    #[test]
    fn dotted_form_takes_precedence() {
        let mut params = IndexMap::new();
        params.insert("env".to_string(), "prod".to_string());
        assert_eq!(substitute_str("{{.env}}/{{env}}", "", 0, &params), "prod/prod");
    }

    #[test]
    fn unknown_placeholders_are_left_intact() {
        assert_eq!(
            substitute_str("{{item}}-{{.missing}}", "a", 0, &IndexMap::new()),
            "a-{{.missing}}"
        );
    }

    #[test]
    fn replacement_is_not_recursive() {
        let mut params = IndexMap::new();
        params.insert("a".to_string(), "{{b}}".to_string());
        params.insert("b".to_string(), "final".to_string());
        // the substituted "{{b}}" text came from a value and is replaced
        // by the later literal pass over `b`, not re-expanded recursively
        assert_eq!(substitute_str("{{.a}}", "", 0, &params), "final");
        let mut reversed = IndexMap::new();
        reversed.insert("b".to_string(), "final".to_string());
        reversed.insert("a".to_string(), "{{b}}".to_string());
        assert_eq!(substitute_str("{{.a}}", "", 0, &reversed), "{{b}}");
    }

    #[test]
    fn parameter_workflow_touches_env_values_and_command_only() {
        let spec = ContainerSpec::new("app-{{.env}}")
            .with_command(["deploy", "--env={{.env}}"])
            .with_env("TARGET", "{{.env}}")
            .with_env("{{.env}}_KEY", "v")
            .with_name("name-{{.env}}");
        let applied = apply_parameters(&spec, &[Parameter::new("env", "prod")]);

        assert_eq!(applied.image, "app-{{.env}}");
        assert_eq!(applied.command, vec!["deploy", "--env=prod"]);
        assert_eq!(applied.env.get("TARGET").map(String::as_str), Some("prod"));
        assert!(applied.env.contains_key("{{.env}}_KEY"));
        assert_eq!(applied.name.as_deref(), Some("name-{{.env}}"));
    }
}
