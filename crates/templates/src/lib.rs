//! Prompt-template rendering.
//!
//! Thin wrapper over Tera one-off rendering: every variable is bound as a
//! string (non-string values are serialized to human-readable JSON first),
//! an undeclared placeholder is a hard render error, and the bound variable
//! map is echoed back so it can be persisted beside the rendered prompt.

use std::collections::BTreeMap;

use serde_json::Value;

use rp_domain::{Error, Result};

/// A rendered prompt plus the exact variables bound into it.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub text: String,
    /// Echo of the variable map, for reproducibility.
    pub variables: BTreeMap<String, Value>,
}

/// Substitute `vars` into `template_text`.
///
/// Placeholders use `{{ name }}` syntax. A placeholder with no matching
/// variable fails with a template error; extra variables that the template
/// never references are fine and still echoed.
pub fn render(template_text: &str, vars: &BTreeMap<String, Value>) -> Result<RenderedPrompt> {
    let mut context = tera::Context::new();
    for (name, value) in vars {
        match value {
            Value::String(s) => context.insert(name, s),
            other => {
                let serialized =
                    serde_json::to_string_pretty(other).map_err(|e| Error::Template(e.to_string()))?;
                context.insert(name, &serialized);
            }
        }
    }

    let text = tera::Tera::one_off(template_text, &context, false)
        .map_err(|e| Error::Template(flatten_tera_error(&e)))?;

    Ok(RenderedPrompt {
        text,
        variables: vars.clone(),
    })
}

/// Tera nests the useful message in the error source chain.
fn flatten_tera_error(err: &tera::Error) -> String {
    use std::error::Error as _;
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_string_variables_verbatim() {
        let rendered = render(
            "Clean this: {{ raw_text }} (speaker {{ speaker }})",
            &vars(&[("raw_text", json!("hello")), ("speaker", json!("User"))]),
        )
        .unwrap();
        assert_eq!(rendered.text, "Clean this: hello (speaker User)");
    }

    #[test]
    fn undeclared_placeholder_fails() {
        let err = render("Hi {{ missing }}", &vars(&[])).unwrap_err();
        assert_eq!(err.kind(), "template_render_error");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn non_string_values_render_as_json() {
        let rendered = render(
            "history: {{ calls }}",
            &vars(&[("calls", json!([{"name": "set_role"}]))]),
        )
        .unwrap();
        assert!(rendered.text.contains("\"name\": \"set_role\""));
    }

    #[test]
    fn unused_variables_are_permitted_and_echoed() {
        let rendered = render(
            "{{ raw_text }}",
            &vars(&[("raw_text", json!("x")), ("spare", json!(1))]),
        )
        .unwrap();
        assert_eq!(rendered.text, "x");
        assert_eq!(rendered.variables.len(), 2);
        assert_eq!(rendered.variables["spare"], json!(1));
    }

    #[test]
    fn empty_string_variable_renders_empty() {
        let rendered = render(
            "ctx:[{{ cleaned_context }}]",
            &vars(&[("cleaned_context", json!(""))]),
        )
        .unwrap();
        assert_eq!(rendered.text, "ctx:[]");
    }
}
