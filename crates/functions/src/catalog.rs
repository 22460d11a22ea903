use serde::Serialize;
use serde_json::{Map, Value};

use rp_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One declared parameter of a catalog function.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// A function the decider may choose, as advertised in its prompt context.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParamSpec>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The declared set of side-effect functions.
pub struct FunctionCatalog {
    functions: Vec<FunctionDefinition>,
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionCatalog {
    /// The standard customer-record catalog.
    pub fn standard() -> Self {
        fn param(name: &'static str, description: &'static str) -> ParamSpec {
            ParamSpec {
                name,
                description,
                required: true,
            }
        }

        Self {
            functions: vec![
                FunctionDefinition {
                    name: "set_role",
                    description: "Set the customer's job role/title.",
                    parameters: vec![param("role", "The customer's role, e.g. 'Director of Marketing'")],
                },
                FunctionDefinition {
                    name: "update_name",
                    description: "Set or correct the customer's full name.",
                    parameters: vec![param("name", "The customer's full name")],
                },
                FunctionDefinition {
                    name: "update_email",
                    description: "Set or correct the customer's email address.",
                    parameters: vec![param("email", "The customer's email address")],
                },
                FunctionDefinition {
                    name: "update_phone",
                    description: "Set or correct the customer's phone number.",
                    parameters: vec![param("phone", "The customer's phone number")],
                },
                FunctionDefinition {
                    name: "set_company",
                    description: "Set the company the customer works for.",
                    parameters: vec![param("company", "The company name")],
                },
                FunctionDefinition {
                    name: "add_note",
                    description: "Append a free-form note to the customer record.",
                    parameters: vec![param("note", "The note text to append")],
                },
            ],
        }
    }

    pub fn definitions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The catalog as a JSON value, for the decider's prompt context.
    pub fn as_context_value(&self) -> Value {
        serde_json::to_value(&self.functions).unwrap_or(Value::Null)
    }

    /// Validate `parameters` against the declared schema for `name`.
    ///
    /// Unknown function, missing required parameter, non-string value, and
    /// undeclared parameter are all validation errors.
    pub fn validate(&self, name: &str, parameters: &Map<String, Value>) -> Result<()> {
        let def = self
            .get(name)
            .ok_or_else(|| Error::FunctionValidation(format!("unknown function '{name}'")))?;

        for spec in &def.parameters {
            match parameters.get(spec.name) {
                Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(Error::FunctionValidation(format!(
                        "{name}: parameter '{}' must be a string, got {other}",
                        spec.name
                    )));
                }
                None if spec.required => {
                    return Err(Error::FunctionValidation(format!(
                        "{name}: missing required parameter '{}'",
                        spec.name
                    )));
                }
                None => {}
            }
        }

        for key in parameters.keys() {
            if !def.parameters.iter().any(|p| p.name == key) {
                return Err(Error::FunctionValidation(format!(
                    "{name}: undeclared parameter '{key}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn standard_catalog_validates_known_call() {
        let catalog = FunctionCatalog::standard();
        catalog
            .validate("set_role", &params(&[("role", json!("Director"))]))
            .unwrap();
    }

    #[test]
    fn unknown_function_is_rejected() {
        let catalog = FunctionCatalog::standard();
        let err = catalog.validate("unknown_fn", &params(&[])).unwrap_err();
        assert_eq!(err.kind(), "function_validation_error");
        assert!(err.to_string().contains("unknown_fn"));
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let catalog = FunctionCatalog::standard();
        let err = catalog.validate("set_role", &params(&[])).unwrap_err();
        assert!(err.to_string().contains("role"));
    }

    #[test]
    fn non_string_parameter_is_rejected() {
        let catalog = FunctionCatalog::standard();
        let err = catalog
            .validate("set_role", &params(&[("role", json!(42))]))
            .unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn undeclared_parameter_is_rejected() {
        let catalog = FunctionCatalog::standard();
        let err = catalog
            .validate(
                "set_role",
                &params(&[("role", json!("x")), ("rank", json!("y"))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("rank"));
    }

    #[test]
    fn context_value_lists_every_function() {
        let catalog = FunctionCatalog::standard();
        let value = catalog.as_context_value();
        let names: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"set_role"));
        assert!(names.contains(&"add_note"));
    }
}
