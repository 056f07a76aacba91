//! Pre-deployment script validation
//!
//! Runs candidate code once in isolation, on a bare restricted engine with
//! no context API registered, so nothing the validator executes can reach
//! the live bus or state. Structural problems accumulate into a list of
//! human-readable errors; only a missing or non-map `config` short-circuits,
//! since no handler check makes sense without one.

use rhai::{Dynamic, Map, Scope};
use serde::{Deserialize, Serialize};

use crate::script::{defines_function, ON_MESSAGE, ON_SCHEDULE};

/// What kind of script is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Automation,
    Library,
}

/// Result of validating one script.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Validate `code` without deploying it.
pub fn validate(code: &str, kind: ScriptKind) -> ValidationReport {
    if code.trim().is_empty() {
        return ValidationReport::failed(vec!["script is empty".to_string()]);
    }

    let engine = sb_script::restricted_engine();

    let ast = match engine.compile(code) {
        Ok(ast) => ast,
        Err(err) => {
            return ValidationReport::failed(vec![format!("syntax error: {err}")]);
        }
    };

    let mut scope = Scope::new();
    if let Err(err) = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast) {
        return ValidationReport::failed(vec![format!("syntax error: {err}")]);
    }

    if kind == ScriptKind::Library {
        return ValidationReport::ok();
    }

    // Automation structure mirrors the loader's requirements.
    let Some(config) = scope.get_value::<Dynamic>("config") else {
        return ValidationReport::failed(vec!["script does not define a config map".to_string()]);
    };
    let Some(map) = config.try_cast::<Map>() else {
        return ValidationReport::failed(vec!["config must be a map".to_string()]);
    };

    let mut errors = Vec::new();
    let enabled = map
        .get("enabled")
        .and_then(|v| v.as_bool().ok())
        .unwrap_or(true);

    if enabled {
        let mut any_handler = false;
        for name in [ON_MESSAGE, ON_SCHEDULE] {
            if defines_function(&ast, name) {
                any_handler = true;
            } else if scope.get_value::<Dynamic>(name).is_some() {
                errors.push(format!("{name} must be declared as a function"));
            }
        }
        if !any_handler {
            errors.push("must define on_message or on_schedule".to_string());
        }
    }

    if errors.is_empty() {
        ValidationReport::ok()
    } else {
        ValidationReport::failed(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_code_is_invalid() {
        for code in ["", "   ", "\n\t\n"] {
            let report = validate(code, ScriptKind::Automation);
            assert!(!report.valid);
            assert_eq!(report.errors, vec!["script is empty"]);
        }
    }

    #[test]
    fn test_library_needs_only_valid_syntax() {
        let report = validate("fn helper(x) { x + 1 }", ScriptKind::Library);
        assert!(report.valid);
    }

    #[test]
    fn test_syntax_error_is_reported_stably() {
        let report = validate("fn broken( {", ScriptKind::Library);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("syntax error:"));
    }

    #[test]
    fn test_top_level_failure_is_reported_as_syntax() {
        let report = validate(r#"throw "boom";"#, ScriptKind::Library);
        assert!(!report.valid);
        assert!(report.errors[0].starts_with("syntax error:"));
    }

    #[test]
    fn test_valid_automation() {
        let report = validate(
            r#"
            let config = #{ subscribe: ["a/b"] };
            fn on_message(topic, payload, ctx) { }
            "#,
            ScriptKind::Automation,
        );
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_missing_config_short_circuits() {
        let report = validate("fn on_message(t, p, c) { }", ScriptKind::Automation);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["script does not define a config map"]);
    }

    #[test]
    fn test_non_map_config_short_circuits() {
        let report = validate(
            r#"
            let config = [1, 2, 3];
            let on_message = 42;
            "#,
            ScriptKind::Automation,
        );
        assert!(!report.valid);
        // No handler checks after a bad config.
        assert_eq!(report.errors, vec!["config must be a map"]);
    }

    #[test]
    fn test_missing_handlers() {
        let report = validate("let config = #{};", ScriptKind::Automation);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["must define on_message or on_schedule"]);
    }

    #[test]
    fn test_shadowed_handler_accumulates_errors() {
        let report = validate(
            r#"
            let config = #{};
            let on_message = 42;
            "#,
            ScriptKind::Automation,
        );
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec![
                "on_message must be declared as a function",
                "must define on_message or on_schedule"
            ]
        );
    }

    #[test]
    fn test_disabled_automation_skips_handler_checks() {
        let report = validate("let config = #{ enabled: false };", ScriptKind::Automation);
        assert!(report.valid);
    }

    #[test]
    fn test_one_handler_suffices() {
        let report = validate(
            r#"
            let config = #{ schedule: "0 * * * *" };
            fn on_schedule(ctx) { }
            "#,
            ScriptKind::Automation,
        );
        assert!(report.valid);
    }
}
