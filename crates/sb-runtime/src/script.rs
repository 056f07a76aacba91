//! Automation script parsing and config extraction
//!
//! An automation script binds a `config` object map at the top level and
//! defines handler functions named exactly `on_message` and/or
//! `on_schedule`. Parsing compiles the script, runs its body once in an
//! isolated scope, and pulls the declarative configuration out of the
//! resulting scope.

use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde::Serialize;

use crate::error::RuntimeError;

/// Handler invoked for bus messages: `on_message(topic, payload, ctx)`.
pub const ON_MESSAGE: &str = "on_message";

/// Handler invoked on cron ticks: `on_schedule(ctx)`.
pub const ON_SCHEDULE: &str = "on_schedule";

/// Declarative configuration extracted from a script's `config` map.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationConfig {
    /// Human-readable name; defaults to the automation id.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Topic filters to subscribe (used when `on_message` is defined).
    pub subscribe: Vec<String>,
    /// Optional 5-field cron expression (used when `on_schedule` is defined).
    pub schedule: Option<String>,
    /// Disabled automations load inert: no subscriptions, no cron.
    pub enabled: bool,
    /// Global-state keys this automation may write (exact or `prefix.*`).
    pub global_state_writes: Vec<String>,
}

/// A parsed automation script, ready to activate.
#[derive(Debug)]
pub struct ParsedScript {
    pub config: AutomationConfig,
    pub has_on_message: bool,
    pub has_on_schedule: bool,
    pub ast: AST,
}

impl ParsedScript {
    /// Compile `source` and extract its configuration and handlers.
    pub fn parse(engine: &Engine, id: &str, source: &str) -> Result<Self, RuntimeError> {
        let ast = engine
            .compile(source)
            .map_err(sb_script::ScriptError::from)?;

        let mut scope = Scope::new();
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(sb_script::ScriptError::from)?;

        let config_value = scope
            .get_value::<Dynamic>("config")
            .ok_or(RuntimeError::MissingConfig)?;
        let map = config_value
            .try_cast::<Map>()
            .ok_or(RuntimeError::ConfigNotMap)?;

        let config = AutomationConfig {
            name: string_field(&map, "name").unwrap_or_else(|| id.to_string()),
            description: string_field(&map, "description").unwrap_or_default(),
            subscribe: string_list_field(&map, "subscribe"),
            schedule: string_field(&map, "schedule"),
            enabled: bool_field(&map, "enabled", true),
            global_state_writes: string_list_field(&map, "global_state_writes"),
        };

        Ok(Self {
            config,
            has_on_message: defines_function(&ast, ON_MESSAGE),
            has_on_schedule: defines_function(&ast, ON_SCHEDULE),
            ast,
        })
    }
}

/// Whether the AST defines a script function with the given name.
pub fn defines_function(ast: &AST, name: &str) -> bool {
    ast.iter_functions().any(|f| f.name == name)
}

fn string_field(map: &Map, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|v| v.clone().into_string().ok())
}

fn bool_field(map: &Map, key: &str, default: bool) -> bool {
    map.get(key)
        .and_then(|v| v.as_bool().ok())
        .unwrap_or(default)
}

fn string_list_field(map: &Map, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(|v| v.clone().try_cast::<rhai::Array>())
        .map(|arr| {
            arr.into_iter()
                .filter_map(|v| v.into_string().ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<ParsedScript, RuntimeError> {
        let engine = sb_script::restricted_engine();
        ParsedScript::parse(&engine, "test", source)
    }

    #[test]
    fn test_parse_full_config() {
        let script = parse(
            r#"
            let config = #{
                name: "Motion lights",
                description: "Turns on the hall light",
                subscribe: ["home/motion/+"],
                schedule: "*/5 * * * *",
                enabled: true,
                global_state_writes: ["presence.*"],
            };

            fn on_message(topic, payload, ctx) { }
            fn on_schedule(ctx) { }
            "#,
        )
        .unwrap();

        assert_eq!(script.config.name, "Motion lights");
        assert_eq!(script.config.subscribe, vec!["home/motion/+"]);
        assert_eq!(script.config.schedule.as_deref(), Some("*/5 * * * *"));
        assert!(script.config.enabled);
        assert_eq!(script.config.global_state_writes, vec!["presence.*"]);
        assert!(script.has_on_message);
        assert!(script.has_on_schedule);
    }

    #[test]
    fn test_defaults_applied() {
        let script = parse(
            r#"
            let config = #{ subscribe: ["a/b"] };
            fn on_message(topic, payload, ctx) { }
            "#,
        )
        .unwrap();

        // Name falls back to the id; enabled defaults to true.
        assert_eq!(script.config.name, "test");
        assert_eq!(script.config.description, "");
        assert!(script.config.enabled);
        assert!(script.config.schedule.is_none());
        assert!(script.config.global_state_writes.is_empty());
        assert!(!script.has_on_schedule);
    }

    #[test]
    fn test_missing_config() {
        let err = parse("fn on_message(t, p, c) { }").unwrap_err();
        assert!(matches!(err, RuntimeError::MissingConfig));
    }

    #[test]
    fn test_config_not_a_map() {
        let err = parse(r#"let config = "nope";"#).unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigNotMap));
        assert_eq!(err.to_string(), "config must be a map");
    }

    #[test]
    fn test_syntax_error_propagates() {
        let err = parse("let config = #{").unwrap_err();
        assert!(err.to_string().starts_with("syntax error:"));
    }

    #[test]
    fn test_body_runtime_error_propagates() {
        let err = parse(r#"throw "boom";"#).unwrap_err();
        assert!(matches!(err, RuntimeError::Script(_)));
    }
}
