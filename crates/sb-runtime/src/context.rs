//! Per-invocation script capability object
//!
//! Every handler invocation receives a fresh `Context` bound to the invoking
//! automation. The context is the only side-effect surface scripts have:
//! bus publish, ring-buffer logging, JSON conversion, scoped state, guarded
//! global state, library calls, and the clock.
//!
//! Global-state writes outside the automation's declared patterns are
//! dropped with a log entry and reported as `false`, never raised (see
//! DESIGN.md on this soft-fail choice).

use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Position};
use sb_bus::BusClient;
use sb_core::{can_write, LogBuffer, LogEntry};
use sb_library::LibraryManager;
use sb_script::{dynamic_to_json, json_to_dynamic};
use sb_state::{StateStore, GLOBAL_NAMESPACE};
use tracing::{debug, warn};

/// Capability object handed to script handlers as `ctx`.
#[derive(Clone)]
pub struct ScriptContext {
    automation_id: String,
    write_patterns: Arc<Vec<String>>,
    bus: Arc<BusClient>,
    state: Arc<StateStore>,
    library: Arc<LibraryManager>,
    logs: Arc<LogBuffer>,
}

impl ScriptContext {
    /// Build a context bound to one automation.
    pub fn new(
        automation_id: impl Into<String>,
        write_patterns: Vec<String>,
        bus: Arc<BusClient>,
        state: Arc<StateStore>,
        library: Arc<LibraryManager>,
        logs: Arc<LogBuffer>,
    ) -> Self {
        Self {
            automation_id: automation_id.into(),
            write_patterns: Arc::new(write_patterns),
            bus,
            state,
            library,
            logs,
        }
    }

    /// Id of the automation this context is bound to.
    pub fn automation_id(&self) -> &str {
        &self.automation_id
    }

    /// Publish to the bus. Failures are reported, never raised.
    pub fn publish(&self, topic: &str, payload: &str) -> bool {
        self.bus.publish(topic, payload.as_bytes())
    }

    /// Append to the execution log, tagged with the automation id.
    pub fn log(&self, message: &str) {
        debug!(automation = %self.automation_id, message, "script log");
        self.logs.add(LogEntry::info(&self.automation_id, message));
    }

    /// Encode a script value as a JSON string.
    pub fn json_encode(&self, value: &Dynamic) -> String {
        dynamic_to_json(value).to_string()
    }

    /// Decode a JSON string into a script value.
    pub fn json_decode(&self, text: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Ok(json_to_dynamic(&value)),
            Err(err) => Err(script_error(format!("json decode error: {err}"))),
        }
    }

    /// Read a key from the automation's own namespace.
    pub fn get_state(&self, key: &str) -> Dynamic {
        self.state
            .get(&self.automation_id, key)
            .map(|v| json_to_dynamic(&v))
            .unwrap_or(Dynamic::UNIT)
    }

    /// Write a key in the automation's own namespace.
    pub fn set_state(&self, key: &str, value: Dynamic) -> bool {
        self.state
            .set(&self.automation_id, key, &dynamic_to_json(&value))
    }

    /// Remove a key from the automation's own namespace.
    pub fn clear_state(&self, key: &str) -> bool {
        self.state.clear(&self.automation_id, key)
    }

    /// Read a global key. Reads are unrestricted.
    pub fn get_global(&self, key: &str) -> Dynamic {
        self.state
            .get(GLOBAL_NAMESPACE, key)
            .map(|v| json_to_dynamic(&v))
            .unwrap_or(Dynamic::UNIT)
    }

    /// Write a global key, subject to the declared write patterns.
    pub fn set_global(&self, key: &str, value: Dynamic) -> bool {
        if !self.check_global_write(key) {
            return false;
        }
        self.state.set(GLOBAL_NAMESPACE, key, &dynamic_to_json(&value))
    }

    /// Remove a global key, subject to the declared write patterns.
    pub fn clear_global(&self, key: &str) -> bool {
        if !self.check_global_write(key) {
            return false;
        }
        self.state.clear(GLOBAL_NAMESPACE, key)
    }

    /// Current unix timestamp in seconds.
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Call a public library function through the explicit registry.
    pub fn lib_call(
        &self,
        module: &str,
        function: &str,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        self.library
            .call(module, function, args)
            .map_err(|err| script_error(err.to_string()))
    }

    fn check_global_write(&self, key: &str) -> bool {
        if can_write(&self.write_patterns, key) {
            return true;
        }
        warn!(
            automation = %self.automation_id,
            key,
            "global write denied: no matching write pattern"
        );
        self.logs.add(LogEntry::error(
            &self.automation_id,
            format!("global write to {key:?} denied: no matching write pattern"),
        ));
        false
    }
}

fn script_error(message: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(message.into(), Position::NONE))
}

/// Register the `Context` type and its method surface on an engine.
///
/// Called once on the shared runtime engine; the validator deliberately
/// skips this so validated code has no reachable side effects.
pub fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptContext>("Context");

    engine.register_fn("publish", |ctx: &mut ScriptContext, topic: &str, payload: &str| {
        ctx.publish(topic, payload)
    });
    engine.register_fn("log", |ctx: &mut ScriptContext, message: &str| {
        ctx.log(message);
    });
    engine.register_fn("json_encode", |ctx: &mut ScriptContext, value: Dynamic| {
        ctx.json_encode(&value)
    });
    engine.register_fn("json_decode", |ctx: &mut ScriptContext, text: &str| {
        ctx.json_decode(text)
    });
    engine.register_fn("get_state", |ctx: &mut ScriptContext, key: &str| {
        ctx.get_state(key)
    });
    engine.register_fn(
        "set_state",
        |ctx: &mut ScriptContext, key: &str, value: Dynamic| ctx.set_state(key, value),
    );
    engine.register_fn("clear_state", |ctx: &mut ScriptContext, key: &str| {
        ctx.clear_state(key)
    });
    engine.register_fn("get_global", |ctx: &mut ScriptContext, key: &str| {
        ctx.get_global(key)
    });
    engine.register_fn(
        "set_global",
        |ctx: &mut ScriptContext, key: &str, value: Dynamic| ctx.set_global(key, value),
    );
    engine.register_fn("clear_global", |ctx: &mut ScriptContext, key: &str| {
        ctx.clear_global(key)
    });
    engine.register_fn("now", |ctx: &mut ScriptContext| ctx.now());

    // lib("module", "function", args…) with up to five call arguments.
    engine.register_fn("lib", |ctx: &mut ScriptContext, m: &str, f: &str| {
        ctx.lib_call(m, f, vec![])
    });
    engine.register_fn(
        "lib",
        |ctx: &mut ScriptContext, m: &str, f: &str, a1: Dynamic| ctx.lib_call(m, f, vec![a1]),
    );
    engine.register_fn(
        "lib",
        |ctx: &mut ScriptContext, m: &str, f: &str, a1: Dynamic, a2: Dynamic| {
            ctx.lib_call(m, f, vec![a1, a2])
        },
    );
    engine.register_fn(
        "lib",
        |ctx: &mut ScriptContext, m: &str, f: &str, a1: Dynamic, a2: Dynamic, a3: Dynamic| {
            ctx.lib_call(m, f, vec![a1, a2, a3])
        },
    );
    engine.register_fn(
        "lib",
        |ctx: &mut ScriptContext,
         m: &str,
         f: &str,
         a1: Dynamic,
         a2: Dynamic,
         a3: Dynamic,
         a4: Dynamic| ctx.lib_call(m, f, vec![a1, a2, a3, a4]),
    );
    engine.register_fn(
        "lib",
        |ctx: &mut ScriptContext,
         m: &str,
         f: &str,
         a1: Dynamic,
         a2: Dynamic,
         a3: Dynamic,
         a4: Dynamic,
         a5: Dynamic| ctx.lib_call(m, f, vec![a1, a2, a3, a4, a5]),
    );
}
