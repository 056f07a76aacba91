//! Automation lifecycle and event dispatch
//!
//! The runtime owns the automation registry (id → instance). Loading a
//! script extracts its configuration, wires its handlers to bus topic
//! filters and a cron job, and publishes the instance atomically into the
//! registry. Reload fully unloads the previous instance first, so no two
//! instances of one id are ever live at the same time. Lifecycle operations
//! are serialized by a single async mutex; dispatch only reads.
//!
//! Handler invocations run as independent tasks with script evaluation on
//! blocking threads; invocations of the same automation may overlap in
//! time (see DESIGN.md for the concurrency contract).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rhai::{Dynamic, Engine, Scope, AST};
use sb_bus::{BusClient, BusMessage, MessageHandler, SubscriptionId};
use sb_core::{LogBuffer, LogEntry};
use sb_library::LibraryManager;
use sb_script::SCRIPT_EXTENSION;
use sb_state::StateStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::ScriptContext;
use crate::error::RuntimeError;
use crate::scheduler::{parse_schedule, CronJob};
use crate::script::{AutomationConfig, ParsedScript, ON_MESSAGE, ON_SCHEDULE};

/// Lifecycle state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    /// Active: subscriptions and cron are live.
    Loaded,
    /// Present but inert (`enabled: false`).
    Disabled,
}

/// A loaded automation instance.
pub struct Automation {
    pub id: String,
    pub path: PathBuf,
    pub config: AutomationConfig,
    pub status: AutomationStatus,
    pub has_on_message: bool,
    pub has_on_schedule: bool,
    subscriptions: Vec<SubscriptionId>,
    cron: Option<CronJob>,
}

/// The automation execution engine.
pub struct AutomationRuntime {
    engine: Arc<Engine>,
    bus: Arc<BusClient>,
    state: Arc<StateStore>,
    library: Arc<LibraryManager>,
    logs: Arc<LogBuffer>,
    scripts_dir: PathBuf,
    automations: DashMap<String, Arc<Automation>>,
    /// Serializes load/unload/reload; dispatch never takes it.
    lifecycle: Mutex<()>,
}

impl AutomationRuntime {
    /// Create a runtime over the given shared services and script directory.
    pub fn new(
        engine: Arc<Engine>,
        bus: Arc<BusClient>,
        state: Arc<StateStore>,
        library: Arc<LibraryManager>,
        logs: Arc<LogBuffer>,
        scripts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            bus,
            state,
            library,
            logs,
            scripts_dir: scripts_dir.into(),
            automations: DashMap::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// The directory automation scripts live in.
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// The shared execution log buffer.
    pub fn logs(&self) -> Arc<LogBuffer> {
        Arc::clone(&self.logs)
    }

    /// Load (or reload) the automation stored at `path`.
    ///
    /// Any previous instance with the same id is fully unloaded first, so
    /// there is never a window with two live instances. Returns the id.
    pub async fn load_file(&self, path: &Path) -> Result<String, RuntimeError> {
        let id = automation_id(path)?;
        let source = std::fs::read_to_string(path).map_err(|source| RuntimeError::ReadScript {
            path: path.to_path_buf(),
            source,
        })?;

        let _guard = self.lifecycle.lock().await;
        self.unload_locked(&id);

        let parsed = ParsedScript::parse(&self.engine, &id, &source)?;

        if !parsed.config.enabled {
            self.automations.insert(
                id.clone(),
                Arc::new(Automation {
                    id: id.clone(),
                    path: path.to_path_buf(),
                    config: parsed.config,
                    status: AutomationStatus::Disabled,
                    has_on_message: parsed.has_on_message,
                    has_on_schedule: parsed.has_on_schedule,
                    subscriptions: Vec::new(),
                    cron: None,
                }),
            );
            info!(automation = %id, "automation loaded disabled");
            return Ok(id);
        }

        if !parsed.has_on_message && !parsed.has_on_schedule {
            return Err(RuntimeError::NoHandlers);
        }

        // Parse the schedule before any subscription is made so a bad
        // expression needs no rollback.
        let schedule = match (&parsed.config.schedule, parsed.has_on_schedule) {
            (Some(expr), true) => Some(parse_schedule(expr)?),
            _ => None,
        };

        let invoker = Invoker {
            id: id.clone(),
            engine: Arc::clone(&self.engine),
            ast: Arc::new(parsed.ast),
            context: ScriptContext::new(
                id.clone(),
                parsed.config.global_state_writes.clone(),
                Arc::clone(&self.bus),
                Arc::clone(&self.state),
                Arc::clone(&self.library),
                Arc::clone(&self.logs),
            ),
            logs: Arc::clone(&self.logs),
        };

        let mut subscriptions = Vec::new();
        if parsed.has_on_message {
            for pattern in &parsed.config.subscribe {
                let inv = invoker.clone();
                let handler: MessageHandler = Arc::new(move |message| {
                    let inv = inv.clone();
                    Box::pin(async move { inv.invoke_on_message(message).await })
                });
                subscriptions.push(self.bus.subscribe(pattern, handler));
            }
        }

        let cron = schedule.map(|schedule| {
            let inv = invoker.clone();
            CronJob::spawn(schedule, move || {
                let inv = inv.clone();
                async move { inv.invoke_on_schedule().await }
            })
        });

        let automation = Arc::new(Automation {
            id: id.clone(),
            path: path.to_path_buf(),
            status: AutomationStatus::Loaded,
            has_on_message: parsed.has_on_message,
            has_on_schedule: parsed.has_on_schedule,
            subscriptions,
            cron,
            config: parsed.config,
        });
        info!(
            automation = %id,
            subscriptions = automation.subscriptions.len(),
            scheduled = automation.cron.is_some(),
            "automation loaded"
        );
        self.automations.insert(id.clone(), automation);
        Ok(id)
    }

    /// Reload an automation by id from the scripts directory.
    pub async fn reload(&self, id: &str) -> Result<String, RuntimeError> {
        if id.contains('/') || id.contains('\\') {
            return Err(RuntimeError::InvalidId(id.to_string()));
        }
        let path = self.scripts_dir.join(format!("{id}.{SCRIPT_EXTENSION}"));
        self.load_file(&path).await
    }

    /// Unload an automation: all subscriptions removed and the cron job
    /// cancelled before this returns. Returns whether the id was loaded.
    pub async fn unload(&self, id: &str) -> bool {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(id)
    }

    /// Load every script file directly in the scripts directory.
    ///
    /// Returns the number of automations loaded and the per-file errors;
    /// one broken script never stops the others.
    pub async fn load_dir(&self) -> (usize, Vec<(String, RuntimeError)>) {
        let mut loaded = 0;
        let mut errors = Vec::new();

        for path in script_files(&self.scripts_dir) {
            match self.load_file(&path).await {
                Ok(_) => loaded += 1,
                Err(err) => {
                    let id = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("?")
                        .to_string();
                    warn!(automation = %id, %err, "automation failed to load");
                    self.logs
                        .add(LogEntry::error(&id, format!("load failed: {err}")));
                    errors.push((id, err));
                }
            }
        }
        (loaded, errors)
    }

    /// Reload every loaded automation from disk. Used after a library
    /// reload, since changed library symbols alter script behavior.
    pub async fn reload_all(&self) {
        let mut ids: Vec<String> = self.automations.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        for id in ids {
            if let Err(err) = self.reload(&id).await {
                warn!(automation = %id, %err, "automation failed to reload");
                self.logs
                    .add(LogEntry::error(&id, format!("reload failed: {err}")));
            }
        }
    }

    /// Look up a loaded automation.
    pub fn get(&self, id: &str) -> Option<Arc<Automation>> {
        self.automations.get(id).map(|e| Arc::clone(e.value()))
    }

    /// All loaded automations, sorted by id.
    pub fn automations(&self) -> Vec<Arc<Automation>> {
        let mut out: Vec<_> = self
            .automations
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Declared global write patterns, keyed by pattern with the declaring
    /// automation ids.
    pub fn global_write_schema(&self) -> BTreeMap<String, Vec<String>> {
        let mut schema: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.automations.iter() {
            for pattern in &entry.value().config.global_state_writes {
                schema
                    .entry(pattern.clone())
                    .or_default()
                    .push(entry.key().clone());
            }
        }
        for ids in schema.values_mut() {
            ids.sort();
            ids.dedup();
        }
        schema
    }

    fn unload_locked(&self, id: &str) -> bool {
        let Some((_, automation)) = self.automations.remove(id) else {
            return false;
        };
        for subscription in &automation.subscriptions {
            self.bus.unsubscribe(*subscription);
        }
        if let Some(cron) = &automation.cron {
            cron.cancel();
        }
        info!(automation = %id, "automation unloaded");
        true
    }
}

/// Derive the automation id from a script path.
fn automation_id(path: &Path) -> Result<String, RuntimeError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| RuntimeError::InvalidId(path.display().to_string()))?;
    if stem.contains('/') || stem.contains('\\') {
        return Err(RuntimeError::InvalidId(stem.to_string()));
    }
    Ok(stem.to_string())
}

/// All script files directly inside `dir`, sorted.
fn script_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION))
        .collect();
    paths.sort();
    paths
}

/// Everything needed to invoke one automation's handlers.
#[derive(Clone)]
struct Invoker {
    id: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    context: ScriptContext,
    logs: Arc<LogBuffer>,
}

impl Invoker {
    async fn invoke_on_message(&self, message: BusMessage) {
        let engine = Arc::clone(&self.engine);
        let ast = Arc::clone(&self.ast);
        let ctx = self.context.clone();
        let topic = message.topic.clone();
        let payload = message.payload_text();

        let joined = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            engine
                .call_fn::<Dynamic>(&mut scope, &ast, ON_MESSAGE, (topic, payload, ctx))
                .map(|_| ())
                .map_err(|err| err.to_string())
        })
        .await;
        self.report(ON_MESSAGE, joined);
    }

    async fn invoke_on_schedule(&self) {
        let engine = Arc::clone(&self.engine);
        let ast = Arc::clone(&self.ast);
        let ctx = self.context.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            engine
                .call_fn::<Dynamic>(&mut scope, &ast, ON_SCHEDULE, (ctx,))
                .map(|_| ())
                .map_err(|err| err.to_string())
        })
        .await;
        self.report(ON_SCHEDULE, joined);
    }

    /// A failing handler skips this invocation and stays eligible for the
    /// next event; the failure is logged, never fatal.
    fn report(&self, handler: &'static str, joined: Result<Result<(), String>, tokio::task::JoinError>) {
        let error = match joined {
            Ok(Ok(())) => return,
            Ok(Err(message)) => message,
            Err(join_err) => join_err.to_string(),
        };
        warn!(automation = %self.id, handler, error = %error, "handler invocation failed");
        self.logs
            .add(LogEntry::error(&self.id, format!("{handler} failed: {error}")));
    }
}
