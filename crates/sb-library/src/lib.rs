//! Library manager for scriptbus
//!
//! Library modules are script files in the `lib/` subdirectory holding
//! reusable functions any automation can call through its context:
//! `ctx.lib("module", "function", args…)`. The manager is responsible for:
//! - Loading every module file, rejecting underscore-prefixed symbols
//! - Replacing the whole module set atomically on each reload (a deleted
//!   file disappears; a broken file fails the entire reload and leaves the
//!   previous set live)
//! - Dispatching calls through an explicit (module, function) registry with
//!   clear unknown-module/unknown-function errors

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rhai::{Dynamic, Engine, FnAccess, Scope, AST};
use sb_script::{ScriptError, SCRIPT_EXTENSION};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from loading or calling library modules.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The library directory could not be scanned.
    #[error("failed to read library directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A module file could not be read.
    #[error("failed to read library file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A module failed to compile or evaluate.
    #[error("library module {module}: {source}")]
    Module {
        module: String,
        source: ScriptError,
    },

    /// Call target module does not exist.
    #[error("unknown library module: {0}")]
    UnknownModule(String),

    /// Call target function does not exist (or is private).
    #[error("unknown library function: {module}.{function}")]
    UnknownFunction { module: String, function: String },

    /// The called function raised an error.
    #[error("library call {module}.{function} failed: {message}")]
    Call {
        module: String,
        function: String,
        message: String,
    },
}

/// One loaded library module.
pub struct LibraryModule {
    /// Module name (file stem), used as the call namespace.
    pub name: String,
    /// Description from the module's leading `//!` comment, if any.
    pub description: Option<String>,
    /// Original source text.
    pub source: String,
    /// Public function names, sorted.
    pub functions: Vec<String>,
    ast: AST,
}

impl LibraryModule {
    fn compile(engine: &Engine, name: &str, source: String) -> Result<Self, LibraryError> {
        let wrap = |err: ScriptError| LibraryError::Module {
            module: name.to_string(),
            source: err,
        };

        let ast = engine.compile(&source).map_err(|e| wrap(e.into()))?;

        // Run the module body once in isolation so load-time errors surface
        // here instead of at first call.
        let mut scope = Scope::new();
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| wrap(e.into()))?;

        let mut functions: Vec<String> = ast
            .iter_functions()
            .filter(|f| f.access != FnAccess::Private)
            .map(|f| f.name.to_string())
            .filter(|name| !name.starts_with('_'))
            .collect();
        functions.sort();
        functions.dedup();

        Ok(Self {
            name: name.to_string(),
            description: module_description(&source),
            source,
            functions,
            ast,
        })
    }

    /// Whether `function` is publicly callable on this module.
    pub fn has_function(&self, function: &str) -> bool {
        self.functions.iter().any(|f| f == function)
    }
}

/// Extract the module description from a leading `//!` comment line.
fn module_description(source: &str) -> Option<String> {
    let first = source.lines().find(|line| !line.trim().is_empty())?;
    let text = first.trim().strip_prefix("//!")?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// The shared library manager.
///
/// The module map is read on every `ctx.lib(..)` call and written only on
/// reload, so it is kept as an `Arc` snapshot swapped under a write lock.
pub struct LibraryManager {
    engine: Arc<Engine>,
    modules: RwLock<Arc<HashMap<String, Arc<LibraryModule>>>>,
}

impl LibraryManager {
    /// Create a manager evaluating modules on the given engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            modules: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Load every module file in `dir`, replacing the current set.
    ///
    /// All-or-nothing: any file that fails to read, compile, or evaluate
    /// fails the whole reload and the previous set stays live. A missing
    /// directory simply yields an empty set. Returns the number of modules
    /// loaded.
    pub fn load_all(&self, dir: &Path) -> Result<usize, LibraryError> {
        let mut fresh: HashMap<String, Arc<LibraryModule>> = HashMap::new();

        if dir.is_dir() {
            let entries = std::fs::read_dir(dir).map_err(|source| LibraryError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let mut paths: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION))
                .collect();
            paths.sort();

            for path in paths {
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let source =
                    std::fs::read_to_string(&path).map_err(|source| LibraryError::ReadFile {
                        path: path.clone(),
                        source,
                    })?;
                let module = LibraryModule::compile(&self.engine, name, source)?;
                debug!(module = name, functions = module.functions.len(), "library module loaded");
                fresh.insert(name.to_string(), Arc::new(module));
            }
        }

        let count = fresh.len();
        match self.modules.write() {
            Ok(mut current) => *current = Arc::new(fresh),
            Err(_) => warn!("library module map lock poisoned; reload dropped"),
        }
        info!(modules = count, "library reloaded");
        Ok(count)
    }

    /// Look up a module by name.
    pub fn module(&self, name: &str) -> Option<Arc<LibraryModule>> {
        self.snapshot().get(name).cloned()
    }

    /// All loaded modules, sorted by name.
    pub fn modules(&self) -> Vec<Arc<LibraryModule>> {
        let snapshot = self.snapshot();
        let mut out: Vec<_> = snapshot.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Call a public library function.
    pub fn call(
        &self,
        module: &str,
        function: &str,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, LibraryError> {
        let Some(module_ref) = self.module(module) else {
            return Err(LibraryError::UnknownModule(module.to_string()));
        };
        if !module_ref.has_function(function) {
            return Err(LibraryError::UnknownFunction {
                module: module.to_string(),
                function: function.to_string(),
            });
        }

        let mut scope = Scope::new();
        self.engine
            .call_fn::<Dynamic>(&mut scope, &module_ref.ast, function, args)
            .map_err(|err| LibraryError::Call {
                module: module.to_string(),
                function: function.to_string(),
                message: err.to_string(),
            })
    }

    fn snapshot(&self) -> Arc<HashMap<String, Arc<LibraryModule>>> {
        self.modules
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }
}
