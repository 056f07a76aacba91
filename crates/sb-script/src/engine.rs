//! Restricted engine construction

use rhai::Engine;

/// Hard budget on evaluated operations per invocation.
const MAX_OPERATIONS: u64 = 500_000;

/// Maximum nested function calls (also caps script recursion).
const MAX_CALL_LEVELS: usize = 32;

/// Maximum expression nesting, at global level and inside functions.
const MAX_EXPR_DEPTH: usize = 64;

/// Maximum string length scripts may build (1 MiB).
const MAX_STRING_SIZE: usize = 1024 * 1024;

/// Maximum array length scripts may build.
const MAX_ARRAY_SIZE: usize = 10_000;

/// Maximum object-map size scripts may build.
const MAX_MAP_SIZE: usize = 10_000;

/// Build the restricted engine every script runs in.
///
/// The returned engine has no module resolver registered and `eval` is
/// disabled, so scripts cannot load code or reach the filesystem, network,
/// or process environment. Runaway scripts are cut off by the operation
/// budget rather than wall-clock time.
pub fn restricted_engine() -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_ARRAY_SIZE);
    engine.set_max_map_size(MAX_MAP_SIZE);

    engine.disable_symbol("eval");

    engine
}
