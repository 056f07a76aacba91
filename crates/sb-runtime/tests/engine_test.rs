//! End-to-end engine tests over the demo script set.
//!
//! Loads the real scripts from `demos/` into a broker-less engine and
//! drives them with bus traffic: message in, republish out, log entries,
//! guarded global writes, and the debounce helper's window semantics.

use std::sync::Arc;
use std::time::Duration;

use rhai::Dynamic;
use sb_bus::BusClient;
use sb_core::{LogBuffer, MessageBuffer};
use sb_library::LibraryManager;
use sb_runtime::{validator, AutomationRuntime, ScriptContext, ScriptKind};
use sb_state::{StateStore, GLOBAL_NAMESPACE};

const HELPERS: &str = include_str!("../../../demos/lib/helpers.rhai");
const MOTION_LIGHT: &str = include_str!("../../../demos/motion_light.rhai");
const HEARTBEAT: &str = include_str!("../../../demos/heartbeat.rhai");

struct Fixture {
    runtime: AutomationRuntime,
    bus: Arc<BusClient>,
    state: Arc<StateStore>,
    library: Arc<LibraryManager>,
    logs: Arc<LogBuffer>,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let engine = Arc::new(sb_runtime::runtime_engine());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/helpers.rhai"), HELPERS).unwrap();

        let bus = BusClient::in_memory(Arc::new(MessageBuffer::new(64)));
        let state = Arc::new(StateStore::open_in_memory().unwrap());
        let library = Arc::new(LibraryManager::new(Arc::clone(&engine)));
        library.load_all(&dir.path().join("lib")).unwrap();
        let logs = Arc::new(LogBuffer::new(64));

        let runtime = AutomationRuntime::new(
            engine,
            Arc::clone(&bus),
            Arc::clone(&state),
            Arc::clone(&library),
            Arc::clone(&logs),
            dir.path(),
        );
        Self {
            runtime,
            bus,
            state,
            library,
            logs,
            dir,
        }
    }

    async fn load(&self, id: &str, source: &str) {
        let path = self.dir.path().join(format!("{id}.rhai"));
        std::fs::write(&path, source).unwrap();
        self.runtime.load_file(&path).await.unwrap();
    }

    fn context(&self, id: &str) -> ScriptContext {
        ScriptContext::new(
            id,
            Vec::new(),
            Arc::clone(&self.bus),
            Arc::clone(&self.state),
            Arc::clone(&self.library),
            Arc::clone(&self.logs),
        )
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

#[test]
fn test_demo_scripts_validate() {
    assert!(validator::validate(HELPERS, ScriptKind::Library).valid);
    for automation in [MOTION_LIGHT, HEARTBEAT] {
        let report = validator::validate(automation, ScriptKind::Automation);
        assert!(report.valid, "demo rejected: {:?}", report.errors);
    }
}

#[tokio::test]
async fn test_motion_light_end_to_end() {
    let fx = Fixture::new();
    fx.load("motion_light", MOTION_LIGHT).await;

    fx.bus.publish("home/motion/kitchen", b"1");

    // One dispatch cycle later the light command is on the bus, the log
    // call is recorded, and the declared global key was written.
    wait_until(|| {
        fx.bus
            .messages()
            .get_all()
            .iter()
            .any(|m| m.topic == "home/light/hall/set")
    })
    .await;
    wait_until(|| fx.logs.count() == 1).await;
    assert!(fx.logs.get_all()[0].message.contains("hall light on"));
    assert!(fx
        .state
        .get(GLOBAL_NAMESPACE, "presence.last_motion")
        .is_some());

    // A second motion event inside the debounce window stays dark.
    fx.bus.publish("home/motion/kitchen", b"1");
    tokio::time::sleep(Duration::from_millis(200)).await;
    let light_commands = fx
        .bus
        .messages()
        .get_all()
        .iter()
        .filter(|m| m.topic == "home/light/hall/set")
        .count();
    assert_eq!(light_commands, 1);
}

#[tokio::test]
async fn test_heartbeat_loads_scheduled() {
    let fx = Fixture::new();
    fx.load("heartbeat", HEARTBEAT).await;

    let automation = fx.runtime.get("heartbeat").unwrap();
    assert_eq!(automation.config.schedule.as_deref(), Some("*/5 * * * *"));
    assert!(automation.has_on_schedule);
    assert!(!automation.has_on_message);
    // No topic subscriptions for a schedule-only automation.
    assert_eq!(fx.bus.subscription_count(), 0);
}

#[tokio::test]
async fn test_debounce_window_semantics() {
    let fx = Fixture::new();
    let ctx = fx.context("debouncer");

    let call = |key: &str, delay: i64| {
        fx.library
            .call(
                "helpers",
                "debounce",
                vec![
                    Dynamic::from(ctx.clone()),
                    Dynamic::from(key.to_string()),
                    Dynamic::from(delay),
                ],
            )
            .unwrap()
            .as_bool()
            .unwrap()
    };

    // First call on an unset key fires and stores "now".
    assert!(call("door", 60));
    // Inside the window it stays quiet.
    assert!(!call("door", 60));
    assert!(!call("door", 60));

    // A short window reopens after the delay elapses.
    assert!(call("gate", 1));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(call("gate", 1));
}

#[tokio::test]
async fn test_to_number_helper() {
    let fx = Fixture::new();
    let call = |payload: &str| {
        fx.library
            .call(
                "helpers",
                "to_number",
                vec![
                    Dynamic::from(payload.to_string()),
                    Dynamic::from(0.0_f64),
                ],
            )
            .unwrap()
    };

    assert_eq!(call(" 21.5 ").as_float().unwrap(), 21.5);
    assert_eq!(call("garbage").as_float().unwrap(), 0.0);
}
