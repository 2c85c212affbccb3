use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tempfile::TempDir;

use super::*;
use crate::{
    aggregations::{AggregationProvider, AggregationStore, CounterRecord, Sample, StoreError},
    runtime::{Execution, ScriptRuntime},
};

fn create_test_store() -> (TempDir, Arc<AggregationStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = AggregationStore::open(temp_dir.path().join("aggregations"), None).unwrap();
    (temp_dir, Arc::new(store))
}

fn args(pairs: &[(&str, Value)]) -> Map {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn strings(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|s| Value::String(s.to_string())).collect())
}

fn run(source: &str) -> Execution {
    ScriptRuntime::default().run_source("test", source, Map::new())
}

/// Runs a one-line script `$value = <expression>` and returns the value
fn eval(expression: &str) -> Result<Value, ScriptError> {
    let execution = run(&format!("$value = {expression}"));
    execution
        .into_result()
        .map(|mut output| output.shift_remove("value").unwrap_or(Value::Null))
}

fn eval_ok(expression: &str) -> Value {
    eval(expression).unwrap_or_else(|e| panic!("{expression} failed: {e}"))
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Notification, Option<String>, Option<String>)>>,
}

impl NotificationProvider for RecordingNotifier {
    fn send_notification(
        &self,
        notification: &Notification,
        channel: Option<&str>,
        flow: Option<&str>,
    ) -> bool {
        self.sent.lock().push((
            notification.clone(),
            channel.map(str::to_string),
            flow.map(str::to_string),
        ));
        true
    }
}

#[derive(Default)]
struct RecordingSpawner {
    jobs: Mutex<Vec<(String, String, Map)>>,
}

impl JobSpawner for RecordingSpawner {
    fn spawn_job(&self, flow_tag: &str, plugin_kind: &str, config: Map) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|(tag, _, _)| tag == flow_tag) {
            anyhow::bail!("a job with tag `{flow_tag}` already exists");
        }
        jobs.push((flow_tag.to_string(), plugin_kind.to_string(), config));
        Ok(())
    }
}

#[derive(Default)]
struct CannedHttp {
    requests: Mutex<Vec<HttpRequest>>,
}

impl HttpClient for CannedHttp {
    fn request(&self, request: &HttpRequest) -> anyhow::Result<String> {
        self.requests.lock().push(request.clone());
        Ok(r#"{"status": "ok", "load": 0.5}"#.to_string())
    }
}

#[derive(Default)]
struct StaticSheets {
    reads: AtomicUsize,
}

impl SheetProvider for StaticSheets {
    fn rows(&self, _source: &SheetSource, sheet: Option<&str>) -> anyhow::Result<Vec<Vec<Value>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(sheet) = sheet {
            anyhow::bail!("no sheet named {sheet}");
        }
        Ok(vec![
            vec![Value::from("name"), Value::from("value")],
            vec![Value::from("cpu"), Value::from(0.5)],
        ])
    }
}

/// A store whose every operation fails
struct BrokenStore;

impl AggregationProvider for BrokenStore {
    fn get_counter(&self, name: &str) -> Result<Option<CounterRecord>, StoreError> {
        Err(StoreError::Corrupt {
            bucket: "_counters".to_string(),
            key: name.to_string(),
        })
    }

    fn set_counter(&self, _: &str, _: f64) -> Result<CounterRecord, StoreError> {
        Err(StoreError::Disabled)
    }

    fn increment_counter(&self, _: &str, _: f64) -> Result<CounterRecord, StoreError> {
        Err(StoreError::Disabled)
    }

    fn get_series(&self, name: &str) -> Result<Option<Vec<Sample>>, StoreError> {
        Err(StoreError::Corrupt {
            bucket: name.to_string(),
            key: "00000000000000000001".to_string(),
        })
    }

    fn append_sample(&self, _: &str, _: Sample) -> Result<(), StoreError> {
        Err(StoreError::Disabled)
    }
}

// Executor

#[test]
fn test_partial_output_on_unknown_argument() {
    let execution = ScriptRuntime::default().run_source(
        "test",
        "$first = 1\n$second = arg(\"missing\")\n$third = 3",
        Map::new(),
    );

    assert_eq!(execution.output, args(&[("first", Value::Number(1.0))]));
    match execution.result {
        Err(ScriptError::UnknownArgument { name, position }) => {
            assert_eq!(name, "missing");
            assert_eq!(position.line, 2);
        }
        other => panic!("expected UnknownArgument, got {other:?}"),
    }
}

#[test]
fn test_commands_run_in_order_and_last_write_wins() {
    let output = run("$a = 1\n$b = 2\n$a = 3").into_result().unwrap();
    assert_eq!(output.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(output["a"], Value::Number(3.0));
}

#[test]
fn test_execute_directly() {
    let registry = GlobalRegistry::standard();
    let script = crate::parser::parse("$x = arg(\"n\") * 2").unwrap();
    let mut context = ExecutionContext::new(&registry, args(&[("n", Value::Number(21.0))]));

    execute(&script.commands, &mut context).unwrap();
    assert_eq!(context.output()["x"], Value::Number(42.0));
}

#[test]
fn test_arguments_keep_their_shape() {
    let runtime = ScriptRuntime::default();
    let caller_args = args(&[(
        "config",
        Value::Map(args(&[("hosts", strings(&["a", "b"]))])),
    )]);

    let output = runtime
        .run_source("test", "$hosts = arg(\"config\").hosts.join(\";\")", caller_args)
        .into_result()
        .unwrap();
    assert_eq!(output["hosts"], Value::from("a;b"));
}

// Expression model

#[test]
fn test_literals_and_operators() {
    assert_eq!(eval_ok("1 + 2 * 3"), Value::Number(7.0));
    assert_eq!(eval_ok("(1 + 2) * 3"), Value::Number(9.0));
    assert_eq!(eval_ok("7 % 4"), Value::Number(3.0));
    assert_eq!(eval_ok("-2 * -2"), Value::Number(4.0));
    assert_eq!(eval_ok("\"n=\" + 5"), Value::from("n=5"));
    assert_eq!(eval_ok("\"a\" < \"b\""), Value::Boolean(true));
    assert_eq!(eval_ok("[1, 2] == [1, 2]"), Value::Boolean(true));
    assert_eq!(eval_ok("null != 0"), Value::Boolean(true));
    assert_eq!(eval_ok("!(1 > 2) && true"), Value::Boolean(true));
}

#[test]
fn test_logical_operators_short_circuit() {
    // The right side would raise if it were evaluated
    assert_eq!(eval_ok("false && error(\"boom\")"), Value::Boolean(false));
    assert_eq!(eval_ok("true || error(\"boom\")"), Value::Boolean(true));
    assert!(matches!(
        eval("true && error(\"boom\")"),
        Err(ScriptError::UserRaised { .. })
    ));
}

#[test]
fn test_operator_errors() {
    assert!(matches!(eval("1 / 0"), Err(ScriptError::DivisionByZero { .. })));
    assert!(matches!(eval("1 % 0"), Err(ScriptError::DivisionByZero { .. })));
    assert!(matches!(eval("true + 1"), Err(ScriptError::Type { .. })));
    assert!(matches!(eval("1 < \"2\""), Err(ScriptError::Type { .. })));
    assert!(matches!(eval("-\"x\""), Err(ScriptError::UnaryType { .. })));
    assert!(matches!(eval("1 && true"), Err(ScriptError::UnaryType { .. })));
}

#[test]
fn test_unknown_property_names_target_and_key() {
    let err = eval("\"abc\".foo").unwrap_err();
    assert_eq!(
        err.to_string(),
        "String(abc) does not contain a property with the key `foo` (line 1, column 16)"
    );

    let err = eval("nothing()").unwrap_err();
    assert!(matches!(
        err,
        ScriptError::UnknownProperty { ref target, ref property, .. }
            if target == "Global()" && property == "nothing"
    ));
}

#[test]
fn test_uncalled_callables_are_not_values() {
    let err = eval("now").unwrap_err();
    assert!(matches!(err, ScriptError::NotAValue { ref target, .. } if target == "Callable(now)"));

    let err = eval("excel(\"report.xlsx\")").unwrap_err();
    assert!(matches!(err, ScriptError::NotAValue { .. }));
}

#[test]
fn test_calling_a_value() {
    let err = eval("\"abc\".length()").unwrap_err();
    assert!(matches!(err, ScriptError::NotCallable { .. }));
}

#[test]
fn test_string_members() {
    assert_eq!(eval_ok("\"a,b,c\".split(\",\")"), strings(&["a", "b", "c"]));
    assert_eq!(eval_ok("\"a,b,c\".split(separator = \",\")"), strings(&["a", "b", "c"]));
    assert_eq!(eval_ok("\"héllo\".length"), Value::Number(5.0));
    assert_eq!(eval_ok("\"  Mixed \".trim().upper()"), Value::from("MIXED"));
    assert_eq!(eval_ok("\"ABC\".lower()"), Value::from("abc"));
}

#[test]
fn test_split_requires_separator() {
    let err = eval("\"a,b\".split()").unwrap_err();
    assert!(matches!(
        err,
        ScriptError::MissingArgument { ref callable, ref parameter, .. }
            if callable == "split" && parameter == "separator"
    ));
}

#[test]
fn test_numeric_members() {
    assert_eq!(eval_ok("3.14159.round(digits = 2)"), Value::Number(3.14));
    assert_eq!(eval_ok("2.5.round()"), Value::Number(3.0));
    assert_eq!(eval_ok("2.7.floor()"), Value::Number(2.0));
    assert_eq!(eval_ok("2.1.ceil()"), Value::Number(3.0));
    assert_eq!(eval_ok("(0 - 4).abs()"), Value::Number(4.0));
    assert!(matches!(
        eval("1.round(digits = 0.5)"),
        Err(ScriptError::InvalidArgument { .. })
    ));
}

#[test]
fn test_array_members() {
    assert_eq!(eval_ok("[1, 2, 3, 4].count"), Value::Number(4.0));
    assert_eq!(eval_ok("[1, 2, 3, 4].sum"), Value::Number(10.0));
    assert_eq!(eval_ok("[1, 2, 3, 4].avg"), Value::Number(2.5));
    assert_eq!(eval_ok("[1, 2, 3, 4].min"), Value::Number(1.0));
    assert_eq!(eval_ok("[1, 2, 3, 4].max"), Value::Number(4.0));
    assert_eq!(eval_ok("[\"x\", \"y\"].first"), Value::from("x"));
    assert_eq!(eval_ok("[1, \"a\", true].join(\"-\")"), Value::from("1-a-true"));
    assert_eq!(eval_ok("[1, 2].join()"), Value::from("1,2"));
    assert_eq!(eval_ok("[10, 20, 30][1]"), Value::Number(20.0));
}

#[test]
fn test_empty_array_statistics() {
    assert_eq!(eval_ok("[].count"), Value::Number(0.0));
    assert_eq!(eval_ok("[].sum"), Value::Number(0.0));
    assert_eq!(eval_ok("[].avg"), Value::Null);
    assert_eq!(eval_ok("[].min"), Value::Null);
    assert_eq!(eval_ok("[].last"), Value::Null);
    assert_eq!(eval_ok("[].stddev"), Value::Number(0.0));
    assert_eq!(eval_ok("[5].stddev"), Value::Number(0.0));
}

#[test]
fn test_array_statistics_require_numbers() {
    assert!(matches!(eval("[1, \"a\"].sum"), Err(ScriptError::UnaryType { .. })));
}

#[test]
fn test_index_errors() {
    assert!(matches!(eval("[1, 2][2]"), Err(ScriptError::IndexOutOfBounds { .. })));
    assert!(matches!(eval("[1, 2][0.5]"), Err(ScriptError::IndexOutOfBounds { .. })));
    assert!(matches!(eval("{a: 1}[\"b\"]"), Err(ScriptError::UnknownProperty { .. })));
    assert!(matches!(eval("5[0]"), Err(ScriptError::Type { .. })));
}

#[test]
fn test_map_members() {
    assert_eq!(eval_ok("{a: 1, b: 2}.b"), Value::Number(2.0));
    assert_eq!(eval_ok("{a: 1, b: 2}[\"a\"]"), Value::Number(1.0));
    assert_eq!(eval_ok("{a: 1, b: 2}.keys"), strings(&["a", "b"]));
    assert_eq!(eval_ok("{a: 1, b: 2}.count"), Value::Number(2.0));
    assert_eq!(
        eval_ok("{a: 1, b: 2, c: 3}.pick([\"c\", \"a\", \"zzz\"])"),
        Value::Map(args(&[("c", Value::Number(3.0)), ("a", Value::Number(1.0))]))
    );
    // Keys shadow the built-in members
    assert_eq!(eval_ok("{count: \"mine\"}.count"), Value::from("mine"));
}

#[test]
fn test_pick_checks_argument_kind() {
    let err = eval("{a: 1}.pick([1, 2])").unwrap_err();
    match err {
        ScriptError::WrongArgumentType {
            parameter,
            expected,
            actual,
            ..
        } => {
            assert_eq!(parameter, "keys");
            assert_eq!(expected, "string array");
            assert_eq!(actual, "array containing numeric");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// Global builtins

#[test]
fn test_anomaly() {
    assert_eq!(
        eval_ok("anomaly(data = [10, 10, 10, 10, 100], value = 100)"),
        Value::Boolean(true)
    );
    assert_eq!(
        eval_ok("anomaly(data = [10, 10, 10, 10, 100], value = 10)"),
        Value::Boolean(false)
    );
    assert_eq!(eval_ok("anomaly(data = [], value = 10)"), Value::Boolean(false));
}

#[test]
fn test_anomaly_validates_arguments() {
    let err = eval("anomaly(data = \"x\", value = 1)").unwrap_err();
    assert!(matches!(
        err,
        ScriptError::WrongArgumentType { ref parameter, ref actual, .. }
            if parameter == "data" && actual == "string"
    ));

    let err = eval("anomaly(data = [1, 2])").unwrap_err();
    assert!(matches!(
        err,
        ScriptError::MissingArgument { ref parameter, .. } if parameter == "value"
    ));
}

#[test]
fn test_now_is_current_unix_time() {
    let before = chrono::Utc::now().timestamp() as f64;
    let Value::Number(now) = eval_ok("now()") else {
        panic!("now() must be numeric");
    };
    let after = chrono::Utc::now().timestamp() as f64;
    assert!(before <= now && now <= after);
}

#[test]
fn test_random_defaults_to_unit_interval() {
    for _ in 0..200 {
        let Value::Number(n) = eval_ok("random()") else {
            panic!("random() must be numeric");
        };
        assert!((0.0..1.0).contains(&n));
    }
}

#[test]
fn test_random_rejects_non_positive_max() {
    assert!(matches!(
        eval("random(max = 0)"),
        Err(ScriptError::InvalidArgument { .. })
    ));
    assert!(matches!(
        eval("random(max = -3)"),
        Err(ScriptError::InvalidArgument { .. })
    ));
}

proptest! {
    #[test]
    fn random_stays_below_max(max in 0.001f64..1.0e9) {
        let output = ScriptRuntime::default()
            .run_source("test", "$r = random(max = arg(\"max\"))", args(&[("max", Value::Number(max))]))
            .into_result()
            .unwrap();
        let r = output["r"].as_f64().unwrap();
        prop_assert!(r >= 0.0 && r < max, "{} not in [0, {})", r, max);
    }
}

#[test]
fn test_load_json_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("x.json");
    std::fs::write(&path, r#"{"a":1}"#).unwrap();

    let script = format!("$a = load({:?}, format = \"json\").a", path.display().to_string());
    let output = run(&script).into_result().unwrap();
    assert_eq!(output["a"], Value::Number(1.0));
}

#[test]
fn test_load_yaml_and_toml_files() {
    let temp_dir = TempDir::new().unwrap();
    let yaml = temp_dir.path().join("hosts.yaml");
    std::fs::write(&yaml, "hosts:\n  - alpha\n  - beta\n").unwrap();
    let toml = temp_dir.path().join("limits.toml");
    std::fs::write(&toml, "[cpu]\nmax = 90\n").unwrap();

    let runtime = ScriptRuntime::default();
    let source = "$hosts = load(arg(\"yaml\"), \"YAML\").hosts.count\n$max = load(arg(\"toml\"), \"toml\").cpu.max";
    let output = runtime
        .run_source(
            "test",
            source,
            args(&[
                ("yaml", Value::from(yaml.display().to_string())),
                ("toml", Value::from(toml.display().to_string())),
            ]),
        )
        .into_result()
        .unwrap();

    assert_eq!(output["hosts"], Value::Number(2.0));
    assert_eq!(output["max"], Value::Number(90.0));
}

#[test]
fn test_load_rejects_unknown_format() {
    let err = eval("load(\"data.xml\", format = \"XML\")").unwrap_err();
    assert_eq!(err.root().to_string(), "Unknown file format xml");
    assert!(err.to_string().starts_with("Unknown file format xml (line 1, column "));
}

#[test]
fn test_load_reports_missing_file() {
    let err = eval("load(\"/definitely/not/here.json\", format = \"json\")").unwrap_err();
    assert!(matches!(err.root(), ScriptError::Io { .. }));
    assert!(err.position().is_some());
}

#[test]
fn test_log_returns_null() {
    assert_eq!(eval_ok("log(\"hello from a script\")"), Value::Null);
}

#[test]
fn test_error_always_fails() {
    let execution = run("$before = 1\nerror(\"threshold exceeded\")\n$after = 2");
    assert_eq!(execution.output.len(), 1);
    match execution.result {
        Err(ScriptError::UserRaised { message, position }) => {
            assert_eq!(message, "threshold exceeded");
            assert_eq!(position.line, 2);
        }
        other => panic!("expected UserRaised, got {other:?}"),
    }
}

#[test]
fn test_counters() {
    let (_dir, store) = create_test_store();
    let runtime = ScriptRuntime::with_store(store.clone());

    let output = runtime
        .run_source("job", "$start = counter(\"hits\")", Map::new())
        .into_result()
        .unwrap();
    assert_eq!(output["start"], Value::Number(0.0));

    let output = runtime
        .run_source(
            "job",
            "counter(\"hits\").increment()\n$after = counter(\"hits\").increment(by = 4)\n$name = counter(\"hits\").name",
            Map::new(),
        )
        .into_result()
        .unwrap();
    assert_eq!(output["after"], Value::Number(5.0));
    assert_eq!(output["name"], Value::from("hits"));

    runtime
        .run_source("job", "counter(\"hits\").set(-1)", Map::new())
        .into_result()
        .unwrap();
    assert_eq!(store.get_counter("hits").unwrap().unwrap().value, -1.0);
}

#[test]
fn test_series() {
    let (_dir, store) = create_test_store();
    let runtime = ScriptRuntime::with_store(store.clone());

    let output = runtime
        .run_source("job", "$empty = series(\"cpu\").count", Map::new())
        .into_result()
        .unwrap();
    assert_eq!(output["empty"], Value::Number(0.0));
    assert!(store.get_series("cpu").unwrap().is_none());

    let source = "series(\"cpu\").push(0.5, timestamp = 100)\n\
                  series(\"cpu\").push(1.5, timestamp = 200)\n\
                  $values = series(\"cpu\")\n\
                  $timestamps = series(\"cpu\").timestamps\n\
                  $avg = series(\"cpu\").avg\n\
                  $last = series(\"cpu\").last";
    let output = runtime.run_source("job", source, Map::new()).into_result().unwrap();

    assert_eq!(output["values"], Value::Array(vec![Value::Number(0.5), Value::Number(1.5)]));
    assert_eq!(
        output["timestamps"],
        Value::Array(vec![Value::Number(100.0), Value::Number(200.0)])
    );
    assert_eq!(output["avg"], Value::Number(1.0));
    assert_eq!(output["last"], Value::Number(1.5));
}

#[test]
fn test_series_rejects_reserved_names() {
    let (_dir, store) = create_test_store();
    let runtime = ScriptRuntime::with_store(store);

    let execution = runtime.run_source("job", "$s = series(\"_counters\")", Map::new());
    assert!(matches!(
        execution.result.unwrap_err().root(),
        ScriptError::Store(StoreError::ReservedBucket { .. })
    ));
}

#[test]
fn test_store_errors_fail_the_script() {
    let runtime = ScriptRuntime::with_store(Arc::new(BrokenStore));

    let execution = runtime.run_source("job", "$c = counter(\"hits\")", Map::new());
    assert!(execution.output.is_empty());
    assert!(matches!(
        execution.result.unwrap_err().root(),
        ScriptError::Store(StoreError::Corrupt { .. })
    ));

    let execution = runtime.run_source("job", "$s = series(\"cpu\").sum", Map::new());
    assert!(matches!(execution.result.unwrap_err().root(), ScriptError::Store(_)));
}

#[test]
fn test_counters_without_store_are_disabled() {
    let execution = run("$c = counter(\"hits\")");
    assert!(matches!(
        execution.result.unwrap_err().root(),
        ScriptError::Store(StoreError::Disabled)
    ));
}

#[test]
fn test_notify() {
    let notifier = Arc::new(RecordingNotifier::default());
    let runtime = ScriptRuntime::new(Services::default().with_notifier(notifier.clone()));

    let source = "$sent = notify(title = \"Disk\", message = \"almost full\", channel = \"ops\")\n\
                  notify(title = \"Disk\", message = \"short\", duration = \"200ms\", sound = \"ping\")\n\
                  notify(title = \"Disk\", message = \"long\", duration = \"1m30s\", flow = \"disk_flow\", icon = \"warn\")";
    let output = runtime.run_source("job", source, Map::new()).into_result().unwrap();
    assert_eq!(output["sent"], Value::Boolean(true));

    let sent = notifier.sent.lock();
    assert_eq!(sent.len(), 3);

    let (first, channel, flow) = &sent[0];
    assert_eq!(first.title, "Disk");
    assert_eq!(first.sound, "default");
    assert_eq!(first.duration, Duration::from_secs(1));
    assert_eq!(channel.as_deref(), Some("ops"));
    assert_eq!(flow, &None);

    assert_eq!(sent[1].0.duration, Duration::from_secs(1));
    assert_eq!(sent[1].0.sound, "ping");
    assert_eq!(sent[2].0.duration, Duration::from_secs(90));
    assert_eq!(sent[2].0.icon.as_deref(), Some("warn"));
    assert_eq!(sent[2].2.as_deref(), Some("disk_flow"));
}

#[test]
fn test_notify_rejects_bad_duration() {
    let notifier = Arc::new(RecordingNotifier::default());
    let runtime = ScriptRuntime::new(Services::default().with_notifier(notifier.clone()));

    let execution = runtime.run_source(
        "job",
        "notify(title = \"t\", message = \"m\", duration = \"soon\")",
        Map::new(),
    );
    assert!(matches!(execution.result.unwrap_err().root(), ScriptError::Interval(_)));
    assert!(notifier.sent.lock().is_empty());
}

#[test]
fn test_notify_without_provider_reports_failure() {
    assert_eq!(
        eval_ok("notify(title = \"t\", message = \"m\")"),
        Value::Boolean(false)
    );
}

#[test]
fn test_spawn() {
    let spawner = Arc::new(RecordingSpawner::default());
    let runtime = ScriptRuntime::new(Services::default().with_spawner(spawner.clone()));

    let source = "spawn(tag = \"disk\", refresh = 30.9, exec = \"df -h\", args = {mount: \"/\"})";
    runtime.run_source("job", source, Map::new()).into_result().unwrap();

    let jobs = spawner.jobs.lock();
    assert_eq!(jobs.len(), 1);
    let (tag, plugin, config) = &jobs[0];
    assert_eq!(tag, "disk");
    assert_eq!(plugin, PROCESS_PLUGIN);
    assert_eq!(config["refresh"], Value::Number(30.0));
    assert_eq!(config["flow_tag"], Value::from("disk"));
    assert_eq!(config["exec"], Value::from("df -h"));
    assert!(!config.contains_key("script"));
    assert_eq!(config["args"], Value::Map(args(&[("mount", Value::from("/"))])));
}

#[test]
fn test_spawn_surfaces_spawner_errors() {
    let spawner = Arc::new(RecordingSpawner::default());
    let runtime = ScriptRuntime::new(Services::default().with_spawner(spawner));

    let source = "spawn(tag = \"dup\", refresh = 5)\nspawn(tag = \"dup\", refresh = 5)";
    let execution = runtime.run_source("job", source, Map::new());
    match execution.result {
        Err(ScriptError::External { operation, message, .. }) => {
            assert_eq!(operation, "spawn");
            assert!(message.contains("already exists"));
        }
        other => panic!("expected External, got {other:?}"),
    }
}

#[test]
fn test_get_and_post() {
    let http = Arc::new(CannedHttp::default());
    let runtime = ScriptRuntime::new(Services::default().with_http(http.clone()));

    let source = "$raw = get(\"https://status.example.com\", headers = {Accept: \"application/json\"})\n\
                  $load = get(\"https://status.example.com\", format = \"json\").load\n\
                  post(\"https://hooks.example.com\", json = {level: 2})";
    let output = runtime.run_source("job", source, Map::new()).into_result().unwrap();

    assert_eq!(output["raw"], Value::from(r#"{"status": "ok", "load": 0.5}"#));
    assert_eq!(output["load"], Value::Number(0.5));

    let requests = http.requests.lock();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(requests[0].headers["Accept"], "application/json");
    assert_eq!(requests[2].method, HttpMethod::Post);
    assert_eq!(requests[2].body.as_deref(), Some(r#"{"level":2.0}"#));
    assert_eq!(requests[2].headers["Content-Type"], "application/json");
}

#[test]
fn test_http_without_client_fails() {
    assert!(matches!(
        eval("get(\"https://example.com\")"),
        Err(ScriptError::External { .. })
    ));
}

#[test]
fn test_spreadsheets_are_lazy() {
    let sheets = Arc::new(StaticSheets::default());
    let runtime = ScriptRuntime::new(Services::default().with_sheets(sheets.clone()));

    runtime
        .run_source("job", "excel(\"report.xlsx\").rows", Map::new())
        .into_result()
        .unwrap_err();
    assert_eq!(sheets.reads.load(Ordering::SeqCst), 0);

    let source = "$rows = googleSpreadsheet(\"sheet-id\").rows().count\n\
                  $cell = excel(\"report.xlsx\").cell(row = 2, column = 2)";
    let output = runtime.run_source("job", source, Map::new()).into_result().unwrap();
    assert_eq!(output["rows"], Value::Number(2.0));
    assert_eq!(output["cell"], Value::Number(0.5));
    assert_eq!(sheets.reads.load(Ordering::SeqCst), 2);

    let execution = runtime.run_source("job", "excel(\"r.xlsx\").cell(3, 1)", Map::new());
    assert!(matches!(execution.result, Err(ScriptError::IndexOutOfBounds { .. })));

    let execution = runtime.run_source("job", "excel(\"r.xlsx\").rows(sheet = \"Q3\")", Map::new());
    assert!(matches!(execution.result, Err(ScriptError::External { .. })));
}

#[test]
fn test_concurrent_runs_share_only_the_store() {
    let (_dir, store) = create_test_store();
    let runtime = ScriptRuntime::with_store(store.clone());
    let script = runtime
        .parse("$mine = arg(\"worker\")\ncounter(\"runs\").increment()")
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let runtime = &runtime;
            let script = &script;
            scope.spawn(move || {
                for _ in 0..25 {
                    let output = runtime
                        .run(
                            "job",
                            script,
                            args(&[("worker", Value::Number(worker as f64))]),
                        )
                        .into_result()
                        .unwrap();
                    assert_eq!(output["mine"], Value::Number(worker as f64));
                }
            });
        }
    });

    assert_eq!(store.get_counter("runs").unwrap().unwrap().value, 100.0);
}
