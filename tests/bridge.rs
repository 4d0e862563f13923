//! Integration tests for the text boundary, driven synchronously through
//! an owned [`Bridge`].

use serde_json::{json, Value};

use proxyhost::bridge::Bridge;
use proxyhost::controller::ControllerSettings;

fn bridge() -> Bridge {
    Bridge::new(ControllerSettings::default()).unwrap()
}

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn start_status_stop_round_trip() {
    let bridge = bridge();
    let port = free_port();

    let started = parse(&bridge.start(&format!(
        r#"{{"listeners":[{{"addr":"127.0.0.1","port":{port}}}]}}"#
    )));
    assert_eq!(started["ok"], true);
    assert!(started["error"].is_null());
    assert_eq!(
        started["activeListeners"],
        json!([{"addr": "127.0.0.1", "port": port}])
    );

    let status = parse(&bridge.status());
    assert_eq!(status["state"], "running");
    assert_eq!(status["activeListeners"][0]["port"], port);
    assert_eq!(status["configVersion"], started["configVersion"]);
    assert!(status["lastError"].is_null());

    let stopped = parse(&bridge.stop());
    assert_eq!(stopped["ok"], true);
    assert_eq!(stopped["forcedConnections"], 0);
    assert!(stopped["warning"].is_null());

    let status = parse(&bridge.status());
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["uptimeSeconds"], 0);
    assert_eq!(status["activeListeners"], json!([]));
}

#[test]
fn validation_failure_carries_details() {
    let bridge = bridge();
    let result = parse(&bridge.start(
        r#"{"listeners":[{"addr":"127.0.0.1","port":70000}],
            "routes":[{"match":"/a","upstream":"missing"}]}"#,
    ));
    assert_eq!(result["ok"], false);
    assert_eq!(result["error"], "ConfigValidationError");

    let fields: Vec<&str> = result["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"listeners[0].port"));
    assert!(fields.contains(&"routes[0].upstream"));

    let status = parse(&bridge.status());
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["lastError"]["kind"], "ConfigValidationError");
}

#[test]
fn malformed_text_is_a_validation_error() {
    let bridge = bridge();
    let result = parse(&bridge.start("{not json"));
    assert_eq!(result["ok"], false);
    assert_eq!(result["error"], "ConfigValidationError");
    assert_eq!(result["details"][0]["field"], "(document)");

    let env = parse(&bridge.set_environment(r#"{"PORT": 8080}"#));
    assert_eq!(env["error"], "ConfigValidationError");
}

#[test]
fn state_conflicts_are_reported_without_last_error() {
    let bridge = bridge();
    let result = parse(&bridge.reload("{}"));
    assert_eq!(result["ok"], false);
    assert_eq!(result["error"], "StateConflictError");
    assert!(parse(&bridge.status())["lastError"].is_null());
}

#[test]
fn dispatch_routes_host_methods() {
    let bridge = bridge();

    // A missing config starts an engine with no listeners.
    let started = parse(&bridge.dispatch("start", &json!({})));
    assert_eq!(started["ok"], true);
    assert_eq!(started["activeListeners"], json!([]));

    let staged = parse(&bridge.dispatch("setEnvironment", &json!({"env": {"A": "1"}})));
    assert_eq!(staged["ok"], true);
    assert_eq!(staged["stagedKeys"], 1);
    assert_eq!(staged["appliesOnNextStart"], true);

    let replaced = parse(&bridge.dispatch(
        "replaceEnvironment",
        &json!({"env": "{\"B\":\"2\",\"C\":\"3\"}"}),
    ));
    assert_eq!(replaced["stagedKeys"], 2);

    let port = free_port();
    let reloaded = parse(&bridge.dispatch(
        "reload",
        &json!({"config": {"listeners": [{"addr": "127.0.0.1", "port": port}]}}),
    ));
    assert_eq!(reloaded["ok"], true);
    assert_eq!(reloaded["diff"]["listenersAdded"], 1);

    let status = parse(&bridge.dispatch("status", &Value::Null));
    assert_eq!(status["state"], "running");

    let stopped = parse(&bridge.dispatch("stop", &Value::Null));
    assert_eq!(stopped["ok"], true);
}

#[test]
fn unknown_method_is_not_implemented() {
    let bridge = bridge();
    let result = parse(&bridge.dispatch("restart", &json!({})));
    assert_eq!(result["ok"], false);
    assert_eq!(result["error"], "NotImplemented");
}

#[test]
fn shutdown_stops_a_running_engine() {
    let bridge = bridge();
    let port = free_port();
    let started = parse(&bridge.start(&format!(
        r#"{{"listeners":[{{"addr":"127.0.0.1","port":{port}}}]}}"#
    )));
    assert_eq!(started["ok"], true);

    let stopped = parse(&bridge.shutdown());
    assert_eq!(stopped["ok"], true);
    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}
