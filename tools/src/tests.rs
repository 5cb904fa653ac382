use crate::{Config, Env, ProcessEnv};
use blockprobe_health::{net, time, FailurePolicy, NodeUrl};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
    vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_defaults() {
    let cfg = Config::from_env(&env(&[])).unwrap();
    assert_eq!(cfg.host, "localhost");
    assert_eq!(cfg.port, 1337);
    assert_eq!(cfg.max_height_diff, 100);
    assert_eq!(cfg.reference_node_url, "http://localhost:8545".parse::<NodeUrl>().unwrap());
    assert_eq!(cfg.node_url, "http://localhost:8545".parse::<NodeUrl>().unwrap());
    assert_eq!(cfg.rpc_timeout, time::Duration::seconds(10));
    assert_eq!(cfg.read_timeout, time::Duration::seconds(30));
    assert_eq!(cfg.failure_policy, FailurePolicy::Zero);
    assert_eq!(cfg.accept_backoff_min, time::Duration::milliseconds(10));
    assert_eq!(cfg.accept_backoff_max, time::Duration::seconds(1));
    assert_eq!(cfg.max_accept_failures, 100);
    assert_eq!(cfg.listen_host(), net::Host("localhost:1337".into()));
}

#[test]
fn test_overrides() {
    let cfg = Config::from_env(&env(&[
        ("HOST", "0.0.0.0"),
        ("PORT", "9000"),
        ("MAX_HEIGHT_DIFF", "5"),
        ("REFERENCE_NODE_URL", "http://reference.internal:8545"),
        ("NODE_URL", "10.1.2.3:8545"),
        ("RPC_TIMEOUT_MS", "250"),
        ("READ_TIMEOUT_MS", "1000"),
        ("QUERY_FAILURE_POLICY", "down"),
        ("MAX_ACCEPT_FAILURES", "3"),
    ]))
    .unwrap();
    assert_eq!(cfg.listen_host(), net::Host("0.0.0.0:9000".into()));
    assert_eq!(cfg.max_height_diff, 5);
    assert_eq!(cfg.rpc_timeout, time::Duration::milliseconds(250));
    assert_eq!(cfg.failure_policy, FailurePolicy::Down);

    let server = cfg.server();
    assert_eq!(server.host, cfg.listen_host());
    assert_eq!(server.read_timeout, time::Duration::seconds(1));
    assert_eq!(server.max_accept_failures, 3);

    let evaluator = cfg.evaluator();
    assert_eq!(
        evaluator.reference_node_url,
        "http://reference.internal:8545".parse::<NodeUrl>().unwrap()
    );
    assert_eq!(evaluator.node_url, "http://10.1.2.3:8545".parse::<NodeUrl>().unwrap());
    assert_eq!(evaluator.max_height_diff, 5);
}

#[test]
fn test_empty_values_take_defaults() {
    let cfg = Config::from_env(&env(&[("PORT", ""), ("MAX_HEIGHT_DIFF", "  ")])).unwrap();
    assert_eq!(cfg.port, 1337);
    assert_eq!(cfg.max_height_diff, 100);
}

#[test]
fn test_malformed_values() {
    for (key, value) in [
        ("PORT", "http"),
        ("PORT", "70000"),
        ("MAX_HEIGHT_DIFF", "-1"),
        ("MAX_HEIGHT_DIFF", "lots"),
        ("NODE_URL", "https://mainnet.example.com"),
        ("REFERENCE_NODE_URL", "ws://localhost:8546"),
        ("RPC_TIMEOUT_MS", "0"),
        ("READ_TIMEOUT_MS", "-5"),
        ("QUERY_FAILURE_POLICY", "skip"),
        ("MAX_ACCEPT_FAILURES", "0"),
        ("ACCEPT_BACKOFF_MIN_MS", "5000"),
    ] {
        let err = Config::from_env(&env(&[(key, value)])).unwrap_err();
        assert!(format!("{err:#}").contains(key), "{key}={value}: {err:#}");
    }
}

#[test]
fn test_process_env() {
    // Looking up a variable which is not set never fails.
    assert_eq!(ProcessEnv.var("BLOCKPROBE_TEST_SURELY_UNSET_VARIABLE"), None);
}
