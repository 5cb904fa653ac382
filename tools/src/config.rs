//! Probe configuration, read from the environment.
use anyhow::Context as _;
use blockprobe_health::{evaluator, net, server, time, FailurePolicy, NodeUrl};
use std::{collections::HashMap, fmt, str::FromStr};

/// Listen address.
pub const HOST: &str = "HOST";
/// Listen port.
pub const PORT: &str = "PORT";
/// Maximal tolerated block height difference.
pub const MAX_HEIGHT_DIFF: &str = "MAX_HEIGHT_DIFF";
/// JSON-RPC endpoint of the reference node.
pub const REFERENCE_NODE_URL: &str = "REFERENCE_NODE_URL";
/// JSON-RPC endpoint of the node under test.
pub const NODE_URL: &str = "NODE_URL";
/// Deadline of a single block number query, in milliseconds.
pub const RPC_TIMEOUT_MS: &str = "RPC_TIMEOUT_MS";
/// Deadline for the client's trigger line, in milliseconds.
pub const READ_TIMEOUT_MS: &str = "READ_TIMEOUT_MS";
/// `zero` or `down`.
pub const QUERY_FAILURE_POLICY: &str = "QUERY_FAILURE_POLICY";
/// Backoff after the first failed accept, in milliseconds.
pub const ACCEPT_BACKOFF_MIN_MS: &str = "ACCEPT_BACKOFF_MIN_MS";
/// Cap of the accept backoff, in milliseconds.
pub const ACCEPT_BACKOFF_MAX_MS: &str = "ACCEPT_BACKOFF_MAX_MS";
/// Consecutive failed accepts after which the probe exits.
pub const MAX_ACCEPT_FAILURES: &str = "MAX_ACCEPT_FAILURES";

/// Key-value source of the settings.
pub trait Env {
    /// Value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// Environment of the current process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Reads `key`, falling back to `default` if it is unset or empty.
fn read<T>(env: &impl Env, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = env
        .var(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|err| anyhow::anyhow!("{err:#}"))
        .with_context(|| format!("{key}={value:?}"))
}

fn read_millis(env: &impl Env, key: &str, default: &str) -> anyhow::Result<time::Duration> {
    let ms: u32 = read(env, key, default)?;
    Ok(time::Duration::milliseconds(ms.into()))
}

/// Probe configuration.
/// Read once at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Listen address (domain or IP).
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Maximal tolerated block height difference (inclusive).
    pub max_height_diff: u64,
    /// Reference node, trusted as ground truth.
    pub reference_node_url: NodeUrl,
    /// Node under test.
    pub node_url: NodeUrl,
    /// Deadline of a single block number query.
    pub rpc_timeout: time::Duration,
    /// Deadline for the client's trigger line.
    pub read_timeout: time::Duration,
    /// Handling of failed block number queries.
    pub failure_policy: FailurePolicy,
    /// Backoff after the first failed accept.
    pub accept_backoff_min: time::Duration,
    /// Cap of the accept backoff.
    pub accept_backoff_max: time::Duration,
    /// Consecutive failed accepts after which the probe exits.
    pub max_accept_failures: usize,
}

impl Config {
    /// Reads the configuration from `env`. Unset and empty keys take their defaults.
    pub fn from_env(env: &impl Env) -> anyhow::Result<Self> {
        let cfg = Self {
            host: read(env, HOST, "localhost")?,
            port: read(env, PORT, "1337")?,
            max_height_diff: read(env, MAX_HEIGHT_DIFF, "100")?,
            reference_node_url: read(env, REFERENCE_NODE_URL, "localhost:8545")?,
            node_url: read(env, NODE_URL, "localhost:8545")?,
            rpc_timeout: read_millis(env, RPC_TIMEOUT_MS, "10000")?,
            read_timeout: read_millis(env, READ_TIMEOUT_MS, "30000")?,
            failure_policy: read(env, QUERY_FAILURE_POLICY, "zero")?,
            accept_backoff_min: read_millis(env, ACCEPT_BACKOFF_MIN_MS, "10")?,
            accept_backoff_max: read_millis(env, ACCEPT_BACKOFF_MAX_MS, "1000")?,
            max_accept_failures: read(env, MAX_ACCEPT_FAILURES, "100")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.rpc_timeout.is_positive(),
            "{RPC_TIMEOUT_MS} has to be positive"
        );
        anyhow::ensure!(
            self.read_timeout.is_positive(),
            "{READ_TIMEOUT_MS} has to be positive"
        );
        anyhow::ensure!(
            self.accept_backoff_min <= self.accept_backoff_max,
            "{ACCEPT_BACKOFF_MIN_MS} has to be at most {ACCEPT_BACKOFF_MAX_MS}"
        );
        anyhow::ensure!(
            self.max_accept_failures > 0,
            "{MAX_ACCEPT_FAILURES} has to be positive"
        );
        Ok(())
    }

    /// Address to listen on.
    pub fn listen_host(&self) -> net::Host {
        net::Host::new(&self.host, self.port)
    }

    /// Server part of the configuration.
    pub fn server(&self) -> server::Config {
        server::Config {
            host: self.listen_host(),
            read_timeout: self.read_timeout,
            accept_backoff_min: self.accept_backoff_min,
            accept_backoff_max: self.accept_backoff_max,
            max_accept_failures: self.max_accept_failures,
        }
    }

    /// Evaluator part of the configuration.
    pub fn evaluator(&self) -> evaluator::Config {
        evaluator::Config {
            reference_node_url: self.reference_node_url.clone(),
            node_url: self.node_url.clone(),
            max_height_diff: self.max_height_diff,
            failure_policy: self.failure_policy,
        }
    }
}
