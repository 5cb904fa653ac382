//! Health evaluation: compares the block height of the target node with the reference node.
use crate::{
    ctx,
    rpc::{BlockSource, Height, NodeUrl, QueryError},
};
use std::{fmt, str::FromStr, sync::Arc};


/// What to do when a block number query fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The failed node counts as being at height 0.
    #[default]
    Zero,
    /// Any failed query makes the verdict `Down`.
    Down,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "down" => Ok(Self::Down),
            _ => anyhow::bail!("unknown failure policy {s:?}, expected \"zero\" or \"down\""),
        }
    }
}

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Heights are within the tolerance.
    Up,
    /// Heights differ too much (or a query failed under `FailurePolicy::Down`).
    Down,
}

impl Verdict {
    /// Line sent to the probing client.
    pub fn response(self) -> &'static [u8] {
        match self {
            Self::Up => b"up\n",
            Self::Down => b"down\n",
        }
    }

    /// Whether the node is healthy.
    pub fn is_up(self) -> bool {
        self == Self::Up
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "up",
            Self::Down => "down",
        })
    }
}

/// Checks whether two heights differ by at most `max_diff`.
/// Only the magnitude of the difference matters: a target ahead of
/// the reference is treated the same as a target behind it.
pub fn within_tolerance(reference: Height, target: Height, max_diff: u64) -> bool {
    reference.abs_diff(target) <= max_diff
}

/// Configuration of the health evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Node whose height is trusted as ground truth.
    pub reference_node_url: NodeUrl,
    /// Node under test.
    pub node_url: NodeUrl,
    /// Maximal tolerated block height difference (inclusive).
    pub max_height_diff: u64,
    /// Handling of failed queries.
    pub failure_policy: FailurePolicy,
}

/// Evaluates the health of the target node.
/// Every check issues a fresh pair of queries; no heights are cached.
pub struct Evaluator {
    config: Config,
    source: Arc<dyn BlockSource>,
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    /// Constructs an evaluator querying heights from `source`.
    pub fn new(config: Config, source: Arc<dyn BlockSource>) -> Self {
        Self { config, source }
    }

    /// Evaluator configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Maps a query outcome to the height used for comparison.
    /// `None` means that the verdict is `Down` regardless of the other height.
    fn height(&self, node: &str, url: &NodeUrl, res: Result<Height, QueryError>) -> Option<Height> {
        match res {
            Ok(height) => Some(height),
            Err(err) => {
                tracing::warn!(node, %url, policy = ?self.config.failure_policy, "eth_blockNumber: {err}");
                match self.config.failure_policy {
                    FailurePolicy::Zero => Some(0),
                    FailurePolicy::Down => None,
                }
            }
        }
    }

    /// Queries both nodes and compares their heights.
    /// The queries run concurrently; the check is bounded only by `ctx`
    /// and the per-query timeout of the block source.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn check(&self, ctx: &ctx::Ctx) -> ctx::OrCanceled<Verdict> {
        let cfg = &self.config;
        let (reference, target) = tokio::join!(
            self.source.block_number(ctx, &cfg.reference_node_url),
            self.source.block_number(ctx, &cfg.node_url),
        );
        let reference = self.height("reference", &cfg.reference_node_url, reference?);
        let target = self.height("target", &cfg.node_url, target?);
        let verdict = match (reference, target) {
            (Some(reference), Some(target))
                if within_tolerance(reference, target, cfg.max_height_diff) =>
            {
                Verdict::Up
            }
            _ => Verdict::Down,
        };
        tracing::debug!(
            ?reference,
            ?target,
            max_height_diff = cfg.max_height_diff,
            %verdict,
            "health check"
        );
        Ok(verdict)
    }
}
