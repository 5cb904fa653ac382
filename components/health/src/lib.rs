//! Health check component: compares the latest block height of a target node
//! with a reference node and serves the verdict over a line-triggered TCP protocol.
//!
//! * `rpc` queries a node for its latest block number over JSON-RPC.
//! * `evaluator` turns a pair of heights into an up/down verdict.
//! * `server` accepts TCP connections and answers each with a verdict.
pub use blockprobe_concurrency::{ctx, net, time};

pub mod evaluator;
pub mod rpc;
pub mod server;
pub mod testonly;

pub use evaluator::{Evaluator, FailurePolicy, Verdict};
pub use rpc::{NodeUrl, QueryError};
pub use server::Server;
