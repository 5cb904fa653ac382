//! Context-aware network utilities.
//! Built on top of `tokio::net`.
use crate::ctx;
use std::{fmt, io, net::SocketAddr};

pub mod tcp;


/// Network host address in the format "<domain/ip>:<port>".
/// NOT VALIDATED, validation happens at `Host::resolve()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host(pub String);

impl Host {
    /// Constructs a host from separate name and port,
    /// bracketing IPv6 literals.
    pub fn new(name: &str, port: u16) -> Self {
        if name.contains(':') && !name.starts_with('[') {
            Self(format!("[{name}]:{port}"))
        } else {
            Self(format!("{name}:{port}"))
        }
    }

    /// If host is of the form "<domain>:<port>", performs DNS resolution.
    /// If host is of the form "<ip>:<port>", just parses the SocketAddr.
    pub async fn resolve(&self, ctx: &ctx::Ctx) -> ctx::OrCanceled<io::Result<Vec<SocketAddr>>> {
        // The lookup runs on the blocking pool; dropping this future on cancellation
        // orphans it, which is fine given that it finishes after the resolver timeout.
        Ok(ctx
            .wait(tokio::net::lookup_host(self.0.as_str()))
            .await?
            .map(|addrs| addrs.collect()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
