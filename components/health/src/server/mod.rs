//! TCP probe server. Every connection is a single exchange:
//! the client sends any line, the server replies with `\n`,
//! runs a health check, replies with `up\n` or `down\n` and closes the connection.
use crate::{ctx, net, time, Evaluator};
use anyhow::Context as _;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{
        AsyncBufRead, AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWrite,
        AsyncWriteExt as _, BufReader,
    },
    task::JoinSet,
};


/// Maximal length of the trigger line, including the terminating `\n`.
pub const MAX_LINE_LEN: u64 = 4096;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address to listen on. Resolved at startup; the first resolved address that
    /// can be bound is used.
    pub host: net::Host,
    /// Deadline for receiving the trigger line.
    pub read_timeout: time::Duration,
    /// Backoff after the first failed accept.
    pub accept_backoff_min: time::Duration,
    /// Cap of the exponential accept backoff.
    pub accept_backoff_max: time::Duration,
    /// Number of consecutive failed accepts after which the server gives up.
    pub max_accept_failures: usize,
}

/// Source of inbound connections.
#[async_trait::async_trait]
pub trait Listener: 'static + Send {
    /// Accepted connection.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    /// Accepts the next connection. Cancel-safe.
    async fn accept(
        &mut self,
        ctx: &ctx::Ctx,
    ) -> ctx::OrCanceled<io::Result<(Self::Stream, SocketAddr)>>;
}

#[async_trait::async_trait]
impl Listener for net::tcp::Listener {
    type Stream = net::tcp::Stream;
    async fn accept(
        &mut self,
        ctx: &ctx::Ctx,
    ) -> ctx::OrCanceled<io::Result<(Self::Stream, SocketAddr)>> {
        net::tcp::accept(ctx, self).await
    }
}

/// Exponential backoff between failed accepts, which trips after
/// `max_accept_failures` consecutive failures.
#[derive(Debug)]
struct AcceptBreaker {
    failures: usize,
    backoff: time::Duration,
}

impl AcceptBreaker {
    fn new(cfg: &Config) -> Self {
        Self {
            failures: 0,
            backoff: cfg.accept_backoff_min,
        }
    }

    fn success(&mut self, cfg: &Config) {
        *self = Self::new(cfg);
    }

    /// Registers a failure. Returns the time to wait before the next accept,
    /// or `None` if the breaker tripped.
    fn failure(&mut self, cfg: &Config) -> Option<time::Duration> {
        self.failures += 1;
        if self.failures >= cfg.max_accept_failures {
            return None;
        }
        let backoff = self.backoff;
        self.backoff = std::cmp::min(self.backoff.saturating_mul(2), cfg.accept_backoff_max);
        Some(backoff)
    }
}

/// Probe server.
#[derive(Debug)]
pub struct Server {
    config: Config,
    evaluator: Arc<Evaluator>,
}

impl Server {
    /// Creates a new Server.
    pub fn new(config: Config, evaluator: Arc<Evaluator>) -> Self {
        Self { config, evaluator }
    }

    /// Binds the configured address.
    pub async fn bind(&self, ctx: &ctx::Ctx) -> ctx::Result<net::tcp::Listener> {
        let addrs = self
            .config
            .host
            .resolve(ctx)
            .await?
            .with_context(|| format!("resolve({})", self.config.host))?;
        let mut last_err = None;
        for addr in addrs {
            match net::tcp::bind(addr).await {
                Ok(listener) => return Ok(listener),
                Err(err) => {
                    tracing::debug!(%addr, ?err, "bind()");
                    last_err = Some(err);
                }
            }
        }
        Err(match last_err {
            Some(err) => anyhow::Error::new(err).context(format!("bind({})", self.config.host)),
            None => anyhow::anyhow!("{} did not resolve to any address", self.config.host),
        }
        .into())
    }

    /// Runs the server until `ctx` is canceled.
    /// Fails if the address cannot be bound or the accept breaker trips.
    pub async fn run(&self, ctx: &ctx::Ctx) -> anyhow::Result<()> {
        let listener = match self.bind(ctx).await {
            Ok(listener) => listener,
            Err(ctx::Error::Canceled(_)) => return Ok(()),
            Err(ctx::Error::Internal(err)) => return Err(err),
        };
        tracing::info!("Listening on {}", listener.local_addr().context("local_addr()")?);
        self.run_with_listener(ctx, listener).await
    }

    /// Runs the accept loop on the given listener.
    /// Returns once `ctx` is canceled and all the in-flight connections are closed.
    pub async fn run_with_listener<L: Listener>(
        &self,
        ctx: &ctx::Ctx,
        mut listener: L,
    ) -> anyhow::Result<()> {
        let cfg = &self.config;
        let mut breaker = AcceptBreaker::new(cfg);
        let mut connections = JoinSet::new();
        loop {
            let res = tokio::select! {
                res = listener.accept(ctx) => res,
                Some(res) = connections.join_next() => {
                    if let Err(err) = res {
                        if err.is_panic() {
                            tracing::error!("connection handler panicked: {err}");
                        }
                    }
                    continue;
                }
            };
            let Ok(res) = res else { break };
            match res {
                Ok((stream, peer)) => {
                    breaker.success(cfg);
                    // Each connection gets its own child context, so that
                    // it is canceled together with the server.
                    let ctx = ctx.with_deadline(time::Deadline::Infinite);
                    let evaluator = self.evaluator.clone();
                    let read_timeout = cfg.read_timeout;
                    connections.spawn(async move {
                        match serve_connection(&ctx, &evaluator, read_timeout, stream).await {
                            Ok(()) | Err(ctx::Error::Canceled(_)) => {}
                            Err(ctx::Error::Internal(err)) => {
                                tracing::debug!(%peer, "connection: {err:#}");
                            }
                        }
                    });
                }
                Err(err) => {
                    let Some(backoff) = breaker.failure(cfg) else {
                        return Err(err).context(format!(
                            "accept() failed {} times in a row",
                            breaker.failures
                        ));
                    };
                    tracing::error!(?err, failures = breaker.failures, %backoff, "accept()");
                    if ctx.sleep(backoff).await.is_err() {
                        break;
                    }
                }
            }
        }
        // `ctx` is canceled at this point, so the connections terminate promptly.
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

/// Reads the trigger line. Fails on EOF before `\n` and on lines longer than `MAX_LINE_LEN`.
async fn read_line<R: AsyncBufRead + Unpin>(ctx: &ctx::Ctx, r: &mut R) -> ctx::Result<()> {
    let mut line = vec![];
    let n = ctx
        .wait((&mut *r).take(MAX_LINE_LEN).read_until(b'\n', &mut line))
        .await?
        .context("read_until()")?;
    if line.last() != Some(&b'\n') {
        if n as u64 == MAX_LINE_LEN {
            return Err(anyhow::anyhow!("line longer than {MAX_LINE_LEN} bytes").into());
        }
        return Err(anyhow::anyhow!("connection closed before end of line").into());
    }
    Ok(())
}

async fn write<W: AsyncWrite + Unpin>(ctx: &ctx::Ctx, w: &mut W, data: &[u8]) -> ctx::Result<()> {
    ctx.wait(w.write_all(data)).await?.context("write_all()")?;
    Ok(())
}

/// Handles a single probe connection. The stream is closed when this function returns.
pub async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &ctx::Ctx,
    evaluator: &Evaluator,
    read_timeout: time::Duration,
    stream: S,
) -> ctx::Result<()> {
    let mut stream = BufReader::new(stream);
    match read_line(&ctx.with_timeout(read_timeout), &mut stream).await {
        Ok(()) => {}
        Err(ctx::Error::Canceled(_)) if ctx.is_active() => {
            return Err(anyhow::anyhow!("no line received within {read_timeout}").into());
        }
        Err(err) => return Err(err),
    }
    write(ctx, &mut stream, b"\n").await?;
    let verdict = evaluator.check(ctx).await?;
    write(ctx, &mut stream, verdict.response()).await?;
    ctx.wait(stream.shutdown()).await?.context("shutdown()")?;
    Ok(())
}
