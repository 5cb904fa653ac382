//! Main binary of the block height probe. It reads the configuration from the environment,
//! and answers every TCP connection with `up` or `down`, depending on how far the node under
//! test lags behind (or runs ahead of) the reference node.
use anyhow::Context as _;
use blockprobe_health::{ctx, rpc, Evaluator, Server};
use blockprobe_tools::{Config, ProcessEnv};
use clap::Parser;
use std::{io::IsTerminal as _, sync::Arc};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Command-line application launching the probe.
#[derive(Debug, Parser)]
struct Args {
    /// Verify configuration instead of launching the probe.
    #[arg(long, conflicts_with = "check_once")]
    verify_config: bool,
    /// Run a single health check and exit with status 0 if the node is up, 1 otherwise.
    #[arg(long)]
    check_once: bool,
}

/// Installs the logger for stdout. Produces human-readable logs for
/// events allowed by `RUST_LOG` (INFO or higher by default).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()
        .context("RUST_LOG")?;
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter);
    let subscriber = Registry::default().with(stdout_log);
    tracing::subscriber::set_global_default(subscriber).context("set_global_default()")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    init_logging()?;
    tracing::trace!(?args, "Starting probe");
    let ctx = &ctx::root();

    tracing::debug!("Loading configuration.");
    let config = Config::from_env(&ProcessEnv).context("Config::from_env()")?;
    if args.verify_config {
        tracing::info!(?config, "Configuration verified.");
        return Ok(());
    }

    let client = Arc::new(rpc::Client::new(config.rpc_timeout));
    let evaluator = Arc::new(Evaluator::new(config.evaluator(), client));

    if args.check_once {
        let verdict = evaluator.check(ctx).await?;
        tracing::info!(%verdict, "Health check finished.");
        std::process::exit(i32::from(!verdict.is_up()));
    }

    let server = Server::new(config.server(), evaluator);
    let run = server.run(ctx);
    tokio::pin!(run);
    tokio::select! {
        res = &mut run => return res.context("server stopped"),
        res = tokio::signal::ctrl_c() => res.context("ctrl_c()")?,
    }

    // Stop accepting and let the in-flight connections wind down.
    tracing::info!("Shutting down.");
    ctx.cancel();
    run.await.context("server stopped")
}
