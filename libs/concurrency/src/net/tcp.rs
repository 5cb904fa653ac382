//! Context-aware utilities for `tokio::net::tcp`.
//! Note that `accept()` and `connect()` disable Nagle
//! algorithm, since the probe writes a couple of tiny
//! responses and wants them delivered immediately.
use crate::ctx;
use std::{io, net::SocketAddr};

/// TCP stream.
pub type Stream = tokio::net::TcpStream;

/// TCP listener.
pub type Listener = tokio::net::TcpListener;

/// Binds a TCP listener to `addr`.
pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
    Listener::bind(addr).await
}

fn set_nodelay(stream: &Stream) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(?err, "set_nodelay()");
    }
}

/// Accepts an INBOUND listener connection.
pub async fn accept(
    ctx: &ctx::Ctx,
    this: &mut Listener,
) -> ctx::OrCanceled<io::Result<(Stream, SocketAddr)>> {
    Ok(ctx.wait(this.accept()).await?.inspect(|(stream, _)| {
        set_nodelay(stream);
    }))
}

/// Opens a TCP connection to a remote host.
pub async fn connect(ctx: &ctx::Ctx, addr: SocketAddr) -> ctx::OrCanceled<io::Result<Stream>> {
    Ok(ctx
        .wait(Stream::connect(addr))
        .await?
        .inspect(set_nodelay))
}
