use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{Instrument, info, info_span};

#[derive(Debug, Error)]
pub enum Error {
    #[error("can't listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("accept: {0}")]
    Accept(#[source] io::Error),
}

/// Binds `addr` and hands every accepted connection to `handler`. Only
/// returns when binding or accepting fails.
#[tracing::instrument(skip(handler))]
pub async fn listen_and_serve<H, F>(addr: &str, handler: H) -> Result<(), Error>
where
    H: Fn(TcpStream, SocketAddr) -> F,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
        addr: addr.to_string(),
        source,
    })?;
    info!("Listening on {addr}");
    serve(listener, handler).await
}

/// Accept loop over an already bound listener. Each connection runs on its
/// own task; the loop never waits for one.
pub async fn serve<H, F>(listener: TcpListener, handler: H) -> Result<(), Error>
where
    H: Fn(TcpStream, SocketAddr) -> F,
    F: Future<Output = ()> + Send + 'static,
{
    loop {
        let (socket, addr) = listener.accept().await.map_err(Error::Accept)?;
        info!("{addr} connected");
        tokio::spawn(handler(socket, addr).instrument(info_span!("session", %addr)));
    }
}
