//! RTMP server listener
//!
//! Handles the TCP accept loop. Each connection gets its own task that runs
//! the handshake and the command exchange, then hands the session to the
//! [`SessionHandler`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::session::Session;

/// What to do with a session once the client has published or played
///
/// Implemented for any `Fn(Session<TcpStream>) -> impl Future<Output = Result<()>>`.
/// The handler is expected to call [`Session::write_start`] when it is ready.
pub trait SessionHandler: Send + Sync + 'static {
    fn handle(&self, session: Session<TcpStream>) -> impl Future<Output = Result<()>> + Send;
}

impl<F, Fut> SessionHandler for F
where
    F: Fn(Session<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    fn handle(&self, session: Session<TcpStream>) -> impl Future<Output = Result<()>> + Send {
        self(session)
    }
}

/// RTMP server
pub struct RtmpServer<H: SessionHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<H: SessionHandler> RtmpServer<H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            handler: Arc::new(handler),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Run the server
    ///
    /// Accepts forever; returns only if binding fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Accept on an already bound listener until `shutdown` resolves
    ///
    /// Sessions already running are left alone.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "RTMP server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            // held for the lifetime of the connection
            let _permit = permit;

            match serve_connection(socket, &config, handler.as_ref()).await {
                Ok(()) => {}
                Err(e) if e.is_end_of_stream() => {
                    tracing::debug!(session_id = session_id, error = %e, "Connection ended");
                }
                Err(e) => {
                    tracing::warn!(session_id = session_id, error = %e, "Connection error");
                }
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

async fn serve_connection<H: SessionHandler>(
    socket: TcpStream,
    config: &ServerConfig,
    handler: &H,
) -> Result<()> {
    let mut session = Session::accept(socket, config).await?;
    session.read_commands().await?;
    handler.handle(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connector::dial_publish;
    use crate::media::flv::{FlvSink, FlvTag, TagSource};
    use crate::session::Intent;
    use bytes::Bytes;
    use tokio::sync::{mpsc, oneshot};

    #[tokio::test]
    async fn test_publish_through_listener() {
        let (tag_tx, mut tag_rx) = mpsc::channel::<(String, FlvTag)>(4);
        let handler = move |mut session: Session<TcpStream>| {
            let tag_tx = tag_tx.clone();
            async move {
                assert_eq!(session.intent(), Some(Intent::Publish));
                session.write_start().await?;
                let tag = session.read_tag().await?;
                let _ = tag_tx.send((session.stream().to_string(), tag)).await;
                Ok::<_, crate::error::Error>(())
            }
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let server = RtmpServer::new(ServerConfig::with_addr(addr), handler);
            server
                .serve_until(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut client = dial_publish(&format!("rtmp://{}/live/key", addr))
            .await
            .unwrap();
        let tag = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01, 0x21, 0x00]));
        client.write_flv(tag.to_bytes().unwrap()).await.unwrap();

        let (stream, received) = tag_rx.recv().await.unwrap();
        assert_eq!(stream, "key");
        assert_eq!(received, tag);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (entered_tx, mut entered_rx) = mpsc::channel::<()>(4);
        let handler = move |session: Session<TcpStream>| {
            let entered_tx = entered_tx.clone();
            async move {
                session.write_start().await?;
                let _ = entered_tx.send(()).await;
                // keep the slot busy
                std::future::pending::<Result<()>>().await
            }
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::with_addr(addr).max_connections(1);
        tokio::spawn(async move {
            RtmpServer::new(config, handler)
                .serve_until(listener, std::future::pending())
                .await
        });

        let url = format!("rtmp://{}/live/a", addr);
        let _first = dial_publish(&url).await.unwrap();
        entered_rx.recv().await.unwrap();

        // the second socket is accepted and dropped right away
        assert!(dial_publish(&url).await.is_err());
    }
}
