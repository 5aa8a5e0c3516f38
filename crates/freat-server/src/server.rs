//! Multi-client TCP server
//!
//! An async listener with one task per connection. Each connection owns
//! exactly one session, opened on accept and torn down when the client goes
//! away, however it goes away. Messages are length-prefixed JSON: a 4-byte
//! little-endian length followed by the body. Command handlers run on the
//! blocking pool so a long memory sweep never stalls the accept loop or the
//! other clients.

use crate::config::ServerConfig;
use freat_common::{Error, Response, Result, MAX_MESSAGE_SIZE};
use freat_core::{Dispatcher, Instrumentation, SessionId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    active_clients: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(config: ServerConfig, backend: Arc<dyn Instrumentation>) -> Self {
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(backend)),
            active_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Bind the listen socket. Split from [`Server::serve`] so callers can
    /// bind port 0 and read back the assigned address.
    pub async fn listen(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!(target: "freat_server", address = %addr, error = %e, "Failed to bind");
            Error::Ipc(format!("Failed to bind {addr}: {e}"))
        })?;
        info!(target: "freat_server", address = %addr, "Server listening");
        Ok(listener)
    }

    /// Bind and run the accept loop
    pub async fn run(&self) -> Result<()> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Accept clients until the task is cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            // Hold new connections at the door while at capacity
            if self.active_clients.load(Ordering::SeqCst) >= self.config.max_clients {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }

            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!(target: "freat_server", peer = %peer, "New client connection");
                    self.active_clients.fetch_add(1, Ordering::SeqCst);

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let active_clients = Arc::clone(&self.active_clients);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, dispatcher).await {
                            warn!(target: "freat_server", peer = %peer, error = %e, "Client connection error");
                        } else {
                            info!(target: "freat_server", peer = %peer, "Client disconnected");
                        }
                        active_clients.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(e) => {
                    error!(target: "freat_server", error = %e, "Accept error");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Serve one client, guaranteeing session teardown on any exit path
async fn handle_client(mut stream: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let session = dispatcher.open_session();
    let outcome = client_loop(&mut stream, &dispatcher, session).await;
    dispatcher.close_session(session);
    outcome
}

async fn client_loop(
    stream: &mut TcpStream,
    dispatcher: &Arc<Dispatcher>,
    session: SessionId,
) -> Result<()> {
    loop {
        let payload = match receive_message(stream).await? {
            Some(payload) => payload,
            None => return Ok(()),
        };

        // Scans can take a while; keep them off the async runtime
        let dispatcher = Arc::clone(dispatcher);
        let response = tokio::task::spawn_blocking(move || dispatcher.dispatch_raw(session, &payload))
            .await
            .map_err(|e| Error::Ipc(format!("Handler task failed: {e}")))?;

        send_message(stream, &response).await?;
    }
}

/// Read one framed message. `Ok(None)` is a clean close before a frame.
async fn receive_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Ipc(format!("Failed to read length: {e}"))),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Ipc(format!("Message too large: {len}")));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to read body: {e}")))?;
    Ok(Some(body))
}

/// Write one framed response
async fn send_message<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    let body = serde_json::to_vec(response)
        .map_err(|e| Error::Ipc(format!("Serialization failed: {e}")))?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(Error::Ipc("Response too large".into()));
    }

    let len = (body.len() as u32).to_le_bytes();
    writer
        .write_all(&len)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write length: {e}")))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write body: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Ipc(format!("Failed to flush: {e}")))?;
    Ok(())
}
