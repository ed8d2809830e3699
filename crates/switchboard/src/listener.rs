//! TCP acceptance front-end.
//!
//! Binds the listening socket with explicit socket options and runs one
//! accept task per CPU core, all sharing the same listener. Each accepted
//! stream is wrapped in a connect request and handed to the coordinator,
//! which builds and tracks the session.

use futures::stream::{FuturesUnordered, StreamExt};
use hub_server::{ConnectRequest, Server, ServerError};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Pending-connection backlog for the listening socket.
const ACCEPT_BACKLOG: i32 = 1024;

/// Binds `addr` and accepts connections until the process exits.
///
/// Accept errors on individual connections are logged and do not stop the
/// listener; only a failed bind is fatal.
pub async fn run(server: Arc<Server>, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = Arc::new(bind(addr)?);
    let accept_tasks = num_cpus::get().max(1);
    info!(
        "🌐 Listening on {} with {} accept task(s)",
        addr, accept_tasks
    );

    let mut tasks = FuturesUnordered::new();
    for task_id in 0..accept_tasks {
        let listener = Arc::clone(&listener);
        let server = Arc::clone(&server);
        tasks.push(tokio::spawn(async move {
            accept_loop(task_id, listener, server).await;
        }));
    }

    // The accept loops only return on listener failure
    while let Some(finished) = tasks.next().await {
        if let Err(e) = finished {
            error!("Accept task panicked: {}", e);
        }
    }
    Ok(())
}

/// Creates the listening socket with explicit options, then hands it to
/// tokio.
fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("socket creation failed: {e}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| ServerError::Network(format!("SO_REUSEADDR failed: {e}")))?;
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Network(format!("bind {addr} failed: {e}")))?;
    socket
        .listen(ACCEPT_BACKLOG)
        .map_err(|e| ServerError::Network(format!("listen failed: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("nonblocking failed: {e}")))?;

    TcpListener::from_std(socket.into())
        .map_err(|e| ServerError::Network(format!("listener registration failed: {e}")))
}

async fn accept_loop(task_id: usize, listener: Arc<TcpListener>, server: Arc<Server>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("TCP_NODELAY for {} failed: {}", remote_addr, e);
                }

                let mut request = ConnectRequest::new(remote_addr);
                request.stream = Some(stream);
                if let Err(e) = server.accept(request).await {
                    warn!("Rejected connection from {}: {}", remote_addr, e);
                }
            }
            Err(e) => {
                // Transient per-connection errors (reset during handshake,
                // fd pressure); keep accepting.
                warn!("Accept task {} error: {}", task_id, e);
            }
        }
    }
}
