// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for the RPC socket.
//!
//! The listener accepts connections and never blocks the coordinator.
//! Each connection gets a reader task; each request takes a permit from
//! a bounded pool and runs as its own task, answering through a shared
//! writer task. Responses on one connection therefore interleave in
//! completion order, correlated by request id.

mod methods;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, warn};

use crate::coordinator::CoordinatorHandle;
use crate::protocol::{self, ProtocolError, Request, Response};

/// Concurrent in-flight RPC dispatches across all connections.
const POOL_SIZE: usize = 16;

/// Per-connection queue of responses waiting on the writer task.
const WRITE_QUEUE: usize = 32;

/// Shared daemon context for all request handlers.
pub(crate) struct ListenCtx {
    pub coordinator: CoordinatorHandle,
    /// Signals `main` that a shutdown was requested over RPC.
    pub shutdown: Arc<Notify>,
    /// False once `daemon.shutdown { graceful: false }` was seen.
    pub shutdown_graceful: Arc<AtomicBool>,
    /// Set while draining: requests are refused with `shutting_down`.
    pub draining: Arc<AtomicBool>,
    pool: Semaphore,
}

impl ListenCtx {
    pub fn new(
        coordinator: CoordinatorHandle,
        shutdown: Arc<Notify>,
        shutdown_graceful: Arc<AtomicBool>,
        draining: Arc<AtomicBool>,
    ) -> Self {
        Self {
            coordinator,
            shutdown,
            shutdown_graceful,
            draining,
            pool: Semaphore::new(POOL_SIZE),
        }
    }
}

/// Listener task for accepting socket connections.
pub(crate) struct Listener {
    socket: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(socket: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { socket, ctx }
    }

    /// Run the accept loop until the task is aborted at shutdown.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        match handle_connection(stream, &ctx).await {
                            Ok(()) | Err(ProtocolError::ConnectionClosed) => {
                                debug!("client disconnected")
                            }
                            Err(ProtocolError::FrameTooLarge { size, max }) => {
                                warn!(size, max, "closing connection: oversize frame")
                            }
                            Err(e) => error!("connection error: {e}"),
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {e}");
                }
            }
        }
    }
}

/// Serve one client connection until it closes or violates the protocol.
async fn handle_connection(stream: UnixStream, ctx: &Arc<ListenCtx>) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();

    // All request tasks answer through one writer.
    let (response_tx, mut response_rx) = mpsc::channel::<Response>(WRITE_QUEUE);
    let writer_task = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            let payload = match serde_json::to_vec(&response) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("failed to encode response: {e}");
                    continue;
                }
            };
            if let Err(e) = protocol::write_frame(&mut writer, &payload).await {
                debug!("write failed, dropping connection: {e}");
                break;
            }
        }
    });

    let result = loop {
        let frame = match protocol::read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => break Err(e),
        };
        // A frame that is not a request envelope is a protocol
        // violation; there is no id to answer with, so just close.
        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("closing connection: malformed request: {e}");
                break Ok(());
            }
        };

        debug!(id = %request.id, method = %request.method, "received request");
        let ctx = Arc::clone(ctx);
        let response_tx = response_tx.clone();
        tokio::spawn(async move {
            // The permit bounds concurrent dispatches daemon-wide.
            let _permit = ctx.pool.acquire().await;
            let response = methods::dispatch(request, &ctx).await;
            let _ = response_tx.send(response).await;
        });
    };

    // Let queued responses flush before the writer goes away.
    drop(response_tx);
    let _ = writer_task.await;
    result
}
