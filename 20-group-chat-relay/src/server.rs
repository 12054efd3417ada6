use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    error::{FrameError, RelayError, SessionError},
    router::Router,
    session::{Session, SessionId},
};

pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
}

struct RelayState {
    router: Arc<Router>,
    config: RelayConfig,
    next_id: AtomicU64,
}

impl RelayServer {
    /// Binds the listener described by `config`.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    /// Uses an already bound listener; `config.listen` is ignored.
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState {
                router: Arc::new(Router::new()),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.state.router)
    }

    /// Accepts connections until `shutdown` resolves, then closes every session.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &RelayState) {
    let closed = state.router.close_all().await;
    info!(closed, "relay shutting down");
}

fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, state: &Arc<RelayState>) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let state = Arc::clone(state);
    tokio::spawn(async move {
        run_session(stream, peer, id, state).await;
    });
}

async fn run_session(stream: TcpStream, peer: SocketAddr, id: SessionId, state: Arc<RelayState>) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(session = id, error = ?err, "failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let session = Arc::new(Session::new(
        id,
        Some(peer),
        writer,
        state.config.write_timeout,
    ));
    let mut reader = session.reader(BufReader::new(reader));

    let Some(active) = state.router.register(Arc::clone(&session)).await else {
        debug!(session = id, %peer, "relay is shutting down; connection refused");
        return;
    };
    info!(session = id, %peer, active, "client connected");

    loop {
        match reader.read_next().await {
            Ok(text) => {
                debug!(session = id, bytes = text.len(), "relaying frame");
                let report = state.router.broadcast(id, &text).await;
                debug!(session = id, delivered = report.delivered, dropped = report.dropped, "frame relayed");
            }
            Err(err) => {
                log_session_end(id, &err);
                break;
            }
        }
    }

    if let Some(active) = state.router.unregister(id).await {
        info!(session = id, %peer, active, "client disconnected");
    }
}

fn log_session_end(id: SessionId, err: &SessionError) {
    match err {
        SessionError::Frame(FrameError::ConnectionClosed) | SessionError::Closed(_) => {
            debug!(session = id, "session ended");
        }
        other => warn!(session = id, error = %other, "session ended with error"),
    }
}
