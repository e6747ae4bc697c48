//! Local websocket price feed for gateway and end-to-end tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// What the server does with one accepted connection.
#[derive(Debug, Clone)]
pub struct Session {
    refuse: bool,
    frames: Vec<String>,
    close_after: bool,
}

impl Session {
    /// Drop the TCP connection before the websocket handshake.
    pub fn refuse() -> Self {
        Self {
            refuse: true,
            frames: Vec::new(),
            close_after: false,
        }
    }

    /// Send `frames`, then keep the connection open and forward pushed
    /// messages.
    pub fn hold(frames: Vec<String>) -> Self {
        Self {
            refuse: false,
            frames,
            close_after: false,
        }
    }

    /// Send `frames`, then close the connection.
    pub fn close(frames: Vec<String>) -> Self {
        Self {
            refuse: false,
            frames,
            close_after: true,
        }
    }
}

/// Encode a price message the way the upstream feed does.
pub fn price_frame(security: &str, price: f64) -> String {
    serde_json::json!({ "security": security, "price": price }).to_string()
}

/// Plays `sessions[i]` to the i-th accepted connection. Connections past
/// the end of the script get `Session::hold(vec![])`.
pub struct ScriptedPriceServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    live: broadcast::Sender<String>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ScriptedPriceServer {
    pub async fn spawn(sessions: Vec<Session>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let (live, _) = broadcast::channel(1024);

        let counter = connections.clone();
        let live_tx = live.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let (stream, _peer) = match accepted {
                            Ok(ok) => ok,
                            Err(err) => {
                                warn!(error = %err, "price server accept failed");
                                break;
                            }
                        };
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        let session = sessions
                            .get(n)
                            .cloned()
                            .unwrap_or_else(|| Session::hold(Vec::new()));
                        let live_rx = live_tx.subscribe();
                        tokio::spawn(async move {
                            if let Err(err) = serve(stream, session, live_rx).await {
                                debug!(error = %err, "price server connection ended");
                            }
                        });
                    }
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            live,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/prices", self.addr)
    }

    /// Connections accepted so far, refused ones included.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a price to every held connection.
    pub fn push(&self, security: &str, price: f64) {
        let _ = self.live.send(price_frame(security, price));
    }

    /// Send an arbitrary text frame to every held connection.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.live.send(text.into());
    }

    /// Wait until at least `n` connections have been accepted.
    pub async fn wait_for_connections(&self, n: usize, within: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + within;
        while self.connections() < n {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("expected {n} connections, saw {}", self.connections());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for ScriptedPriceServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn serve(
    stream: TcpStream,
    session: Session,
    mut live: broadcast::Receiver<String>,
) -> Result<()> {
    if session.refuse {
        drop(stream);
        return Ok(());
    }

    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    for frame in session.frames {
        sink.send(Message::Text(frame)).await?;
    }
    if session.close_after {
        sink.send(Message::Close(None)).await?;
        return Ok(());
    }

    loop {
        tokio::select! {
            pushed = live.recv() => match pushed {
                Ok(text) => sink.send(Message::Text(text)).await?,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {}
            },
        }
    }
}
