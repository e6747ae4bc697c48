//! `sld sim`: websocket price simulator.
//!
//! Every interval each security takes a random-walk step of at most half a
//! percent and the new price is broadcast as `{"security","price"}` to all
//! connected clients. With a positive disruption probability a random client
//! is dropped without a close frame now and then, which exercises the
//! daemon's reconnect path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sld_schemas::PriceEvent;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Starting prices.
const SEED_PRICES: &[(&str, f64)] = &[("AAPL", 150.0), ("GOOG", 2500.0)];
const PRICE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub interval: Duration,
    pub disruption_probability: f64,
    pub disruption_every: Duration,
}

impl SimConfig {
    pub fn new(interval_ms: u64, disruption_probability: f64, disruption_every_ms: u64) -> Result<Self> {
        if interval_ms == 0 || disruption_every_ms == 0 {
            bail!("sim intervals must be > 0");
        }
        if !(0.0..=1.0).contains(&disruption_probability) {
            bail!("disruption probability must be within 0..=1, got {disruption_probability}");
        }
        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            disruption_probability,
            disruption_every: Duration::from_millis(disruption_every_ms),
        })
    }
}

// ---------------------------------------------------------------------------
// Price walk
// ---------------------------------------------------------------------------

pub struct PriceWalk {
    prices: Vec<(String, f64)>,
}

impl PriceWalk {
    pub fn new(seed: &[(&str, f64)]) -> Self {
        Self {
            prices: seed.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
        }
    }

    /// Move every price once and return the new ticks in seed order.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> Vec<PriceEvent> {
        self.prices
            .iter_mut()
            .map(|(security, price)| {
                let change = (rng.gen::<f64>() - 0.5) * *price * 0.01;
                *price = (*price + change).max(PRICE_FLOOR);
                PriceEvent {
                    security: security.clone(),
                    price: *price,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

type Clients = Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>;

pub async fn run(addr: &str, cfg: SimConfig) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("sim bind failed: {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        disruption_probability = cfg.disruption_probability,
        "price simulator listening on /prices"
    );
    serve(listener, cfg).await
}

/// Accept clients on `listener` until it fails.
pub async fn serve(listener: TcpListener, cfg: SimConfig) -> Result<()> {
    let (ticks, _) = broadcast::channel::<String>(256);
    let clients: Clients = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(generate(ticks.clone(), cfg.interval));
    if cfg.disruption_probability > 0.0 {
        tokio::spawn(disrupt(
            clients.clone(),
            cfg.disruption_probability,
            cfg.disruption_every,
        ));
    }

    let mut next_id: u64 = 0;
    loop {
        let (stream, peer) = listener.accept().await.context("sim accept failed")?;
        next_id += 1;
        let id = next_id;
        let (kill_tx, kill_rx) = oneshot::channel();
        clients.lock().await.insert(id, kill_tx);
        info!(client = id, peer = %peer, "client connected");

        let rx = ticks.subscribe();
        let registry = clients.clone();
        tokio::spawn(async move {
            if let Err(e) = stream_to_client(stream, rx, kill_rx).await {
                debug!(client = id, error = %e, "client stream ended");
            }
            registry.lock().await.remove(&id);
        });
    }
}

async fn generate(ticks: broadcast::Sender<String>, interval: Duration) {
    let mut walk = PriceWalk::new(SEED_PRICES);
    let mut rng = StdRng::from_entropy();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for ev in walk.step(&mut rng) {
            match serde_json::to_string(&ev) {
                Ok(text) => {
                    let _ = ticks.send(text);
                }
                Err(e) => warn!(error = %e, "price encode failed"),
            }
        }
    }
}

async fn disrupt(clients: Clients, probability: f64, every: Duration) {
    let mut rng = StdRng::from_entropy();
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if rng.gen::<f64>() >= probability {
            continue;
        }
        let mut guard = clients.lock().await;
        if guard.is_empty() {
            continue;
        }
        let ids: Vec<u64> = guard.keys().copied().collect();
        let victim = ids[rng.gen_range(0..ids.len())];
        if let Some(kill) = guard.remove(&victim) {
            info!(client = victim, "simulating disruption");
            let _ = kill.send(());
        }
    }
}

async fn stream_to_client(
    stream: TcpStream,
    mut ticks: broadcast::Receiver<String>,
    mut kill: oneshot::Receiver<()>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            // Dropping both halves closes the socket without a close frame.
            _ = &mut kill => return Ok(()),
            tick = ticks.recv() => match tick {
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    #[test]
    fn walk_moves_at_most_half_a_percent_and_stays_positive() {
        let mut walk = PriceWalk::new(SEED_PRICES);
        let mut rng = StdRng::seed_from_u64(7);
        let mut last: Vec<f64> = SEED_PRICES.iter().map(|(_, p)| *p).collect();
        for _ in 0..500 {
            let ticks = walk.step(&mut rng);
            assert_eq!(ticks.len(), SEED_PRICES.len());
            for (i, ev) in ticks.iter().enumerate() {
                assert_eq!(ev.security, SEED_PRICES[i].0);
                assert!(ev.price >= PRICE_FLOOR);
                assert!((ev.price - last[i]).abs() <= last[i] * 0.005 + 1e-9);
                last[i] = ev.price;
            }
        }
    }

    #[test]
    fn config_rejects_out_of_range_probability() {
        assert!(SimConfig::new(1_000, 1.5, 5_000).is_err());
        assert!(SimConfig::new(0, 0.0, 5_000).is_err());
        assert!(SimConfig::new(1_000, 0.25, 5_000).is_ok());
    }

    #[tokio::test]
    async fn clients_receive_decodable_ticks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, SimConfig::new(20, 0.0, 1_000).unwrap()));

        let (mut ws, _) = connect_async(format!("ws://{addr}/prices")).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = frame.into_text().unwrap();
        let ev: PriceEvent = serde_json::from_str(&text).unwrap();
        assert!(ev.security == "AAPL" || ev.security == "GOOG");
        assert!(ev.price > 0.0);

        server.abort();
    }

    #[tokio::test]
    async fn certain_disruption_drops_the_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, SimConfig::new(20, 1.0, 50).unwrap()));

        let (mut ws, _) = connect_async(format!("ws://{addr}/prices")).await.unwrap();
        let dropped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(_))) => continue,
                    _ => break,
                }
            }
        })
        .await;
        assert!(dropped.is_ok(), "client was never disrupted");

        server.abort();
    }
}
