//! `sld orders` handlers: thin JSON client for the daemon's order API.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use sld_daemon::api_types::{ErrorResponse, OrdersResponse, PlaceOrderRequest};
use sld_schemas::Order;

pub const ENV_DAEMON_URL: &str = "SLD_DAEMON_URL";
const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:8080";

/// `--daemon` flag, then `SLD_DAEMON_URL`, then the local default.
pub fn daemon_url(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var(ENV_DAEMON_URL).ok())
        .unwrap_or_else(|| DEFAULT_DAEMON_URL.to_string())
}

pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("http client build failed")?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.context("daemon response decode failed");
        }
        match resp.json::<ErrorResponse>().await {
            Ok(e) => bail!("daemon returned {} ({}): {}", status.as_u16(), e.code, e.error),
            Err(_) => bail!("daemon returned {}", status.as_u16()),
        }
    }

    pub async fn list(&self, pending_only: bool) -> Result<Vec<Order>> {
        let path = if pending_only {
            "/v1/orders/pending"
        } else {
            "/v1/orders"
        };
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .context("daemon request failed")?;
        Ok(Self::decode::<OrdersResponse>(resp).await?.orders)
    }

    pub async fn get(&self, id: &str) -> Result<Order> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/orders/{id}")))
            .send()
            .await
            .context("daemon request failed")?;
        Self::decode(resp).await
    }

    pub async fn place(&self, req: &PlaceOrderRequest) -> Result<Order> {
        let resp = self
            .http
            .post(self.url("/v1/orders"))
            .json(req)
            .send()
            .await
            .context("daemon request failed")?;
        Self::decode(resp).await
    }

    pub async fn cancel(&self, id: &str) -> Result<Order> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/orders/{id}/cancel")))
            .send()
            .await
            .context("daemon request failed")?;
        Self::decode(resp).await
    }
}

fn print_order(o: &Order) {
    println!(
        "id={} security={} trigger_price={} quantity={} status={} placed_at_utc={} handle={}",
        o.id,
        o.security,
        o.trigger_price,
        o.quantity,
        o.status,
        o.placed_at.to_rfc3339(),
        o.execution_handle
            .as_ref()
            .map(|h| h.as_str())
            .unwrap_or("NONE"),
    );
}

pub async fn list(client: &DaemonClient, pending_only: bool) -> Result<()> {
    let orders = client.list(pending_only).await?;
    for o in &orders {
        print_order(o);
    }
    println!("count={}", orders.len());
    Ok(())
}

pub async fn get(client: &DaemonClient, id: &str) -> Result<()> {
    print_order(&client.get(id).await?);
    Ok(())
}

pub async fn place(
    client: &DaemonClient,
    security: String,
    trigger_price: f64,
    quantity: i64,
) -> Result<()> {
    let req = PlaceOrderRequest {
        security,
        trigger_price,
        quantity,
    };
    print_order(&client.place(&req).await?);
    Ok(())
}

pub async fn cancel(client: &DaemonClient, id: &str) -> Result<()> {
    print_order(&client.cancel(id).await?);
    Ok(())
}
