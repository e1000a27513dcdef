//! Defines the source of full order data: the shop's admin API.

use crate::store::credentials_key;
use anyhow::{Context, Result};
use async_trait::async_trait;
use core::time::Duration;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{instrument, warn};

/// Admin API version the orders are requested with.
pub const API_VERSION: &str = "2021-10";

/// How long to wait after being rate limited when the response doesn't
/// say, in seconds.
const DEFAULT_RETRY_AFTER: f64 = 4.0;

/// Longest wait honoured, in seconds; the function times out after 30.
const MAX_RETRY_AFTER: f64 = 30.0;

/// Fetches full orders by id.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Fetch the given orders. Orders the shop doesn't return are
    /// simply missing from the result.
    async fn fetch_orders(&self, shop_url: &str, token: &str, order_ids: &[String])
        -> Result<Vec<Value>>;
}

#[derive(Deserialize)]
struct OrdersPage {
    orders: Vec<Value>,
}

/// The orders endpoint for a batch of ids.
pub fn orders_url(scheme: &str, shop_url: &str, order_ids: &[String]) -> String {
    format!(
        "{}://{}/admin/api/{}/orders.json?ids={}",
        scheme,
        credentials_key(shop_url).trim_end_matches('/'),
        API_VERSION,
        order_ids.join(",")
    )
}

/// How long a rate limited response asks to wait.
pub fn retry_after(headers: &HeaderMap) -> Duration {
    let seconds = headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .unwrap_or(DEFAULT_RETRY_AFTER);
    Duration::from_secs_f64(seconds.min(MAX_RETRY_AFTER))
}

/// REST client for the admin API. Rate limited requests are retried
/// for as long as the API keeps asking to wait.
pub struct ShopifyClient {
    http: reqwest::Client,
    scheme: String,
}

impl ShopifyClient {
    pub fn new(http: reqwest::Client) -> Self {
        ShopifyClient {
            http,
            scheme: String::from("https"),
        }
    }

    /// Use another URL scheme than `https` to reach shops.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

#[async_trait]
impl OrderSource for ShopifyClient {
    #[instrument(skip(self, token))]
    async fn fetch_orders(
        &self,
        shop_url: &str,
        token: &str,
        order_ids: &[String],
    ) -> Result<Vec<Value>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = orders_url(&self.scheme, shop_url, order_ids);
        loop {
            let response = self
                .http
                .get(&url)
                .header("X-Shopify-Access-Token", token)
                .send()
                .await
                .with_context(|| format!("Failed to request orders from shop {:?}", shop_url))?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(response.headers());
                warn!(?wait, "Shop API call limit exceeded; retrying");
                sleep(wait).await;
                continue;
            }
            let page: OrdersPage = response
                .error_for_status()
                .with_context(|| format!("Shop {:?} rejected the orders request", shop_url))?
                .json()
                .await
                .with_context(|| format!("Malformed orders response from shop {:?}", shop_url))?;
            return Ok(page.orders);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn builds_orders_url() {
        let ids = vec![String::from("1"), String::from("2")];
        assert_eq!(
            orders_url("https", "https://shop.example.com", &ids),
            "https://shop.example.com/admin/api/2021-10/orders.json?ids=1,2"
        );
        assert_eq!(
            orders_url("https", "shop.example.com/", &ids[..1]),
            "https://shop.example.com/admin/api/2021-10/orders.json?ids=1"
        );
    }

    #[test]
    fn retry_after_defaults_to_four_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), Duration::from_secs(4));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.0"));
        assert_eq!(retry_after(&headers), Duration::from_secs(2));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), Duration::from_secs(4));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(retry_after(&headers), Duration::from_secs(30));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("-1"));
        assert_eq!(retry_after(&headers), Duration::from_secs(4));
    }

    /// Serve the given raw responses, one per connection, and hand back
    /// the requests received.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let received = requests.clone();
        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buffer = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let read = stream.read(&mut buffer).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    request.extend_from_slice(&buffer[..read]);
                }
                received
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&request).into_owned());
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        (address, requests)
    }

    fn client() -> ShopifyClient {
        ShopifyClient::new(reqwest::Client::new()).with_scheme("http")
    }

    const RATE_LIMITED: &str = "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const ORDERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 42\r\nConnection: close\r\n\r\n{\"orders\":[{\"id\":1,\"name\":\"#1\"},{\"id\":2}]}";
    const SERVER_ERROR: &str = "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[tokio::test]
    async fn rate_limited_requests_are_retried() {
        let (address, requests) = serve(vec![RATE_LIMITED, ORDERS]).await;
        let ids = vec![String::from("1"), String::from("2")];
        let orders = client()
            .fetch_orders(&address, "secret", &ids)
            .await
            .unwrap();
        assert_eq!(orders, vec![json!({ "id": 1, "name": "#1" }), json!({ "id": 2 })]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            assert!(request.starts_with("GET /admin/api/2021-10/orders.json?ids=1,2 "));
            assert!(request
                .to_ascii_lowercase()
                .contains("x-shopify-access-token: secret"));
        }
    }

    #[tokio::test]
    async fn other_failures_abort() {
        let (address, requests) = serve(vec![SERVER_ERROR]).await;
        let ids = vec![String::from("1")];
        assert!(client().fetch_orders(&address, "secret", &ids).await.is_err());
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_batches_skip_the_api() {
        let orders = client()
            .fetch_orders("127.0.0.1:9", "secret", &[])
            .await
            .unwrap();
        assert!(orders.is_empty());
    }
}
