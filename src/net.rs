//! HTTP helpers shared by every outbound call between master and volume
//! servers: bounded retries with exponential backoff and a little jitter.

use anyhow::Result;
use ipnet::IpNet;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

const INITIAL_BACKOFF_MS: u64 = 150;
const MAX_BACKOFF_MS: u64 = 1200;

/// Sends the request built by `build` until it gets any HTTP response or
/// `attempts` transport failures happened.
pub async fn send_with_retry<F>(url: &str, build: F, attempts: usize) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut delay_ms = INITIAL_BACKOFF_MS;

    for attempt in 0..attempts {
        match build().send().await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(anyhow::anyhow!(e));
                }
                tracing::debug!("Request to {} failed (attempt {}): {}", url, attempt + 1, e);
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }

    Err(anyhow::anyhow!("Retry attempts exhausted"))
}

pub async fn post_json_with_retry<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
    timeout: Duration,
    attempts: usize,
) -> Result<reqwest::Response> {
    send_with_retry(
        url,
        || client.post(url).json(payload).timeout(timeout),
        attempts,
    )
    .await
}

pub async fn get_with_retry(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    attempts: usize,
) -> Result<reqwest::Response> {
    send_with_retry(url, || client.get(url).timeout(timeout), attempts).await
}

/// `http://` + `addr` unless it already carries a scheme.
pub fn http_url(addr: &str, path: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{}{}", addr.trim_end_matches('/'), path)
    } else {
        format!("http://{}{}", addr, path)
    }
}

/// Parses `10.0.0.0/24` style blocks. A bare address is a single host.
pub fn parse_ip_net(s: &str) -> Option<IpNet> {
    let s = s.trim();
    s.parse::<IpNet>()
        .ok()
        .or_else(|| s.parse::<IpAddr>().ok().map(IpNet::from))
}
