use crate::cloudflare::backoff_between;
use crate::error::{Result, ScraperError};
use crate::metrics::{track_request, MetricsTracker};
use crate::proxy_manager::{format_proxy, redact_proxy, ProxyManager};
use crate::user_agents::UserAgentPool;
use log::{error, info, warn};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

pub const DEFAULT_TEST_URL: &str = "https://httpbin.org/ip";

#[derive(Debug, Clone)]
pub struct ProxyCheckResult {
    pub proxy: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub elapsed: Duration,
    /// Address the echo endpoint saw
    pub origin: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EchoResponse {
    origin: Option<String>,
}

async fn request_through(
    proxy_url: &str,
    user_agent: &str,
    test_url: &str,
    timeout: Duration,
) -> Result<(u16, String)> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .proxy(reqwest::Proxy::all(proxy_url)?)
        .build()?;
    let response = client.get(test_url).header(USER_AGENT, user_agent).send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    if status != 200 {
        return Err(ScraperError::UnexpectedStatus {
            url: test_url.to_string(),
            status,
        });
    }
    Ok((status, body))
}

/// Request `test_url` through one proxy and report what happened. Logs and
/// metrics use the redacted label; the result keeps the entry as listed.
pub async fn check_proxy(
    proxy: &str,
    user_agent: &str,
    test_url: &str,
    timeout: Duration,
    tracker: &MetricsTracker,
) -> ProxyCheckResult {
    let start = Instant::now();
    let label = redact_proxy(proxy);
    let mut result = ProxyCheckResult {
        proxy: proxy.to_string(),
        ok: false,
        status: None,
        elapsed: Duration::ZERO,
        origin: None,
        error: None,
    };

    let Some(proxy_url) = format_proxy(proxy) else {
        warn!("Skipping malformed proxy entry: {}", label);
        result.error = Some("malformed proxy".to_string());
        return result;
    };

    let ua_preview: String = user_agent.chars().take(30).collect();
    info!("Testing proxy: {} with User-Agent: {}...", label, ua_preview);

    let outcome = track_request(
        tracker,
        &label,
        request_through(&proxy_url, user_agent, test_url, timeout),
    )
    .await;
    result.elapsed = start.elapsed();

    match outcome {
        Ok((status, body)) => {
            result.ok = true;
            result.status = Some(status);
            result.origin = serde_json::from_str::<EchoResponse>(&body)
                .ok()
                .and_then(|echo| echo.origin);
            info!(
                "Proxy {} works! Origin: {} (Time: {:.2}s)",
                label,
                result.origin.as_deref().unwrap_or("unknown"),
                result.elapsed.as_secs_f64()
            );
        }
        Err(ScraperError::UnexpectedStatus { status, .. }) => {
            warn!("Proxy {} returned status code {}", label, status);
            result.status = Some(status);
            result.error = Some(format!("status {}", status));
        }
        Err(e) => {
            error!("Proxy {} failed: {}", label, e);
            result.error = Some(e.to_string());
        }
    }

    result
}

/// Check every proxy in turn, pausing a random time within `pause` between
/// checks
pub async fn check_all(
    manager: &ProxyManager,
    user_agents: &UserAgentPool,
    test_url: &str,
    timeout: Duration,
    pause: (Duration, Duration),
    tracker: &MetricsTracker,
) -> Vec<ProxyCheckResult> {
    let proxies = manager.proxies();
    if proxies.is_empty() {
        error!("No proxies to test");
        return Vec::new();
    }
    info!("Found {} proxies to test", proxies.len());

    let mut results = Vec::with_capacity(proxies.len());
    for (i, proxy) in proxies.iter().enumerate() {
        let result = check_proxy(proxy, user_agents.random(), test_url, timeout, tracker).await;
        results.push(result);
        if i + 1 < proxies.len() {
            tokio::time::sleep(backoff_between(pause.0, pause.1)).await;
        }
    }

    let working = results.iter().filter(|r| r.ok).count();
    info!("Testing complete. {}/{} proxies are working", working, results.len());
    if working == 0 {
        warn!("No working proxies found!");
    }
    results
}

/// Write the proxies that passed, one per line
pub fn write_working(results: &[ProxyCheckResult], path: impl AsRef<Path>) -> Result<usize> {
    let working: Vec<&str> = results.iter().filter(|r| r.ok).map(|r| r.proxy.as_str()).collect();
    let mut content = working.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path.as_ref(), content)?;
    info!("Saved {} working proxies to {}", working.len(), path.as_ref().display());
    Ok(working.len())
}
