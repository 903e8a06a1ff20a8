use crate::cloudflare::{backoff_between, detect_challenge, is_proxy_failure_status, is_soft_block};
use crate::error::{Result, ScraperError};
use crate::metrics::{MetricsTracker, DIRECT};
use crate::proxy_manager::{format_proxy, redact_proxy, ProxyManager};
use crate::user_agents::UserAgentPool;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Configuration for the fetcher's retry and connection behavior
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_statuses: Vec<u16>,
    pub enable_cookies: bool,
    pub enable_gzip: bool,
    /// Pause range after a challenge page
    pub challenge_backoff: (Duration, Duration),
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 5,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            retry_statuses: vec![500, 502, 503, 504, 408, 429, 403],
            enable_cookies: true,
            enable_gzip: true,
            challenge_backoff: (Duration::from_secs(5), Duration::from_secs(10)),
        }
    }
}

/// A downloaded page and how it was fetched
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
    /// Redacted proxy label, `None` for direct requests
    pub proxy: Option<String>,
    pub user_agent: String,
    pub elapsed: Duration,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
struct ChosenProxy {
    raw: String,
    url: String,
    /// What logs and metrics see
    label: String,
}

/// HTTP fetcher rotating user agents and proxies, retrying with
/// exponential backoff and backing off from challenge pages
pub struct EnhancedHttpClient {
    config: HttpClientConfig,
    user_agents: UserAgentPool,
    proxies: Option<Arc<ProxyManager>>,
    metrics: Arc<MetricsTracker>,
    /// One client per proxy URL; reqwest binds proxies at build time
    clients: Mutex<HashMap<String, Client>>,
}

impl EnhancedHttpClient {
    /// Create a fetcher with default configuration and no proxies
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let fetcher = Self {
            config,
            user_agents: UserAgentPool::default(),
            proxies: None,
            metrics: Arc::new(MetricsTracker::new()),
            clients: Mutex::new(HashMap::new()),
        };
        // Fail early on a broken TLS/client setup
        fetcher.client_for(None)?;
        Ok(fetcher)
    }

    pub fn with_user_agents(mut self, user_agents: UserAgentPool) -> Self {
        self.user_agents = user_agents;
        self
    }

    pub fn with_proxy_manager(mut self, proxies: Arc<ProxyManager>) -> Self {
        if proxies.is_empty() {
            log::warn!("Proxy list is empty, requests go out directly");
        }
        self.proxies = Some(proxies);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsTracker>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsTracker> {
        &self.metrics
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
        headers
    }

    fn build_client(&self, proxy_url: Option<&str>) -> Result<Client> {
        let mut builder = ClientBuilder::new()
            .timeout(self.config.timeout)
            .cookie_store(self.config.enable_cookies)
            .gzip(self.config.enable_gzip)
            .brotli(self.config.enable_gzip)
            .redirect(reqwest::redirect::Policy::limited(10))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(Self::default_headers());

        builder = match proxy_url {
            Some(url) => builder.proxy(reqwest::Proxy::all(url)?),
            None => builder.no_proxy(),
        };

        Ok(builder.build()?)
    }

    fn client_for(&self, proxy: Option<&ChosenProxy>) -> Result<Client> {
        let key = proxy.map(|p| p.url.as_str()).unwrap_or(DIRECT);
        let mut clients = self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }

        let client = self.build_client(proxy.map(|p| p.url.as_str()))?;
        clients.insert(key.to_string(), client.clone());
        Ok(client)
    }

    /// Pick a random usable proxy; malformed entries are banned on sight.
    fn pick_proxy(&self) -> Option<ChosenProxy> {
        let manager = self.proxies.as_ref()?;
        loop {
            let raw = manager.random_proxy()?;
            match format_proxy(&raw) {
                Some(url) => {
                    let label = redact_proxy(&raw);
                    return Some(ChosenProxy { raw, url, label });
                }
                None => manager.mark_banned(&raw),
            }
        }
    }

    fn mark_proxy_failed(&self, proxy: &ChosenProxy) {
        if let Some(manager) = &self.proxies {
            manager.mark_failed(&proxy.raw);
        }
    }

    fn mark_proxy_banned(&self, proxy: &ChosenProxy) {
        if let Some(manager) = &self.proxies {
            manager.mark_banned(&proxy.raw);
        }
    }

    /// Exponential backoff capped at the max delay, with ±25% jitter
    pub fn calculate_retry_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;

        let factor = 1u64 << attempt.min(20);
        let delay_ms = base_delay.saturating_mul(factor).min(max_delay);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((delay_ms as f64 * jitter) as u64)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.config.retry_statuses.contains(&status)
    }

    async fn send(&self, client: &Client, url: &str, user_agent: &str) -> std::result::Result<(u16, String, String), reqwest::Error> {
        let response = client.get(url).header(USER_AGENT, user_agent).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok((status, final_url, body))
    }

    /// Fetch a URL, rotating proxy and user agent on every attempt.
    ///
    /// Non-retryable error statuses (404 and the like) are returned as pages;
    /// the caller decides what to do with them.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.fetch_with(url, false).await
    }

    /// Like `fetch`, optionally treating a 200 "Cloudflare security" page as
    /// a block to retry. A soft block does not ban the proxy.
    pub async fn fetch_with(&self, url: &str, check_soft_block: bool) -> Result<FetchedPage> {
        let max_retries = self.config.max_retries;
        let mut last_status = None;

        for attempt in 0..=max_retries {
            let retries_left = attempt < max_retries;
            let proxy = self.pick_proxy();
            let label = proxy.as_ref().map(|p| p.label.as_str()).unwrap_or(DIRECT).to_string();
            let client = self.client_for(proxy.as_ref())?;
            let user_agent = self.user_agents.random().to_string();

            if let Some(p) = &proxy {
                log::info!("Using proxy {} for {}", p.label, url);
            }
            log::info!("Using User-Agent: {} for {}", user_agent, url);

            let start = Instant::now();
            match self.send(&client, url, &user_agent).await {
                Ok((status, final_url, body)) => {
                    let elapsed = start.elapsed();
                    last_status = Some(status);

                    if let Some(challenge) = detect_challenge(status, &body) {
                        self.metrics
                            .record_challenge(&label, format!("{} challenge (status {})", challenge, status));
                        match &proxy {
                            Some(p) => {
                                log::warn!("Proxy {} banned after challenge at {}", p.label, url);
                                self.mark_proxy_banned(p);
                            }
                            None => log::warn!("{} challenge at {} (status {})", challenge, url, status),
                        }

                        if !retries_left {
                            return Err(ScraperError::Blocked { url: url.to_string() });
                        }
                        self.metrics.record_retry(&label);
                        let (min, max) = self.config.challenge_backoff;
                        sleep(backoff_between(min, max)).await;
                        continue;
                    }

                    if check_soft_block && is_soft_block(status, &body) {
                        self.metrics.record_challenge(&label, "soft block page".to_string());
                        log::warn!("Soft block page at {} via {}, retrying", url, label);

                        if !retries_left {
                            return Err(ScraperError::Blocked { url: url.to_string() });
                        }
                        self.metrics.record_retry(&label);
                        let (min, max) = self.config.challenge_backoff;
                        sleep(backoff_between(min, max)).await;
                        continue;
                    }

                    if self.is_retryable_status(status) {
                        if let Some(p) = &proxy {
                            if is_proxy_failure_status(status) {
                                log::warn!("Proxy {} failed with status {}", p.label, status);
                                self.mark_proxy_failed(p);
                            }
                        }
                        self.metrics.record_failure(&label, format!("status {}", status));

                        if !retries_left {
                            break;
                        }
                        log::warn!(
                            "Retrying {} (failed with {}), attempt {}/{}, Proxy: {}, User-Agent: {}",
                            url,
                            status,
                            attempt + 1,
                            max_retries + 1,
                            label,
                            user_agent
                        );
                        self.metrics.record_retry(&label);
                        sleep(self.calculate_retry_delay(attempt)).await;
                        continue;
                    }

                    self.metrics.record_success(&label, elapsed);
                    if let Some(p) = &proxy {
                        log::info!("Proxy {} works for {}", p.label, url);
                    }
                    log::debug!(
                        "Fetched {}: status {}, proxy {}, {} bytes in {}ms",
                        url,
                        status,
                        label,
                        body.len(),
                        elapsed.as_millis()
                    );

                    return Ok(FetchedPage {
                        url: url.to_string(),
                        final_url,
                        status,
                        body,
                        proxy: proxy.map(|p| p.label),
                        user_agent,
                        elapsed,
                    });
                }
                Err(e) => {
                    last_status = None;
                    if let Some(p) = &proxy {
                        log::warn!("Proxy {} failed: {}", p.label, e);
                        self.mark_proxy_failed(p);
                    }
                    self.metrics.record_failure(&label, e.to_string());

                    // Through a proxy any transport error is worth another proxy
                    let should_retry = proxy.is_some()
                        || e.is_timeout()
                        || e.is_connect()
                        || e.is_request()
                        || e.is_body();

                    if !should_retry {
                        return Err(e.into());
                    }
                    if !retries_left {
                        break;
                    }
                    log::warn!(
                        "Request failed for {}, attempt {}/{}: {}",
                        url,
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    self.metrics.record_retry(&label);
                    sleep(self.calculate_retry_delay(attempt)).await;
                }
            }
        }

        Err(ScraperError::RetriesExhausted {
            url: url.to_string(),
            status: last_status,
        })
    }

    /// Fetch a URL and require a 2xx status
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let page = self.fetch(url).await?;
        if !page.is_success() {
            return Err(ScraperError::UnexpectedStatus {
                url: page.url,
                status: page.status,
            });
        }
        Ok(page.body)
    }
}
