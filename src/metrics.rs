//! Request metrics per proxy and running crawl counters
//!
//! Tracks success rates, challenge counts and response times for every proxy
//! (or `direct` when no proxy is used), plus totals for scraped items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Label used for requests made without a proxy
pub const DIRECT: &str = "direct";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyMetrics {
    pub proxy: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
    pub retry_count: u64,
    pub challenges: u64,
    pub rate_limit_hits: u64,
    pub timeout_count: u64,
}

impl ProxyMetrics {
    pub fn new(proxy: String) -> Self {
        Self {
            proxy,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
            retry_count: 0,
            challenges: 0,
            rate_limit_hits: 0,
            timeout_count: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    pub fn record_failure(&mut self, error: String) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());

        let lower = error.to_lowercase();
        if error.contains("429") || lower.contains("rate limit") {
            self.rate_limit_hits += 1;
        } else if lower.contains("timeout") || lower.contains("timed out") {
            self.timeout_count += 1;
        }
        self.last_error = Some(error);
    }

    /// A challenge counts as a failed request as well
    pub fn record_challenge(&mut self, description: String) {
        self.challenges += 1;
        self.record_failure(description);
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }
}

/// Shared tracker keyed by proxy label
#[derive(Debug, Default)]
pub struct MetricsTracker {
    metrics: Mutex<HashMap<String, ProxyMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProxyMetrics>> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_entry<R>(&self, proxy: &str, f: impl FnOnce(&mut ProxyMetrics) -> R) -> R {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(proxy.to_string())
            .or_insert_with(|| ProxyMetrics::new(proxy.to_string()));
        f(entry)
    }

    pub fn record_success(&self, proxy: &str, response_time: Duration) {
        let rate = self.with_entry(proxy, |m| {
            m.record_success(response_time);
            m.success_rate()
        });
        log::debug!(
            "[{}] Success - Response time: {}ms - Success rate: {:.2}%",
            proxy,
            response_time.as_millis(),
            rate
        );
    }

    pub fn record_failure(&self, proxy: &str, error: String) {
        let rate = self.with_entry(proxy, |m| {
            m.record_failure(error.clone());
            m.success_rate()
        });
        log::debug!("[{}] Failure - Error: {} - Success rate: {:.2}%", proxy, error, rate);
    }

    pub fn record_challenge(&self, proxy: &str, description: String) {
        self.with_entry(proxy, |m| m.record_challenge(description));
    }

    pub fn record_retry(&self, proxy: &str) {
        let retries = self.with_entry(proxy, |m| {
            m.record_retry();
            m.retry_count
        });
        log::debug!("[{}] Retry attempt - Total retries: {}", proxy, retries);
    }

    pub fn get_metrics(&self, proxy: &str) -> Option<ProxyMetrics> {
        self.lock().get(proxy).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<ProxyMetrics> {
        self.lock().values().cloned().collect()
    }

    /// Log one line per proxy, best success rate first
    pub fn log_summary(&self) {
        let mut sorted = self.get_all_metrics();
        sorted.sort_by(|a, b| b.success_rate().total_cmp(&a.success_rate()));

        log::info!("Proxy performance summary ({} proxies)", sorted.len());
        for m in sorted {
            log::info!(
                "  {}: {:.2}% success, {} requests, {} failed, {} challenges, {} retries, avg {:.0}ms",
                m.proxy,
                m.success_rate(),
                m.total_requests,
                m.failed_requests,
                m.challenges,
                m.retry_count,
                m.average_response_time_ms
            );
        }
    }

    pub fn export_json(&self) -> String {
        let metrics = self.lock();
        serde_json::to_string_pretty(&*metrics).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Helper to time an operation and record it against a proxy label
pub async fn track_request<F, T, E>(tracker: &MetricsTracker, proxy: &str, operation: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = operation.await;
    let duration = start.elapsed();

    match &result {
        Ok(_) => tracker.record_success(proxy, duration),
        Err(e) => tracker.record_failure(proxy, e.to_string()),
    }

    result
}

/// Running totals for a crawl
#[derive(Debug, Default)]
pub struct CrawlCounters {
    novels: AtomicU64,
    chapters: AtomicU64,
    contents: AtomicU64,
    pages: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSnapshot {
    pub novels: u64,
    pub chapters: u64,
    pub contents: u64,
    pub pages_fetched: u64,
    pub failures: u64,
    pub dropped_items: u64,
}

impl CrawlCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_novel(&self) -> u64 {
        self.novels.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_chapter(&self) -> u64 {
        self.chapters.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_content(&self) -> u64 {
        self.contents.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_page(&self) -> u64 {
        self.pages.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CrawlSnapshot {
        CrawlSnapshot {
            novels: self.novels.load(Ordering::Relaxed),
            chapters: self.chapters.load(Ordering::Relaxed),
            contents: self.contents.load(Ordering::Relaxed),
            pages_fetched: self.pages.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped_items: self.dropped.load(Ordering::Relaxed),
        }
    }
}
