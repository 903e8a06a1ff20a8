//! Proxy and user-agent statistics recovered from crawl logs.
//!
//! Reads the lines the fetcher writes for every attempt ("Using proxy ...",
//! "Proxy ... works", "Proxy ... failed", "Proxy ... banned") and turns them
//! into per-proxy success rates.

use crate::error::Result;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const DEFAULT_LOG_FILE: &str = "fanmtl.log";
pub const DEFAULT_OUTPUT_FILE: &str = "best_proxies.txt";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

impl ProxyStats {
    /// Successes over resolved attempts, in percent
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.successes as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub struct ProxyReport {
    proxies: HashMap<String, ProxyStats>,
    user_agents: HashMap<String, u64>,
}

/// `Proxy <label> <verb>` as written by the fetcher and the checker. The
/// verb is the word right after the label, trailing punctuation dropped.
fn proxy_event(line: &str) -> Option<(&str, &str)> {
    let (_, rest) = line.split_once("Proxy ")?;
    let mut words = rest.split_whitespace();
    let proxy = words.next()?;
    let verb = words.next()?.trim_end_matches(|c: char| !c.is_alphanumeric());
    Some((proxy, verb))
}

fn between<'a>(line: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let (_, rest) = line.split_once(start)?;
    let value = rest.split(end).next().unwrap_or(rest).trim_end();
    (!value.is_empty()).then_some(value)
}

impl ProxyReport {
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut report = Self::default();
        for line in reader.lines() {
            report.process_line(&line?);
        }
        Ok(report)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Parsing log file: {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    fn process_line(&mut self, line: &str) {
        if let Some(proxy) = between(line, "Using proxy ", " for ") {
            self.proxies.entry(proxy.to_string()).or_default().requests += 1;
        }

        if let Some(agent) = between(line, "Using User-Agent: ", " for ") {
            *self.user_agents.entry(agent.to_string()).or_default() += 1;
        }

        match proxy_event(line) {
            Some((proxy, "works")) => {
                self.proxies.entry(proxy.to_string()).or_default().successes += 1;
            }
            Some((proxy, "failed" | "banned")) => {
                self.proxies.entry(proxy.to_string()).or_default().failures += 1;
            }
            _ => {}
        }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    pub fn stats(&self, proxy: &str) -> Option<&ProxyStats> {
        self.proxies.get(proxy)
    }

    fn with_min_requests(&self, min_requests: u64) -> Vec<(&str, &ProxyStats)> {
        self.proxies
            .iter()
            .filter(|(_, s)| s.requests >= min_requests)
            .map(|(p, s)| (p.as_str(), s))
            .collect()
    }

    /// Highest success rate first
    pub fn best(&self, min_requests: u64, n: usize) -> Vec<(&str, &ProxyStats)> {
        let mut list = self.with_min_requests(min_requests);
        list.sort_by(|a, b| {
            b.1.success_rate()
                .total_cmp(&a.1.success_rate())
                .then_with(|| a.0.cmp(b.0))
        });
        list.truncate(n);
        list
    }

    /// Lowest success rate first
    pub fn worst(&self, min_requests: u64, n: usize) -> Vec<(&str, &ProxyStats)> {
        let mut list = self.with_min_requests(min_requests);
        list.sort_by(|a, b| {
            a.1.success_rate()
                .total_cmp(&b.1.success_rate())
                .then_with(|| a.0.cmp(b.0))
        });
        list.truncate(n);
        list
    }

    pub fn top_user_agents(&self, n: usize) -> Vec<(&str, u64)> {
        let mut list: Vec<(&str, u64)> = self.user_agents.iter().map(|(ua, c)| (ua.as_str(), *c)).collect();
        list.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        list.truncate(n);
        list
    }

    pub fn qualified(&self, min_requests: u64, min_success_rate: f64) -> Vec<&str> {
        let mut list: Vec<&str> = self
            .with_min_requests(min_requests)
            .into_iter()
            .filter(|(_, s)| s.success_rate() >= min_success_rate)
            .map(|(p, _)| p)
            .collect();
        list.sort_unstable();
        list
    }

    /// Write qualifying proxies to `path`. Nothing is written when none
    /// qualify.
    pub fn write_best(&self, path: impl AsRef<Path>, min_requests: u64, min_success_rate: f64) -> Result<usize> {
        let best = self.qualified(min_requests, min_success_rate);
        if best.is_empty() {
            warn!("No proxies meet the criteria for best proxies");
            return Ok(0);
        }

        let mut content = best.join("\n");
        content.push('\n');
        fs::write(path.as_ref(), content)?;
        info!("Saved {} best proxies to {}", best.len(), path.as_ref().display());
        Ok(best.len())
    }

    pub fn log_summary(&self, min_requests: u64, n: usize) {
        info!("Proxy Statistics:");
        info!("Total proxies used: {}", self.proxies.len());

        let log_rows = |title: &str, rows: Vec<(&str, &ProxyStats)>| {
            if rows.is_empty() {
                return;
            }
            info!("{} {} Proxies:", title, rows.len());
            for (proxy, s) in rows {
                info!(
                    "Proxy: {} - Success Rate: {:.2}% - Requests: {} - Successes: {} - Failures: {}",
                    proxy,
                    s.success_rate(),
                    s.requests,
                    s.successes,
                    s.failures
                );
            }
        };
        log_rows("Top", self.best(min_requests, n));
        log_rows("Bottom", self.worst(min_requests, n));

        info!("User Agent Statistics:");
        info!("Total user agents used: {}", self.user_agents.len());
        for (agent, count) in self.top_user_agents(n) {
            let preview: String = agent.chars().take(50).collect();
            info!("User Agent: {}... - Used {} times", preview, count);
        }
    }
}
