use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ProxyState {
    failed: HashMap<String, Instant>,
    banned: HashSet<String>,
}

/// Keeps the proxy list, tracks failed proxies (retried after a cooldown)
/// and banned proxies (never retried).
#[derive(Debug)]
pub struct ProxyManager {
    proxies: Vec<String>,
    min_proxy_life: Duration,
    state: Mutex<ProxyState>,
}

impl ProxyManager {
    pub fn new(proxies: Vec<String>, min_proxy_life: Duration) -> Self {
        Self {
            proxies,
            min_proxy_life,
            state: Mutex::new(ProxyState::default()),
        }
    }

    /// Load proxies from a file, one per line. A missing file gives an empty
    /// manager so the crawl can proceed without proxies.
    pub fn from_file(path: impl AsRef<Path>, min_proxy_life: Duration) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Proxy file not found: {}", path.display());
            return Self::new(Vec::new(), min_proxy_life);
        }

        match fs::read_to_string(path) {
            Ok(content) => {
                let proxies = parse_proxy_list(&content);
                log::info!("Loaded {} proxies from {}", proxies.len(), path.display());
                Self::new(proxies, min_proxy_life)
            }
            Err(e) => {
                log::error!("Error loading proxies from {}: {}", path.display(), e);
                Self::new(Vec::new(), min_proxy_life)
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self, state: &ProxyState) -> Vec<String> {
        self.proxies
            .iter()
            .filter(|p| !state.banned.contains(*p))
            .filter(|p| match state.failed.get(*p) {
                Some(failed_at) => failed_at.elapsed() >= self.min_proxy_life,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Pick a random usable proxy. When every remaining proxy is cooling down
    /// the failure table is reset once; only banned proxies stay excluded.
    pub fn random_proxy(&self) -> Option<String> {
        let mut state = self.state();
        let mut available = self.available(&state);

        if available.is_empty() && !state.failed.is_empty() {
            log::warn!("No available proxies. Resetting failed proxies.");
            state.failed.clear();
            available = self.available(&state);
        }

        if available.is_empty() {
            if !self.proxies.is_empty() {
                log::error!("No proxies available!");
            }
            return None;
        }

        available.choose(&mut rand::thread_rng()).cloned()
    }

    pub fn mark_failed(&self, proxy: &str) {
        log::warn!("Marking proxy as failed: {}", proxy);
        self.state().failed.insert(proxy.to_string(), Instant::now());
    }

    pub fn mark_banned(&self, proxy: &str) {
        log::warn!("Marking proxy as banned: {}", proxy);
        let mut state = self.state();
        state.failed.remove(proxy);
        state.banned.insert(proxy.to_string());
    }

    pub fn is_banned(&self, proxy: &str) -> bool {
        self.state().banned.contains(proxy)
    }

    pub fn available_count(&self) -> usize {
        let state = self.state();
        self.available(&state).len()
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

/// Parse a proxy list: blank lines and `#` comments are skipped.
pub fn parse_proxy_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Turn a `host:port` entry into a proxy URL for reqwest. Entries that
/// already carry a scheme are returned as they are.
pub fn format_proxy(proxy: &str) -> Option<String> {
    let proxy = proxy.trim();
    if proxy.contains("://") {
        return Some(proxy.to_string());
    }

    let host_part = proxy.rsplit('@').next().unwrap_or(proxy);
    let (host, port) = host_part.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        log::error!("Error formatting proxy {}: expected host:port", redact_proxy(proxy));
        return None;
    }

    Some(format!("http://{}", proxy))
}

/// Label for logs and metrics: credentials in `user:pass@host:port` entries
/// are masked, everything else is kept.
pub fn redact_proxy(proxy: &str) -> String {
    let proxy = proxy.trim();
    let (scheme, rest) = match proxy.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, proxy),
    };

    let masked = match rest.rsplit_once('@') {
        Some((userinfo, host)) => match userinfo.split_once(':') {
            Some((user, _)) => format!("{}:***@{}", user, host),
            None => format!("***@{}", host),
        },
        None => rest.to_string(),
    };

    match scheme {
        Some(scheme) => format!("{}://{}", scheme, masked),
        None => masked,
    }
}
