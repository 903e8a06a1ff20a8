//! Bot-protection detection. Challenge pages are recognised and backed off
//! from; nothing here tries to solve them.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Cloudflare,
    Captcha,
}

impl std::fmt::Display for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Challenge::Cloudflare => write!(f, "Cloudflare"),
            Challenge::Captcha => write!(f, "captcha"),
        }
    }
}

/// Statuses that point at the proxy being blocked or overloaded
pub fn is_proxy_failure_status(status: u16) -> bool {
    matches!(status, 403 | 407 | 429 | 502 | 503 | 504)
}

/// Inspect an error response for a challenge page. 2xx pages are never
/// challenges here; see `is_soft_block` for those.
pub fn detect_challenge(status: u16, body: &str) -> Option<Challenge> {
    if body.contains("Cloudflare") && matches!(status, 403 | 503) {
        return Some(Challenge::Cloudflare);
    }

    if is_proxy_failure_status(status) && body.to_lowercase().contains("captcha") {
        return Some(Challenge::Captcha);
    }

    None
}

/// A 200 page that is really the "Cloudflare security" interstitial.
///
/// Only meaningful for novel list pages: chapter text may legitimately
/// mention both words.
pub fn is_soft_block(status: u16, body: &str) -> bool {
    status == 200 && body.contains("Cloudflare") && body.contains("security")
}

/// Pause before retrying a challenged request, uniform in `[min, max]`.
/// `max` below `min` yields `min`.
pub fn backoff_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}
