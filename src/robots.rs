//! Minimal robots.txt support: user-agent groups, Allow/Disallow with
//! `*` and `$` patterns, longest match wins.

use crate::http_client::EnhancedHttpClient;
use log::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    pattern: String,
    allow: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

#[derive(Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

impl RobotsRules {
    /// Rules that allow everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt for the given user agent. A group naming the agent
    /// wins over the `*` group.
    pub fn parse(text: &str, user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_block = false;

        for raw in text.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !in_agent_block && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_block = true;
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    // An empty Disallow means nothing is blocked
                    if value.is_empty() {
                        continue;
                    }
                    current.rules.push(Rule {
                        pattern: value.to_string(),
                        allow: field == "allow",
                    });
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        let specific = groups.iter().find(|g| {
            g.agents
                .iter()
                .any(|a| a != "*" && !a.is_empty() && ua.contains(a.as_str()))
        });
        let chosen = specific.or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        Self {
            rules: chosen.map(|g| g.rules.clone()).unwrap_or_default(),
        }
    }

    /// `path` includes the query string when there is one
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && (best_allow || !rule.allow)) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }

    pub fn is_url_allowed(&self, url: &Url) -> bool {
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        self.is_allowed(&path)
    }

    /// Fetch `/robots.txt` from the site root. Anything other than a
    /// successful response allows everything.
    pub async fn fetch(client: &EnhancedHttpClient, base: &Url, user_agent: &str) -> Self {
        let robots_url = match base.join("/robots.txt") {
            Ok(u) => u,
            Err(e) => {
                warn!("Cannot build robots.txt URL from {}: {}", base, e);
                return Self::allow_all();
            }
        };

        match client.fetch(robots_url.as_str()).await {
            Ok(page) if page.is_success() => {
                let rules = Self::parse(&page.body, user_agent);
                info!("Loaded {} robots.txt rules from {}", rules.rules.len(), robots_url);
                rules
            }
            Ok(page) => {
                debug!("robots.txt returned {}, allowing all", page.status);
                Self::allow_all()
            }
            Err(e) => {
                warn!("Failed to fetch {}: {}, allowing all", robots_url, e);
                Self::allow_all()
            }
        }
    }
}

/// `*` matches any run of characters, a trailing `$` anchors the end
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            if !path.starts_with(part) {
                return false;
            }
            pos = part.len();
            continue;
        }
        if i == parts.len() - 1 && anchored {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    !anchored || pos == path.len()
}
