//! Cached Redis health signals scraped from the external metrics collector.
//!
//! The collector polls the Redis, Sentinel, and Cluster processes and exposes
//! Prometheus text. A background poller scrapes it on an interval and swaps
//! the parsed snapshot into a [`SignalCache`]; reconciles only read the cache.
//!
//! Lines of interest:
//! ```text
//! redis_up{namespace="prod",parent="orders",pod="orders-master-0"} 1
//! redis_cluster_state{namespace="prod",parent="catalog"} 1
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from scraping or parsing the collector.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collector returned status {0}")]
    Status(u16),

    #[error("Failed to compile regex: {0}")]
    RegexCompilation(String),
}

/// Health of one topology object as reported by the collector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthSignal {
    /// Processes reporting `redis_up 1`.
    pub up: u32,
    /// Processes reporting `redis_up 0`.
    pub down: u32,
    /// `redis_cluster_state`, cluster kinds only.
    pub cluster_state_ok: Option<bool>,
}

impl HealthSignal {
    pub fn is_healthy(&self) -> bool {
        self.down == 0 && self.cluster_state_ok != Some(false)
    }

    /// Short description for condition messages.
    pub fn summary(&self) -> String {
        let mut summary = format!("{} up, {} down", self.up, self.down);
        match self.cluster_state_ok {
            Some(true) => summary.push_str(", cluster_state ok"),
            Some(false) => summary.push_str(", cluster_state fail"),
            None => {}
        }
        summary
    }
}

/// `(namespace, parent)` of a topology object.
pub type SignalKey = (String, String);

/// Latest scraped snapshot, keyed by `(namespace, parent)`.
#[derive(Debug, Default)]
pub struct SignalCache {
    signals: RwLock<HashMap<SignalKey, HealthSignal>>,
}

impl SignalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for one object; `None` when the collector has nothing for it.
    pub fn get(&self, namespace: &str, parent: &str) -> Option<HealthSignal> {
        self.signals
            .read()
            .ok()?
            .get(&(namespace.to_string(), parent.to_string()))
            .cloned()
    }

    /// Replace the whole snapshot.
    pub fn replace(&self, snapshot: HashMap<SignalKey, HealthSignal>) {
        if let Ok(mut signals) = self.signals.write() {
            *signals = snapshot;
        }
    }

    /// Record a signal for one object.
    pub fn insert(&self, namespace: &str, parent: &str, signal: HealthSignal) {
        if let Ok(mut signals) = self.signals.write() {
            signals.insert((namespace.to_string(), parent.to_string()), signal);
        }
    }

    /// Forget everything; status falls back to workload readiness.
    pub fn clear(&self) {
        if let Ok(mut signals) = self.signals.write() {
            signals.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.signals.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse the collector's Prometheus text into per-object signals.
///
/// Samples missing a `namespace` or `parent` label are skipped.
pub fn parse_exposition(body: &str) -> Result<HashMap<SignalKey, HealthSignal>, SignalError> {
    let sample = Regex::new(r"^(redis_up|redis_cluster_state)\{([^}]*)\}\s+(\S+)")
        .map_err(|e| SignalError::RegexCompilation(e.to_string()))?;
    let label = Regex::new(r#"(\w+)="([^"]*)""#)
        .map_err(|e| SignalError::RegexCompilation(e.to_string()))?;

    let mut snapshot: HashMap<SignalKey, HealthSignal> = HashMap::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = sample.captures(line) else {
            continue;
        };
        let (Some(metric), Some(labels), Some(value)) = (caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let Ok(value) = value.as_str().parse::<f64>() else {
            continue;
        };

        let mut namespace = None;
        let mut parent = None;
        for pair in label.captures_iter(labels.as_str()) {
            match (pair.get(1).map(|m| m.as_str()), pair.get(2)) {
                (Some("namespace"), Some(v)) => namespace = Some(v.as_str().to_string()),
                (Some("parent"), Some(v)) => parent = Some(v.as_str().to_string()),
                _ => {}
            }
        }
        let (Some(namespace), Some(parent)) = (namespace, parent) else {
            continue;
        };

        let signal = snapshot.entry((namespace, parent)).or_default();
        let ok = value >= 1.0;
        match metric.as_str() {
            "redis_up" if ok => signal.up += 1,
            "redis_up" => signal.down += 1,
            // Any failing node marks the whole cluster failing
            _ => {
                signal.cluster_state_ok = Some(signal.cluster_state_ok.unwrap_or(true) && ok);
            }
        }
    }

    Ok(snapshot)
}

/// Scrape the collector once.
pub async fn scrape(
    client: &reqwest::Client,
    url: &str,
) -> Result<HashMap<SignalKey, HealthSignal>, SignalError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(SignalError::Status(response.status().as_u16()));
    }
    let body = response.text().await?;
    parse_exposition(&body)
}

/// Scrape `url` every `interval`, forever. A failed scrape clears the cache
/// so stale signals never outlive the collector.
pub async fn run_poller(cache: Arc<SignalCache>, url: String, interval: Duration) {
    let client = match reqwest::Client::builder().timeout(interval).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build collector client, health signals disabled");
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match scrape(&client, &url).await {
            Ok(snapshot) => {
                debug!(objects = snapshot.len(), "Refreshed health signals");
                cache.replace(snapshot);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Collector scrape failed, dropping signals");
                cache.clear();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const BODY: &str = r#"
# HELP redis_up Whether the Redis process answers
# TYPE redis_up gauge
redis_up{namespace="prod",parent="orders",pod="orders-master-0"} 1
redis_up{namespace="prod",parent="orders",pod="orders-replica-0"} 0
redis_up{namespace="prod",parent="catalog",pod="catalog-master-0"} 1
redis_cluster_state{namespace="prod",parent="catalog",pod="catalog-master-0"} 1
redis_cluster_state{namespace="prod",parent="catalog",pod="catalog-master-1"} 0
redis_up{pod="stray"} 1
redis_memory_used_bytes{namespace="prod",parent="orders"} 1024
"#;

    #[test]
    fn test_parse_exposition() {
        let snapshot = parse_exposition(BODY).unwrap();
        assert_eq!(snapshot.len(), 2);

        let orders = &snapshot[&("prod".to_string(), "orders".to_string())];
        assert_eq!(orders.up, 1);
        assert_eq!(orders.down, 1);
        assert_eq!(orders.cluster_state_ok, None);
        assert!(!orders.is_healthy());

        let catalog = &snapshot[&("prod".to_string(), "catalog".to_string())];
        assert_eq!(catalog.up, 1);
        assert_eq!(catalog.cluster_state_ok, Some(false));
        assert!(!catalog.is_healthy());
    }

    #[test]
    fn test_cache_replace_and_clear() {
        let cache = SignalCache::new();
        assert!(cache.get("prod", "orders").is_none());

        cache.replace(parse_exposition(BODY).unwrap());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("prod", "orders").unwrap().down, 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_summary() {
        let signal = HealthSignal {
            up: 3,
            down: 0,
            cluster_state_ok: Some(true),
        };
        assert!(signal.is_healthy());
        assert_eq!(signal.summary(), "3 up, 0 down, cluster_state ok");
    }
}
