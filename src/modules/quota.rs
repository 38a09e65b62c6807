//! Quota response parsing and the read-mostly per-token quota cache.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::time::{Duration, Instant};

// ─── Upstream quota response ────────────────────────────────────────────────
//
// The endpoint reports amounts as decimal strings:
// {"current": {"current": {"amount": "123.0"}, "maximum": {"amount": "500.0"}},
//  "until": "2025-12-01T00:00:00Z"}

#[derive(Debug, Deserialize, Default)]
pub struct QuotaResponse {
    #[serde(default)]
    pub current: Option<QuotaWindow>,
    #[serde(default)]
    pub until: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct QuotaWindow {
    #[serde(default)]
    pub current: Option<QuotaAmount>,
    #[serde(default)]
    pub maximum: Option<QuotaAmount>,
}

#[derive(Debug, Deserialize, Default)]
pub struct QuotaAmount {
    #[serde(default)]
    pub amount: String,
}

/// Normalized view used by the account pool and the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaUsage {
    pub used: f64,
    pub total: f64,
    pub until: Option<i64>,
}

impl QuotaUsage {
    pub fn has_quota(&self) -> bool {
        self.used < self.total
    }

    pub fn usage_rate(&self) -> f64 {
        if self.total > 0.0 {
            self.used / self.total * 100.0
        } else {
            0.0
        }
    }
}

pub fn parse_quota(resp: &QuotaResponse) -> QuotaUsage {
    let window = resp.current.as_ref();
    let used = window
        .and_then(|w| w.current.as_ref())
        .and_then(|a| a.amount.parse::<f64>().ok())
        .unwrap_or(0.0);
    let mut total = window
        .and_then(|w| w.maximum.as_ref())
        .and_then(|a| a.amount.parse::<f64>().ok())
        .unwrap_or(0.0);
    if total == 0.0 {
        total = 1.0; // Avoid division by zero; also means "used 0 of 1" ⇒ has quota.
    }

    let until = resp.until.as_deref().and_then(parse_until);

    QuotaUsage { used, total, until }
}

fn parse_until(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}

// ─── Per-token quota cache ──────────────────────────────────────────────────

/// Read-mostly map from access token to the last observed quota usage.
/// Invalidated on 401 so a re-minted token starts from a clean probe.
pub struct QuotaCache {
    entries: DashMap<String, (QuotaUsage, Instant)>,
    ttl: Duration,
}

impl QuotaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, token: &str) -> Option<QuotaUsage> {
        let entry = self.entries.get(token)?;
        let (usage, at) = *entry;
        if at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(token);
            return None;
        }
        Some(usage)
    }

    pub fn put(&self, token: &str, usage: QuotaUsage) {
        self.entries.insert(token.to_string(), (usage, Instant::now()));
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.remove(token);
    }
}

impl Default for QuotaCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(
            crate::constants::QUOTA_CHECK_INTERVAL_SECS as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quota_amounts() {
        let resp: QuotaResponse = serde_json::from_value(serde_json::json!({
            "current": {
                "current": {"amount": "123.5"},
                "maximum": {"amount": "500"}
            },
            "until": "2025-12-01T00:00:00Z"
        }))
        .unwrap();
        let usage = parse_quota(&resp);
        assert_eq!(usage.used, 123.5);
        assert_eq!(usage.total, 500.0);
        assert!(usage.has_quota());
        assert!(usage.until.is_some());
    }

    #[test]
    fn test_exhausted_quota() {
        let resp: QuotaResponse = serde_json::from_value(serde_json::json!({
            "current": {
                "current": {"amount": "500"},
                "maximum": {"amount": "500"}
            }
        }))
        .unwrap();
        let usage = parse_quota(&resp);
        assert!(!usage.has_quota());
        assert_eq!(usage.usage_rate(), 100.0);
    }

    #[test]
    fn test_zero_or_missing_maximum_defaults_to_one() {
        let resp: QuotaResponse = serde_json::from_value(serde_json::json!({
            "current": {"current": {"amount": "0"}}
        }))
        .unwrap();
        let usage = parse_quota(&resp);
        assert_eq!(usage.total, 1.0);
        assert!(usage.has_quota());
    }

    #[test]
    fn test_garbage_amounts_parse_to_zero() {
        let resp: QuotaResponse = serde_json::from_value(serde_json::json!({
            "current": {
                "current": {"amount": "not-a-number"},
                "maximum": {"amount": ""}
            },
            "until": "not-a-date"
        }))
        .unwrap();
        let usage = parse_quota(&resp);
        assert_eq!(usage.used, 0.0);
        assert_eq!(usage.total, 1.0);
        assert!(usage.until.is_none());
    }

    #[test]
    fn test_quota_cache_roundtrip_and_invalidate() {
        let cache = QuotaCache::new(Duration::from_secs(60));
        let usage = QuotaUsage {
            used: 1.0,
            total: 2.0,
            until: None,
        };
        cache.put("tok", usage);
        assert_eq!(cache.get("tok"), Some(usage));
        cache.invalidate("tok");
        assert!(cache.get("tok").is_none());
    }

    #[test]
    fn test_quota_cache_expiry() {
        let cache = QuotaCache::new(Duration::from_millis(0));
        cache.put(
            "tok",
            QuotaUsage {
                used: 0.0,
                total: 1.0,
                until: None,
            },
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("tok").is_none());
    }
}
