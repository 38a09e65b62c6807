//! Sliding-window request metrics.
//!
//! One mutex over the aggregate counters and the trailing history; the
//! history is trimmed to the last 1000 records under the same lock.
//! Persistence works on a snapshot taken under the lock and written without
//! holding it (see `modules::storage`).

use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};

use crate::constants::STATS_HISTORY_LIMIT;
use crate::models::{PeriodStats, RequestRecord, RequestStats};

pub struct StatsRegistry {
    inner: Mutex<RequestStats>,
}

impl StatsRegistry {
    pub fn new(initial: RequestStats) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    /// Record one terminal outcome.
    pub fn record(&self, success: bool, response_time_ms: i64, model: &str, account: &str) {
        let mut stats = self.inner.lock().unwrap();
        stats.total_requests += 1;
        stats.total_response_time += response_time_ms;
        stats.last_request_time = Some(Utc::now());
        if success {
            stats.successful_requests += 1;
        } else {
            stats.failed_requests += 1;
        }

        stats.request_history.push_back(RequestRecord {
            timestamp: Utc::now(),
            success,
            response_time: response_time_ms,
            model: model.to_string(),
            account: account.to_string(),
        });
        while stats.request_history.len() > STATS_HISTORY_LIMIT {
            stats.request_history.pop_front();
        }
    }

    /// Requests / success rate / avg wall ms / QPS over the last `hours`.
    pub fn period(&self, hours: i64) -> PeriodStats {
        let stats = self.inner.lock().unwrap();
        let cutoff = Utc::now() - ChronoDuration::hours(hours);

        let mut requests = 0i64;
        let mut successful = 0i64;
        let mut response_time = 0i64;
        for record in &stats.request_history {
            if record.timestamp > cutoff {
                requests += 1;
                response_time += record.response_time;
                if record.success {
                    successful += 1;
                }
            }
        }

        let mut period = PeriodStats {
            requests,
            ..Default::default()
        };
        if requests > 0 {
            period.success_rate = successful as f64 / requests as f64 * 100.0;
            period.avg_response_time = response_time / requests;
            period.qps = requests as f64 / hours as f64 / 3600.0;
        }
        period
    }

    /// Requests per second over the trailing minute.
    pub fn current_qps(&self) -> f64 {
        let stats = self.inner.lock().unwrap();
        let cutoff = Utc::now() - ChronoDuration::minutes(1);
        let recent = stats
            .request_history
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .count();
        recent as f64 / 60.0
    }

    /// Clone of the full state for persistence. Taken under the lock; the
    /// write happens without it.
    pub fn snapshot(&self) -> RequestStats {
        self.inner.lock().unwrap().clone()
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new(RequestStats::default())
    }
}

/// Records exactly one terminal outcome per request, success only when the
/// pipeline says so. Dropping the guard unfinished (handler bail-out, client
/// disconnect mid-stream, upstream cut) records a failure.
pub struct StatsGuard {
    stats: std::sync::Arc<StatsRegistry>,
    model: String,
    account: String,
    start: std::time::Instant,
    done: bool,
}

impl StatsGuard {
    pub fn new(stats: std::sync::Arc<StatsRegistry>, model: &str, account: &str) -> Self {
        Self {
            stats,
            model: model.to_string(),
            account: account.to_string(),
            start: std::time::Instant::now(),
            done: false,
        }
    }

    pub fn set_account(&mut self, account: &str) {
        self.account = account.to_string();
    }

    pub fn succeed(&mut self) {
        if !self.done {
            self.done = true;
            let elapsed = self.start.elapsed().as_millis() as i64;
            self.stats.record(true, elapsed, &self.model, &self.account);
        }
    }

    pub fn fail(&mut self) {
        if !self.done {
            self.done = true;
            let elapsed = self.start.elapsed().as_millis() as i64;
            self.stats.record(false, elapsed, &self.model, &self.account);
        }
    }
}

impl Drop for StatsGuard {
    fn drop(&mut self) {
        self.fail();
    }
}
