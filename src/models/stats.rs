use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate request counters plus the trailing request history.
/// This is the exact shape persisted by `modules::storage`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestStats {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    /// Moving sum of wall time in milliseconds across all requests.
    pub total_response_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub request_history: VecDeque<RequestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Wall time in milliseconds.
    pub response_time: i64,
    pub model: String,
    pub account: String,
}

/// Windowed view over the request history (1 h / 24 h on the stats surface).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct PeriodStats {
    pub requests: i64,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "avgResponseTime")]
    pub avg_response_time: i64,
    pub qps: f64,
}

/// Per-account row on the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub name: String,
    pub license: String,
    pub used: f64,
    pub total: f64,
    pub usage_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: String,
    pub has_quota: bool,
}
