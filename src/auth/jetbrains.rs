//! Upstream credential endpoints: token minting and quota probing.

use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::{
    GRAZIE_AGENT_DESCRIPTOR, GRAZIE_JWT_HEADER, GRAZIE_USER_AGENT, JWT_REFRESH_PATH, QUOTA_PATH,
};
use crate::error::{AppError, AppResult};
use crate::modules::quota::{parse_quota, QuotaResponse, QuotaUsage};

#[derive(Debug, Deserialize)]
struct ProvideAccessResponse {
    #[serde(default)]
    state: String,
    #[serde(default)]
    token: String,
}

/// Thin client over the upstream auth/quota surface. Shares the tuned
/// connection pool with the chat dispatcher.
pub struct GrazieAuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl GrazieAuthClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Mint a fresh access token for a license account.
    ///
    /// Success is `{state:"PAID", token:"<jwt>"}`; anything else is a refresh
    /// failure surfaced to the pool, which moves on to the next account.
    pub async fn refresh_jwt(&self, license_id: &str, authorization: &str) -> AppResult<String> {
        info!("Refreshing JWT for licenseId {}...", license_id);

        let url = format!("{}{}", self.base_url, JWT_REFRESH_PATH);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::USER_AGENT, GRAZIE_USER_AGENT)
            .header("Accept-Charset", "UTF-8")
            .header("grazie-agent", GRAZIE_AGENT_DESCRIPTOR)
            .bearer_auth(authorization)
            .json(&serde_json::json!({ "licenseId": license_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Refresh(format!(
                "status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let data: ProvideAccessResponse = response.json().await?;
        if data.state == "PAID" && !data.token.is_empty() {
            info!("Successfully refreshed JWT for licenseId {}", license_id);
            Ok(data.token)
        } else {
            Err(AppError::Refresh(format!(
                "invalid response state {}",
                data.state
            )))
        }
    }

    /// One POST (zero-length body) to the quota endpoint.
    pub async fn fetch_quota(&self, jwt: &str) -> AppResult<QuotaUsage> {
        let url = format!("{}{}", self.base_url, QUOTA_PATH);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::USER_AGENT, GRAZIE_USER_AGENT)
            .header("Accept-Charset", "UTF-8")
            .header("grazie-agent", GRAZIE_AGENT_DESCRIPTOR)
            .header(GRAZIE_JWT_HEADER, jwt)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Unknown(format!(
                "quota check failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let data: QuotaResponse = response.json().await?;
        let usage = parse_quota(&data);
        debug!(
            "Quota probe: used={} total={} has_quota={}",
            usage.used,
            usage.total,
            usage.has_quota()
        );
        Ok(usage)
    }
}
