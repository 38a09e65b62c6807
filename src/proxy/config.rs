//! 环境变量配置加载
//!
//! Client keys and upstream accounts come from the environment. The three
//! account lists pair positionally and tolerate empty slots, so operators
//! can mix license accounts and static-JWT accounts in one deployment.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::models::GrazieAccount;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub client_keys: HashSet<String>,
    pub upstream_base: String,
    pub models_path: PathBuf,
    pub stats_path: PathBuf,
    pub redis_url: Option<String>,
    /// Rewrites the last user message with a tool-usage preamble when tools
    /// are present. A workaround, not a contract; off by default.
    pub force_tool_prompt: bool,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        let client_keys: HashSet<String> = parse_env_list(&env_var("CLIENT_API_KEYS"))
            .into_iter()
            .filter(|k| !k.is_empty())
            .collect();
        if client_keys.is_empty() {
            warn!("CLIENT_API_KEYS environment variable is empty");
        } else {
            info!("Loaded {} client API key(s) from environment", client_keys.len());
        }

        let port = env_var("PORT").parse::<u16>().unwrap_or(8080);

        Self {
            port,
            client_keys,
            upstream_base: std::env::var("GRAZIE_API_BASE")
                .unwrap_or_else(|_| crate::constants::GRAZIE_API_BASE.to_string()),
            models_path: std::env::var("MODELS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models.json")),
            stats_path: std::env::var("STATS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("stats.json")),
            redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            force_tool_prompt: is_truthy(&env_var("FORCE_TOOL_PROMPT")),
        }
    }

    /// Build accounts from the three positionally-paired env lists.
    pub fn load_accounts_from_env() -> Vec<GrazieAccount> {
        load_accounts(
            &env_var("JETBRAINS_LICENSE_IDS"),
            &env_var("JETBRAINS_AUTHORIZATIONS"),
            &env_var("JETBRAINS_JWTS"),
        )
    }
}

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Split a comma-separated list, trimming entries but keeping empty slots so
/// positional pairing lines up.
pub fn parse_env_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

pub fn load_accounts(licenses: &str, authorizations: &str, jwts: &str) -> Vec<GrazieAccount> {
    let mut license_ids = parse_env_list(licenses);
    let mut auths = parse_env_list(authorizations);
    let mut static_jwts = parse_env_list(jwts);

    let max_len = license_ids.len().max(auths.len()).max(static_jwts.len());
    license_ids.resize(max_len, String::new());
    auths.resize(max_len, String::new());
    static_jwts.resize(max_len, String::new());

    let mut accounts = Vec::new();
    for i in 0..max_len {
        if !license_ids[i].is_empty() && !auths[i].is_empty() {
            let mut account =
                GrazieAccount::from_license(license_ids[i].clone(), auths[i].clone());
            if !static_jwts[i].is_empty() {
                // Pre-minted token to start from; still refreshable.
                account.jwt = static_jwts[i].clone();
                account.jwt_expiry = crate::modules::jwt::token_expiry(&account.jwt);
            }
            accounts.push(account);
        } else if !static_jwts[i].is_empty() {
            accounts.push(GrazieAccount::from_static_jwt(static_jwts[i].clone()));
        }
    }

    if accounts.is_empty() {
        warn!("No valid JetBrains accounts found in environment variables");
    } else {
        info!("Loaded {} JetBrains AI account(s) from environment", accounts.len());
    }
    accounts
}
