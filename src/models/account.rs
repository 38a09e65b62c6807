use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::JWT_REFRESH_WINDOW_SECS;
use crate::modules::jwt;

/// One upstream-billed principal.
///
/// Accounts are built once at startup from the environment and only ever
/// mutated by the `AccountPool` (token refresh, quota marking). Everything
/// else treats them as read-only snapshots.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct GrazieAccount {
    /// License id paired with `authorization`; together they can mint a JWT.
    pub license_id: Option<String>,
    /// Long-lived authorization secret (`Bearer` on the refresh endpoint).
    pub authorization: Option<String>,
    /// Short-lived access token presented on every upstream call. May start
    /// empty (license accounts) or pre-minted (static JWT accounts).
    pub jwt: String,
    /// Parsed `exp` claim of `jwt`, seconds since epoch. `None` when the
    /// token is absent or unparseable (treated as "refresh proactively").
    #[zeroize(skip)]
    pub jwt_expiry: Option<i64>,
    #[zeroize(skip)]
    pub has_quota: bool,
    /// Unix timestamp of the last quota probe, 0 = never.
    #[zeroize(skip)]
    pub last_quota_check: i64,
    /// Unix timestamp of the last successful token refresh, 0 = never.
    #[zeroize(skip)]
    pub last_refreshed: i64,
    /// License expiry reported by the quota endpoint (`until`), if any.
    #[zeroize(skip)]
    pub license_until: Option<i64>,
}

impl GrazieAccount {
    pub fn from_license(license_id: String, authorization: String) -> Self {
        Self {
            license_id: Some(license_id),
            authorization: Some(authorization),
            jwt: String::new(),
            jwt_expiry: None,
            has_quota: true,
            last_quota_check: 0,
            last_refreshed: 0,
            license_until: None,
        }
    }

    /// Account backed by a pre-minted token. It can never refresh, so a 401
    /// against it is terminal for the call.
    pub fn from_static_jwt(jwt: String) -> Self {
        let jwt_expiry = jwt::token_expiry(&jwt);
        Self {
            license_id: None,
            authorization: None,
            jwt,
            jwt_expiry,
            has_quota: true,
            last_quota_check: 0,
            last_refreshed: 0,
            license_until: None,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.license_id.is_some() && self.authorization.is_some()
    }

    /// Token is missing, unparseable, or expires inside the refresh window.
    pub fn needs_refresh(&self, now: i64) -> bool {
        if !self.can_refresh() {
            return false;
        }
        if self.jwt.is_empty() {
            return true;
        }
        match self.jwt_expiry {
            Some(exp) => exp - now < JWT_REFRESH_WINDOW_SECS,
            None => true,
        }
    }

    pub fn quota_stale(&self, now: i64) -> bool {
        now - self.last_quota_check > crate::constants::QUOTA_CHECK_INTERVAL_SECS
    }

    /// Short identifier safe for logs and the stats endpoint.
    pub fn display_name(&self) -> String {
        if self.jwt.len() > 10 {
            return format!("Token ...{}", &self.jwt[self.jwt.len() - 6..]);
        }
        if let Some(license) = &self.license_id {
            if license.len() > 10 {
                return format!("Token ...{}", &license[license.len() - 6..]);
            }
        }
        "Token Unknown".to_string()
    }

    /// Masked authorization secret (`abc*xyz`) for the stats endpoint.
    pub fn license_display(&self) -> String {
        match &self.authorization {
            Some(auth) if auth.len() > 20 => {
                format!("{}*{}", &auth[..3], &auth[auth.len() - 3..])
            }
            _ => "Unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_jwt_account_never_refreshes() {
        let acc = GrazieAccount::from_static_jwt("aaaa.bbbb.cccc".to_string());
        assert!(!acc.can_refresh());
        assert!(!acc.needs_refresh(0));
    }

    #[test]
    fn test_license_account_refreshes_when_empty() {
        let acc = GrazieAccount::from_license("lic-1".into(), "auth-1".into());
        assert!(acc.can_refresh());
        assert!(acc.needs_refresh(1_700_000_000));
    }

    #[test]
    fn test_refresh_window() {
        let mut acc = GrazieAccount::from_license("lic-1".into(), "auth-1".into());
        acc.jwt = "x".repeat(16);
        let now = 1_700_000_000;
        acc.jwt_expiry = Some(now + JWT_REFRESH_WINDOW_SECS + 60);
        assert!(!acc.needs_refresh(now));
        acc.jwt_expiry = Some(now + JWT_REFRESH_WINDOW_SECS - 60);
        assert!(acc.needs_refresh(now));
        // Unparseable token ⇒ refresh proactively.
        acc.jwt_expiry = None;
        assert!(acc.needs_refresh(now));
    }

    #[test]
    fn test_display_name_masks_token() {
        let mut acc = GrazieAccount::from_static_jwt("header.payload.signature".to_string());
        assert_eq!(acc.display_name(), "Token ...nature");
        acc.jwt.clear();
        acc.license_id = Some("license-12345678".to_string());
        assert_eq!(acc.display_name(), "Token ...345678");
        acc.license_id = Some("short".to_string());
        assert_eq!(acc.display_name(), "Token Unknown");
    }

    #[test]
    fn test_license_display_masking() {
        let mut acc =
            GrazieAccount::from_license("lic".into(), "abcdefghijklmnopqrstuvwxyz".into());
        assert_eq!(acc.license_display(), "abc*xyz");
        acc.authorization = Some("tiny".into());
        assert_eq!(acc.license_display(), "Unknown");
    }
}
