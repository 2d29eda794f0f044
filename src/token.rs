// src/token.rs
//! Best-effort inspection of stored credentials.
//!
//! The companion's credential JSON has no published schema, so it is read as
//! an untyped tree. Fields are looked up at the top level first and then one
//! level down inside a few known container objects; the first match in that
//! order wins.

use crate::config::Paths;
use crate::credentials::{CREDENTIALS_FILE, HOME_CREDENTIAL_FILES, HOME_PREFIX};
use crate::fsutil;
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

const CONTAINER_KEYS: &[&str] = &[
    "claudeAiOauth",
    "oauth",
    "credentials",
    "account",
    "oauthAccount",
];
const EMAIL_KEYS: &[&str] = &["email", "userEmail", "user_email", "emailAddress"];
const EXPIRY_KEYS: &[&str] = &["expiresAt", "expires_at", "exp"];

const DETAIL_KEYS: &[&str] = &["plan", "org_name", "orgName", "model"];

/// Numeric expiries above this are milliseconds, below it seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenStatus {
    pub profile_name: String,
    pub has_credentials: bool,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub expires_in: Option<String>,
}

impl TokenStatus {
    fn missing(profile_name: &str) -> Self {
        TokenStatus {
            profile_name: profile_name.to_string(),
            has_credentials: false,
            email: None,
            expires_at: None,
            is_expired: false,
            expires_in: None,
        }
    }
}

fn sources(root: &Value) -> Vec<&Map<String, Value>> {
    let Some(top) = root.as_object() else {
        return Vec::new();
    };
    std::iter::once(top)
        .chain(
            CONTAINER_KEYS
                .iter()
                .filter_map(|key| top.get(*key).and_then(Value::as_object)),
        )
        .collect()
}

pub fn find_email(root: &Value) -> Option<String> {
    sources(root).into_iter().find_map(|src| {
        EMAIL_KEYS
            .iter()
            .filter_map(|key| src.get(*key).and_then(Value::as_str))
            .find(|email| !email.is_empty())
            .map(str::to_string)
    })
}

pub fn find_expiry(root: &Value) -> Option<DateTime<Utc>> {
    sources(root).into_iter().find_map(|src| {
        EXPIRY_KEYS
            .iter()
            .filter_map(|key| src.get(*key))
            .find_map(parse_expiry)
    })
}

fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw > MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(raw as i64).single()
            } else {
                Utc.timestamp_opt(raw as i64, 0).single()
            }
        }
        _ => None,
    }
}

/// Top-level plan, organisation and model fields, in a fixed order.
pub fn account_details(root: &Value) -> Vec<(String, String)> {
    let Some(top) = root.as_object() else {
        return Vec::new();
    };
    DETAIL_KEYS
        .iter()
        .filter_map(|key| {
            let value = match top.get(*key)? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

/// "3d 4h", "5h 12m" or "42m".
pub fn format_remaining(d: Duration) -> String {
    if d < Duration::zero() {
        return "expired".to_string();
    }
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Status of credentials already read into memory.
pub fn inspect_credentials(profile_name: &str, data: &[u8], now: DateTime<Utc>) -> TokenStatus {
    let mut status = TokenStatus {
        has_credentials: true,
        ..TokenStatus::missing(profile_name)
    };

    let root: Value = match serde_json::from_slice(data) {
        Ok(root) => root,
        Err(e) => {
            debug!("Credentials for {:?} are not JSON: {}", profile_name, e);
            return status;
        }
    };

    status.email = find_email(&root);
    if let Some(expires_at) = find_expiry(&root) {
        status.is_expired = now > expires_at;
        if !status.is_expired {
            status.expires_in = Some(format_remaining(expires_at - now));
        }
        status.expires_at = Some(expires_at);
    }
    status
}

pub fn check_status(paths: &Paths, profile_name: &str) -> TokenStatus {
    check_status_at(paths, profile_name, Utc::now())
}

/// Status of a stored profile's credentials. A profile without a credentials
/// file is a valid "no credentials" state, not an error.
pub fn check_status_at(paths: &Paths, profile_name: &str, now: DateTime<Utc>) -> TokenStatus {
    let cred_path = paths.profile_dir(profile_name).join(CREDENTIALS_FILE);
    if !fsutil::file_exists(&cred_path) {
        return TokenStatus::missing(profile_name);
    }
    match fs::read(&cred_path) {
        Ok(data) => inspect_credentials(profile_name, &data, now),
        Err(e) => {
            debug!("Cannot read {:?}: {}", cred_path, e);
            TokenStatus {
                has_credentials: true,
                ..TokenStatus::missing(profile_name)
            }
        }
    }
}

pub fn needs_refresh(status: &TokenStatus, threshold: Duration) -> bool {
    needs_refresh_at(status, threshold, Utc::now())
}

/// Unknown expiry counts as "no refresh needed".
pub fn needs_refresh_at(status: &TokenStatus, threshold: Duration, now: DateTime<Utc>) -> bool {
    if !status.has_credentials || status.is_expired {
        return true;
    }
    match status.expires_at {
        Some(expires_at) => expires_at - now < threshold,
        None => false,
    }
}

/// Email of a stored profile: the credentials file first, then the stored
/// home-scoped account file.
pub fn email_from_profile_dir(dir: &Path) -> Option<String> {
    std::iter::once(CREDENTIALS_FILE.to_string())
        .chain(
            HOME_CREDENTIAL_FILES
                .iter()
                .map(|f| format!("{}{}", HOME_PREFIX, f)),
        )
        .find_map(|name| {
            let data = fs::read(dir.join(name)).ok()?;
            let root: Value = serde_json::from_slice(&data).ok()?;
            find_email(&root)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHome;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn inspect(value: Value) -> TokenStatus {
        inspect_credentials("p", value.to_string().as_bytes(), now())
    }

    #[test]
    fn test_expired_rfc3339() {
        let expires = (now() - Duration::hours(1)).to_rfc3339();
        let status = inspect(json!({ "expiresAt": expires }));
        assert!(status.has_credentials);
        assert!(status.is_expired);
        assert!(status.expires_in.is_none());
    }

    #[test]
    fn test_far_future_rfc3339() {
        let expires = (now() + Duration::hours(1000)).to_rfc3339();
        let status = inspect(json!({ "expiresAt": expires }));
        assert!(!status.is_expired);
        assert_eq!(status.expires_in.as_deref(), Some("41d 16h"));
    }

    #[test]
    fn test_numeric_seconds_and_millis() {
        let in_two_hours = now() + Duration::hours(2);

        let secs = inspect(json!({ "exp": in_two_hours.timestamp() }));
        assert_eq!(secs.expires_at, Some(in_two_hours));
        assert_eq!(secs.expires_in.as_deref(), Some("2h 0m"));

        let millis = inspect(json!({
            "claudeAiOauth": { "expiresAt": in_two_hours.timestamp_millis() }
        }));
        assert_eq!(millis.expires_at, Some(in_two_hours));
        assert!(!millis.is_expired);
    }

    #[test]
    fn test_top_level_wins_over_nested() {
        let status = inspect(json!({
            "oauth": { "email": "nested@example.com" },
            "userEmail": "top@example.com",
        }));
        assert_eq!(status.email.as_deref(), Some("top@example.com"));
    }

    #[test]
    fn test_nested_container_order() {
        let status = inspect(json!({
            "account": { "email": "account@example.com" },
            "claudeAiOauth": { "email": "oauth@example.com" },
        }));
        assert_eq!(status.email.as_deref(), Some("oauth@example.com"));

        let account_file = inspect(json!({
            "oauthAccount": { "emailAddress": "home@example.com" }
        }));
        assert_eq!(account_file.email.as_deref(), Some("home@example.com"));
    }

    #[test]
    fn test_unparseable_expiry_is_skipped() {
        let later = (now() + Duration::minutes(90)).to_rfc3339();
        let status = inspect(json!({ "expiresAt": "not a date", "expires_at": later }));
        assert_eq!(status.expires_in.as_deref(), Some("1h 30m"));
    }

    #[test]
    fn test_not_json_still_has_credentials() {
        let status = inspect_credentials("p", b"opaque-token", now());
        assert!(status.has_credentials);
        assert!(status.email.is_none());
        assert!(status.expires_at.is_none());
        assert!(!status.is_expired);
    }

    #[test]
    fn test_check_status_without_credentials() {
        let home = TestHome::empty();
        let status = check_status_at(&home.paths, "ghost", now());
        assert!(!status.has_credentials);
        assert_eq!(status.profile_name, "ghost");
    }

    #[test]
    fn test_check_status_reads_profile() {
        let home = TestHome::empty();
        let dir = home.paths.profile_dir("work");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(CREDENTIALS_FILE),
            json!({ "email": "w@example.com", "exp": (now() + Duration::days(3)).timestamp() })
                .to_string(),
        )
        .unwrap();

        let status = check_status_at(&home.paths, "work", now());
        assert!(status.has_credentials);
        assert_eq!(status.email.as_deref(), Some("w@example.com"));
        assert_eq!(status.expires_in.as_deref(), Some("3d 0h"));
    }

    #[test]
    fn test_needs_refresh() {
        let threshold = Duration::hours(1);
        let with_remaining = |d: Duration| {
            inspect(json!({ "expiresAt": (now() + d).to_rfc3339() }))
        };

        assert!(needs_refresh_at(&with_remaining(Duration::minutes(30)), threshold, now()));
        assert!(!needs_refresh_at(&with_remaining(Duration::hours(72)), threshold, now()));
        assert!(needs_refresh_at(&with_remaining(-Duration::minutes(5)), threshold, now()));
        assert!(needs_refresh_at(&TokenStatus::missing("p"), threshold, now()));
        // Credentials present but no expiry known.
        assert!(!needs_refresh_at(&inspect(json!({ "token": "x" })), threshold, now()));
    }

    #[test]
    fn test_account_details_in_fixed_order() {
        let details = account_details(&json!({
            "model": "opus",
            "plan": "max",
            "orgName": "Acme",
            "oauth": { "plan": "nested is ignored" },
        }));
        assert_eq!(
            details,
            [
                ("plan".to_string(), "max".to_string()),
                ("orgName".to_string(), "Acme".to_string()),
                ("model".to_string(), "opus".to_string()),
            ]
        );
        assert!(account_details(&json!(["not", "an", "object"])).is_empty());
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::minutes(42)), "42m");
        assert_eq!(format_remaining(Duration::minutes(5 * 60 + 12)), "5h 12m");
        assert_eq!(format_remaining(Duration::hours(76)), "3d 4h");
        assert_eq!(format_remaining(Duration::seconds(20)), "0m");
        assert_eq!(format_remaining(-Duration::seconds(1)), "expired");
    }

    #[test]
    fn test_email_from_profile_dir_falls_back_to_home_file() {
        let home = TestHome::empty();
        let dir = home.paths.profile_dir("p");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CREDENTIALS_FILE), r#"{"token":"t"}"#).unwrap();
        fs::write(
            dir.join("home_.claude.json"),
            r#"{"oauthAccount":{"emailAddress":"h@example.com"}}"#,
        )
        .unwrap();
        assert_eq!(email_from_profile_dir(&dir).as_deref(), Some("h@example.com"));
    }
}
