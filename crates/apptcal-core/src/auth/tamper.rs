//! Structural checks on stored credentials before they are trusted.
//!
//! This is not a security boundary: anyone with access to local storage can
//! fabricate a record that passes. It exists to fail fast on corrupted or
//! hand-edited storage and to leave an audit trail.

use serde_json::Value;

use super::audit::{SecurityEvent, SecurityLog};
use crate::models::Role;

/// Fields a stored user record must carry with a non-empty value
pub const REQUIRED_USER_FIELDS: [&str; 4] = ["id", "username", "email", "role"];

#[derive(Debug, Clone, Default)]
pub struct TamperChecker {
    admin_email_domain: Option<String>,
}

impl TamperChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reject admin records whose email is outside `domain`.
    pub fn with_admin_email_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        let domain = domain.trim().trim_start_matches('@').to_lowercase();
        self.admin_email_domain = (!domain.is_empty()).then_some(domain);
        self
    }

    /// Run the checks in order, stopping at the first failure. Each failure
    /// is recorded in `log` before returning `false`.
    pub fn check(&self, token: &str, user_json: &str, log: &SecurityLog) -> bool {
        match self.first_failure(token, user_json) {
            None => true,
            Some(reason) => {
                log.record(SecurityEvent::TamperCheckFailed { reason });
                false
            }
        }
    }

    fn first_failure(&self, token: &str, user_json: &str) -> Option<String> {
        if token.is_empty() {
            return Some("empty token".to_string());
        }

        let record = match serde_json::from_str::<Value>(user_json) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Some("user data is not an object".to_string()),
            Err(e) => return Some(format!("invalid user data format: {}", e)),
        };

        for field in REQUIRED_USER_FIELDS {
            if !record.get(field).is_some_and(is_truthy) {
                return Some(format!("missing user field: {}", field));
            }
        }

        if let Some(ref domain) = self.admin_email_domain {
            let is_admin = record
                .get("role")
                .and_then(Value::as_str)
                .and_then(|r| r.parse::<Role>().ok())
                == Some(Role::Admin);
            let email = record
                .get("email")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            if is_admin && !email.ends_with(&format!("@{}", domain)) {
                return Some("suspicious admin account".to_string());
            }
        }

        None
    }
}

/// Loose truthiness: null, false, zero and empty strings count as missing.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_USER: &str =
        r#"{"id":"1","username":"john_tech","email":"tech@example.com","role":"technician"}"#;

    fn reason_of(log: &SecurityLog) -> String {
        match log.last() {
            Some(SecurityEvent::TamperCheckFailed { reason }) => reason,
            other => panic!("expected tamper event, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_valid_record() {
        let log = SecurityLog::new();
        assert!(TamperChecker::new().check("tkn-1", VALID_USER, &log));
        assert!(log.is_empty());
    }

    #[test]
    fn test_accepts_any_non_empty_token() {
        let log = SecurityLog::new();
        assert!(TamperChecker::new().check("eyJhbGciOiJIUzI1NiJ9.x.y", VALID_USER, &log));
        assert!(TamperChecker::new().check("mock_token_1_1700000000000", VALID_USER, &log));
    }

    #[test]
    fn test_rejects_empty_token() {
        let log = SecurityLog::new();
        assert!(!TamperChecker::new().check("", VALID_USER, &log));
        assert_eq!(reason_of(&log), "empty token");
    }

    #[test]
    fn test_whitespace_token_is_not_empty() {
        let log = SecurityLog::new();
        assert!(TamperChecker::new().check("  ", VALID_USER, &log));
        assert!(log.is_empty());
    }

    #[test]
    fn test_rejects_missing_role() {
        let log = SecurityLog::new();
        let user = r#"{"id":"1","username":"john_tech","email":"tech@example.com"}"#;
        assert!(!TamperChecker::new().check("tkn-1", user, &log));
        assert_eq!(reason_of(&log), "missing user field: role");
    }

    #[test]
    fn test_rejects_empty_field_values() {
        let log = SecurityLog::new();
        let user = r#"{"id":"1","username":"","email":"tech@example.com","role":"technician"}"#;
        assert!(!TamperChecker::new().check("tkn-1", user, &log));
        assert_eq!(reason_of(&log), "missing user field: username");

        let user = r#"{"id":null,"username":"x","email":"tech@example.com","role":"technician"}"#;
        assert!(!TamperChecker::new().check("tkn-1", user, &log));
        assert_eq!(reason_of(&log), "missing user field: id");
    }

    #[test]
    fn test_rejects_unparseable_json() {
        let log = SecurityLog::new();
        assert!(!TamperChecker::new().check("tkn-1", "{not json", &log));
        assert!(reason_of(&log).starts_with("invalid user data format"));

        assert!(!TamperChecker::new().check("tkn-1", "[1,2]", &log));
        assert_eq!(reason_of(&log), "user data is not an object");
    }

    #[test]
    fn test_stops_at_first_failure() {
        let log = SecurityLog::new();
        assert!(!TamperChecker::new().check("", "{not json", &log));
        assert_eq!(log.len(), 1);
        assert_eq!(reason_of(&log), "empty token");
    }

    #[test]
    fn test_admin_domain_check_is_opt_in() {
        let log = SecurityLog::new();
        let admin = r#"{"id":"9","username":"root","email":"root@evil.com","role":"admin"}"#;
        assert!(TamperChecker::new().check("tkn-1", admin, &log));

        let strict = TamperChecker::new().with_admin_email_domain("@clinic.com");
        assert!(!strict.check("tkn-1", admin, &log));
        assert_eq!(reason_of(&log), "suspicious admin account");

        let legit = r#"{"id":"2","username":"admin_user","email":"admin@clinic.com","role":"admin"}"#;
        assert!(strict.check("tkn-1", legit, &log));
        assert!(strict.check("tkn-1", VALID_USER, &log));
    }
}
