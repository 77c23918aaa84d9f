//! Security-event audit trail.
//!
//! Events are emitted on the `apptcal::security` tracing target and kept in
//! a bounded in-memory buffer so the UI (or a test) can inspect what the
//! session manager decided and why.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Number of events retained in memory
const MAX_RETAINED_EVENTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityEvent {
    /// A tamper check rejected the stored credential.
    TamperCheckFailed { reason: String },
    /// Stored credentials failed validation and were discarded.
    InvalidStoredAuth { has_token: bool, has_user: bool },
    /// The stored user record could not be parsed.
    StoredUserParseFailed { error: String },
    /// Background verification confirmed the restored session.
    RestoredAndVerified { user_id: String },
    /// The backend returned a different identity than the stored one.
    UserDataMismatch { stored_id: String, api_id: String },
    /// The backend rejected the stored token.
    TokenValidationFailed { message: String },
    /// Verification could not reach the backend; optimistic state kept.
    VerificationUnreachable { error: String },
}

impl SecurityEvent {
    /// True for events that indicate a rejected or suspicious credential.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            SecurityEvent::RestoredAndVerified { .. } | SecurityEvent::VerificationUnreachable { .. }
        )
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityEvent::TamperCheckFailed { reason } => {
                write!(f, "Potential tampering: {}", reason)
            }
            SecurityEvent::InvalidStoredAuth { has_token, has_user } => write!(
                f,
                "Invalid stored auth detected (token: {}, user: {})",
                has_token, has_user
            ),
            SecurityEvent::StoredUserParseFailed { error } => {
                write!(f, "Stored user parse failed: {}", error)
            }
            SecurityEvent::RestoredAndVerified { user_id } => {
                write!(f, "Auth restored and verified for user {}", user_id)
            }
            SecurityEvent::UserDataMismatch { stored_id, api_id } => write!(
                f,
                "User data mismatch detected (stored {}, backend {})",
                stored_id, api_id
            ),
            SecurityEvent::TokenValidationFailed { message } => {
                write!(f, "Token validation failed: {}", message)
            }
            SecurityEvent::VerificationUnreachable { error } => write!(
                f,
                "Auth verification network error, keeping optimistic auth: {}",
                error
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub event: SecurityEvent,
    pub at: DateTime<Utc>,
}

/// Cheap to clone; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SecurityLog {
    events: Arc<Mutex<VecDeque<RecordedEvent>>>,
}

impl SecurityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: SecurityEvent) {
        if event.is_rejection() {
            warn!(target: "apptcal::security", event = %event, "Security event");
        } else {
            info!(target: "apptcal::security", event = %event, "Security event");
        }

        let mut events = self.lock();
        if events.len() == MAX_RETAINED_EVENTS {
            events.pop_front();
        }
        events.push_back(RecordedEvent {
            event,
            at: Utc::now(),
        });
    }

    /// Events oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.lock().iter().map(|r| r.event.clone()).collect()
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<SecurityEvent> {
        self.lock().back().map(|r| r.event.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RecordedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_order() {
        let log = SecurityLog::new();
        log.record(SecurityEvent::TamperCheckFailed {
            reason: "missing role".to_string(),
        });
        log.record(SecurityEvent::RestoredAndVerified {
            user_id: "1".to_string(),
        });

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SecurityEvent::TamperCheckFailed { .. }));
        assert_eq!(
            log.last(),
            Some(SecurityEvent::RestoredAndVerified {
                user_id: "1".to_string()
            })
        );
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let log = SecurityLog::new();
        log.record(SecurityEvent::UserDataMismatch {
            stored_id: "1".to_string(),
            api_id: "2".to_string(),
        });

        let json = serde_json::to_value(&log.recorded()[0]).unwrap();
        assert_eq!(json["event"]["type"], "userDataMismatch");
        assert_eq!(json["event"]["stored_id"], "1");
        assert!(json["at"].is_string());
    }

    #[test]
    fn test_buffer_is_bounded() {
        let log = SecurityLog::new();
        for i in 0..(MAX_RETAINED_EVENTS + 5) {
            log.record(SecurityEvent::TokenValidationFailed {
                message: i.to_string(),
            });
        }
        assert_eq!(log.len(), MAX_RETAINED_EVENTS);
        assert_eq!(
            log.events()[0],
            SecurityEvent::TokenValidationFailed {
                message: "5".to_string()
            }
        );
    }

    #[test]
    fn test_clones_share_buffer() {
        let log = SecurityLog::new();
        let clone = log.clone();
        clone.record(SecurityEvent::VerificationUnreachable {
            error: "connection refused".to_string(),
        });
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_is_rejection() {
        assert!(SecurityEvent::UserDataMismatch {
            stored_id: "1".into(),
            api_id: "2".into()
        }
        .is_rejection());
        assert!(!SecurityEvent::VerificationUnreachable { error: "x".into() }.is_rejection());
    }
}
