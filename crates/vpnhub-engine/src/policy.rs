//! Quota and expiry policy.
//!
//! The policy engine is pure: it looks at accounts and returns the status
//! transitions they are due. Persisting a decision and terminating the
//! account's sessions is the pass's job.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use vpnhub_entity::account::{Account, AccountStatus};

/// Naive expiry layouts, tried in order after RFC 3339.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Which checks a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Expiry, then quota.
    Full,
    /// Expiry only (periodic sweep).
    ExpiryOnly,
}

/// Why an account is being cut off.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyReason {
    /// `expire_at` is in the past.
    Expired {
        /// Parsed expiry instant.
        expire_at: DateTime<Utc>,
    },
    /// Lifetime usage reached the quota.
    QuotaExhausted {
        /// Upload plus download in bytes.
        used_bytes: u64,
        /// Quota in bytes.
        quota_bytes: f64,
    },
}

/// A status transition an account is due.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Account as read in the enforcing transaction.
    pub account: Account,
    /// Target status.
    pub new_status: AccountStatus,
    /// Cause.
    pub reason: PolicyReason,
}

/// Evaluates accounts against quota and expiry.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    offset: FixedOffset,
}

impl PolicyEngine {
    /// Create an engine interpreting naive expiry values in `offset`.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Evaluate every active account.
    pub fn evaluate_all(
        &self,
        accounts: &[Account],
        mode: PolicyMode,
        now: DateTime<Utc>,
    ) -> Vec<PolicyDecision> {
        accounts
            .iter()
            .filter_map(|account| self.evaluate(account, mode, now))
            .collect()
    }

    /// Evaluate one account; at most one decision per account.
    pub fn evaluate(
        &self,
        account: &Account,
        mode: PolicyMode,
        now: DateTime<Utc>,
    ) -> Option<PolicyDecision> {
        if account.status != AccountStatus::Active {
            return None;
        }

        if let Some(expire_at) = self.expiry_of(account) {
            if expire_at <= now {
                return Some(PolicyDecision {
                    account: account.clone(),
                    new_status: AccountStatus::Expired,
                    reason: PolicyReason::Expired { expire_at },
                });
            }
        }

        if mode == PolicyMode::Full && account.quota_exhausted() {
            return Some(PolicyDecision {
                account: account.clone(),
                new_status: AccountStatus::Suspended,
                reason: PolicyReason::QuotaExhausted {
                    used_bytes: account.usage_bytes(),
                    quota_bytes: account.quota_bytes().unwrap_or_default(),
                },
            });
        }

        None
    }

    fn expiry_of(&self, account: &Account) -> Option<DateTime<Utc>> {
        let raw = account.expire_at.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = parse_expiry(raw, self.offset);
        if parsed.is_none() {
            warn!(
                account_id = %account.id,
                username = %account.username,
                expire_at = raw,
                "Unparsable expiry, treating account as not expired"
            );
        }
        parsed
    }
}

/// Parse an expiry value.
///
/// RFC 3339 values carry their own offset; naive date-times and bare dates
/// (start of day) are read in `offset`.
pub fn parse_expiry(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use vpnhub_entity::account::NewAccount;

    use super::*;

    const GB: i64 = 1024 * 1024 * 1024;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_expiry_formats() {
        let plus3 = FixedOffset::east_opt(3 * 3600).unwrap();
        assert_eq!(
            parse_expiry("2025-01-02T03:04:05+01:00", plus3),
            Some(at("2025-01-02T02:04:05Z"))
        );
        assert_eq!(
            parse_expiry("2025-01-02 03:04:05", plus3),
            Some(at("2025-01-02T00:04:05Z"))
        );
        assert_eq!(
            parse_expiry("2025-01-02T03:04:05", utc()),
            Some(at("2025-01-02T03:04:05Z"))
        );
        assert_eq!(
            parse_expiry("2025-01-02", utc()),
            Some(at("2025-01-02T00:00:00Z"))
        );
        assert_eq!(parse_expiry("next tuesday", utc()), None);
    }

    #[test]
    fn test_past_expiry_expires() {
        let engine = PolicyEngine::new(utc());
        let account = NewAccount::new("alice")
            .with_expiry("2020-01-01 00:00:00")
            .into_account(Utc::now());
        let decision = engine
            .evaluate(&account, PolicyMode::ExpiryOnly, Utc::now())
            .unwrap();
        assert_eq!(decision.new_status, AccountStatus::Expired);
    }

    #[test]
    fn test_expiry_checked_before_quota() {
        let engine = PolicyEngine::new(utc());
        let account = NewAccount::new("bob")
            .with_expiry("2020-01-01")
            .with_quota_gb(1.0)
            .with_usage(2 * GB, 0)
            .into_account(Utc::now());
        let decision = engine
            .evaluate(&account, PolicyMode::Full, Utc::now())
            .unwrap();
        assert_eq!(decision.new_status, AccountStatus::Expired);
    }

    #[test]
    fn test_quota_only_in_full_mode() {
        let engine = PolicyEngine::new(utc());
        let account = NewAccount::new("carol")
            .with_quota_gb(10.0)
            .with_usage(6 * GB, 5 * GB)
            .into_account(Utc::now());

        assert!(
            engine
                .evaluate(&account, PolicyMode::ExpiryOnly, Utc::now())
                .is_none()
        );
        let decision = engine
            .evaluate(&account, PolicyMode::Full, Utc::now())
            .unwrap();
        assert_eq!(decision.new_status, AccountStatus::Suspended);
    }

    #[test]
    fn test_unparsable_expiry_is_not_expired() {
        let engine = PolicyEngine::new(utc());
        let account = NewAccount::new("dave")
            .with_expiry("soon")
            .into_account(Utc::now());
        assert!(
            engine
                .evaluate(&account, PolicyMode::Full, Utc::now())
                .is_none()
        );
    }

    #[test]
    fn test_inactive_accounts_are_skipped() {
        let engine = PolicyEngine::new(utc());
        let mut account = NewAccount::new("erin")
            .with_expiry("2020-01-01")
            .into_account(Utc::now());
        account.status = AccountStatus::Suspended;
        assert!(
            engine
                .evaluate_all(&[account], PolicyMode::Full, Utc::now())
                .is_empty()
        );
    }

    #[test]
    fn test_future_expiry_and_unlimited_quota() {
        let engine = PolicyEngine::new(utc());
        let account = NewAccount::new("frank")
            .with_expiry("2999-12-31")
            .with_usage(100 * GB, 100 * GB)
            .into_account(Utc::now());
        assert!(
            engine
                .evaluate(&account, PolicyMode::Full, Utc::now())
                .is_none()
        );
    }
}
