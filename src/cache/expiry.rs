//! Expiry Policy Module
//!
//! Reconciles an absolute expiry and a relative validity into one
//! consistent pair, bounded by the backend's maximum TTL.

use chrono::{DateTime, Duration, Utc};

use crate::config::MEMCACHED_MAX_TTL_SECS;
use crate::error::{CacheError, Result};

// == Expiry ==
/// A reconciled expiry: `expires_at == now + valid_for` at reconcile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub expires_at: DateTime<Utc>,
    pub valid_for: Duration,
}

impl Expiry {
    /// Relative TTL handed to the backend.
    ///
    /// Memcached's absolute-expiry path is not trusted by this layer, so
    /// writes always carry the relative validity. A zero validity would
    /// mean "never expires" to the backend and is raised to one second.
    pub fn backend_ttl(&self) -> std::time::Duration {
        self.valid_for
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(std::time::Duration::from_secs(1))
    }
}

// == Expiry Policy ==
#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    max_ttl: Duration,
}

impl ExpiryPolicy {
    /// `max_ttl` is capped at the backend's own maximum.
    pub fn new(max_ttl: std::time::Duration) -> Self {
        let max_ttl = max_ttl.min(std::time::Duration::from_secs(MEMCACHED_MAX_TTL_SECS));
        let max_ttl = Duration::from_std(max_ttl)
            .unwrap_or_else(|_| Duration::seconds(MEMCACHED_MAX_TTL_SECS as i64));
        Self { max_ttl }
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Applies [`reconcile`] with this policy's ceiling.
    pub fn reconcile(
        &self,
        expires_at: Option<DateTime<Utc>>,
        valid_for: Duration,
        now: DateTime<Utc>,
    ) -> Result<Expiry> {
        reconcile(expires_at, valid_for, self.max_ttl, now)
    }
}

/// Reconciles `expires_at` and `valid_for` at instant `now`.
///
/// 1. An unset `expires_at` becomes `now + max_ttl`.
/// 2. A zero `valid_for` becomes `max_ttl`.
/// 3. An `expires_at` before `now` or a negative `valid_for` is rejected.
/// 4. Both are clamped to `max_ttl`.
/// 5. The earlier of the two instants wins and the other field is
///    recomputed from it.
pub fn reconcile(
    expires_at: Option<DateTime<Utc>>,
    valid_for: Duration,
    max_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Expiry> {
    let ceiling = now.checked_add_signed(max_ttl).ok_or_else(|| {
        CacheError::ExpiryRejected(format!("maximum validity {max_ttl} is out of range"))
    })?;

    let mut expires_at = expires_at.unwrap_or(ceiling);
    let mut valid_for = if valid_for.is_zero() {
        max_ttl
    } else {
        valid_for
    };

    if expires_at < now {
        return Err(CacheError::ExpiryRejected(format!(
            "expiry {expires_at} is in the past"
        )));
    }
    if valid_for < Duration::zero() {
        return Err(CacheError::ExpiryRejected(format!(
            "validity {valid_for} is negative"
        )));
    }

    if expires_at > ceiling {
        tracing::warn!(%expires_at, %ceiling, "Cache validity reduced to the backend maximum");
        expires_at = ceiling;
    }
    if valid_for > max_ttl {
        tracing::warn!(%valid_for, %max_ttl, "Cache validity reduced to the backend maximum");
        valid_for = max_ttl;
    }

    if expires_at < now + valid_for {
        valid_for = expires_at - now;
    } else {
        expires_at = now + valid_for;
    }

    Ok(Expiry {
        expires_at,
        valid_for,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_caps_max_ttl_at_backend_maximum() {
        let policy = ExpiryPolicy::new(std::time::Duration::from_secs(u64::MAX));
        assert_eq!(
            policy.max_ttl(),
            Duration::seconds(MEMCACHED_MAX_TTL_SECS as i64)
        );
        assert!(policy.reconcile(None, Duration::zero(), Utc::now()).is_ok());
    }

    #[test]
    fn test_out_of_range_ceiling_is_rejected() {
        let result = reconcile(None, Duration::zero(), Duration::MAX, Utc::now());
        assert!(matches!(result, Err(CacheError::ExpiryRejected(_))));
    }

    fn max() -> Duration {
        Duration::days(30)
    }

    #[test]
    fn test_unset_expiry_and_zero_validity_take_the_maximum() {
        let now = Utc::now();
        let expiry = reconcile(None, Duration::zero(), max(), now).unwrap();
        assert_eq!(expiry.valid_for, max());
        assert_eq!(expiry.expires_at, now + max());
    }

    #[test]
    fn test_validity_only() {
        let now = Utc::now();
        let expiry = reconcile(None, Duration::seconds(60), max(), now).unwrap();
        assert_eq!(expiry.valid_for, Duration::seconds(60));
        assert_eq!(expiry.expires_at, now + Duration::seconds(60));
    }

    #[test]
    fn test_expiry_only() {
        let now = Utc::now();
        let at = now + Duration::hours(2);
        let expiry = reconcile(Some(at), Duration::zero(), max(), now).unwrap();
        assert_eq!(expiry.expires_at, at);
        assert_eq!(expiry.valid_for, Duration::hours(2));
    }

    #[test]
    fn test_earlier_of_the_two_wins() {
        let now = Utc::now();
        let at = now + Duration::hours(2);

        let shorter_validity = reconcile(Some(at), Duration::minutes(5), max(), now).unwrap();
        assert_eq!(shorter_validity.expires_at, now + Duration::minutes(5));

        let shorter_expiry = reconcile(Some(at), Duration::hours(5), max(), now).unwrap();
        assert_eq!(shorter_expiry.valid_for, Duration::hours(2));
    }

    #[test]
    fn test_past_expiry_rejected() {
        let now = Utc::now();
        let result = reconcile(Some(now - Duration::seconds(1)), Duration::zero(), max(), now);
        assert!(matches!(result, Err(CacheError::ExpiryRejected(_))));
    }

    #[test]
    fn test_negative_validity_rejected() {
        let now = Utc::now();
        let result = reconcile(None, Duration::seconds(-5), max(), now);
        assert!(matches!(result, Err(CacheError::ExpiryRejected(_))));
    }

    #[test]
    fn test_clamped_to_maximum() {
        let now = Utc::now();
        let expiry = reconcile(
            Some(now + Duration::days(400)),
            Duration::days(90),
            max(),
            now,
        )
        .unwrap();
        assert_eq!(expiry.valid_for, max());
        assert_eq!(expiry.expires_at, now + max());
    }

    #[test]
    fn test_expiry_equal_to_now_is_accepted() {
        let now = Utc::now();
        let expiry = reconcile(Some(now), Duration::zero(), max(), now).unwrap();
        assert_eq!(expiry.valid_for, Duration::zero());
        assert_eq!(expiry.backend_ttl(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let now = Utc::now();
        let first = reconcile(Some(now + Duration::hours(3)), Duration::hours(1), max(), now).unwrap();
        let second = reconcile(Some(first.expires_at), first.valid_for, max(), now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_backend_ttl_is_relative_validity() {
        let now = Utc::now();
        let policy = ExpiryPolicy::new(std::time::Duration::from_secs(3600));
        let expiry = policy.reconcile(None, Duration::seconds(90), now).unwrap();
        assert_eq!(expiry.backend_ttl(), std::time::Duration::from_secs(90));
        assert_eq!(policy.max_ttl(), Duration::hours(1));
    }
}
