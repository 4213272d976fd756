//! Expiry computation and background-refresh decisions.
//!
//! Providers can lie about TTLs: zero and absurdly large values are clamped
//! into `[dns_min, dns_max]`. Refreshes are planned only for subjects someone
//! looked at within the recency window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use freshet_core::{chrono_duration, CacheCategory, Timestamp, TtlConfig};

use crate::refresh::RevalidationTask;

fn add(now: Timestamp, duration: Duration) -> Timestamp {
    now.checked_add_signed(chrono_duration(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Computes expiry timestamps and plans revalidation.
#[derive(Debug, Clone, Default)]
pub struct FreshnessScheduler {
    ttl: TtlConfig,
}

impl FreshnessScheduler {
    pub fn new(ttl: TtlConfig) -> Self {
        Self { ttl }
    }

    pub fn ttl_config(&self) -> &TtlConfig {
        &self.ttl
    }

    /// Provider TTL (or the default) clamped into the configured bounds.
    pub fn clamp_ttl(&self, provider_ttl: Option<u32>) -> Duration {
        let requested = provider_ttl
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .unwrap_or(self.ttl.dns_default);
        requested.clamp(self.ttl.dns_min, self.ttl.dns_max)
    }

    pub fn compute_expiry(&self, now: Timestamp, provider_ttl: Option<u32>) -> Timestamp {
        add(now, self.clamp_ttl(provider_ttl))
    }

    /// Expiry for categories whose upstream gives no TTL hint.
    pub fn category_expiry(&self, now: Timestamp, category: CacheCategory) -> Timestamp {
        add(now, self.ttl.default_for(category))
    }

    /// Whether a subject last read at `last_accessed_at` is worth refreshing.
    ///
    /// Never-accessed subjects and those outside the recency window are not.
    /// An access time in the future counts as recent.
    pub fn should_schedule_refresh(
        &self,
        now: Timestamp,
        last_accessed_at: Option<Timestamp>,
    ) -> bool {
        let Some(last_accessed_at) = last_accessed_at else {
            return false;
        };
        let age = now.signed_duration_since(last_accessed_at);
        age <= chrono_duration(self.ttl.refresh_recency_window)
    }

    /// The earliest of several due times.
    pub fn earliest_due<I>(due_ats: I) -> Option<Timestamp>
    where
        I: IntoIterator<Item = Timestamp>,
    {
        due_ats.into_iter().min()
    }

    /// Build the revalidation task for a subject, if one should be enqueued.
    ///
    /// `due_ats` are the expiries of everything just written for the
    /// subject; the task is due at the earliest.
    pub fn plan<I>(
        &self,
        now: Timestamp,
        subject_key: impl Into<String>,
        category: CacheCategory,
        due_ats: I,
        last_accessed_at: Option<Timestamp>,
    ) -> Option<RevalidationTask>
    where
        I: IntoIterator<Item = Timestamp>,
    {
        if !self.should_schedule_refresh(now, last_accessed_at) {
            return None;
        }
        let due_at = Self::earliest_due(due_ats)?;
        Some(RevalidationTask {
            subject_key: subject_key.into(),
            category,
            due_at,
            last_accessed_at,
        })
    }

    /// When to re-check a certificate.
    ///
    /// Normally one recheck window from now. If the certificate expires
    /// within that window plus the pre-expiry buffer, recheck at
    /// `not_after - buffer` instead, but never sooner than the floor.
    pub fn certificate_recheck_at(&self, now: Timestamp, not_after: Option<Timestamp>) -> Timestamp {
        let regular = add(now, self.ttl.cert_recheck);
        let Some(not_after) = not_after else {
            return regular;
        };

        let accelerated = not_after
            .checked_sub_signed(chrono_duration(self.ttl.cert_expiry_buffer))
            .unwrap_or(now);
        if accelerated >= regular {
            return regular;
        }
        accelerated.max(add(now, self.ttl.cert_recheck_floor))
    }
}
