//! Client-side rate and quota limiting
//!
//! Mirrors the platform's free-tier limits so calls are rejected locally before
//! they burn remote quota. Every endpoint key has a minimum interval between
//! calls; mutating keys also carry a rolling 24 hour ceiling.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{QuotaError, Result};

/// Default minimum interval for mutating endpoints (seconds)
pub const MUTATING_INTERVAL_SECS: i64 = 60;

/// Default minimum interval for read endpoints (seconds)
pub const READ_INTERVAL_SECS: i64 = 15 * 60;

/// Free tier allows 17 mutating calls per 24 hours
pub const DAILY_CEILING: u32 = 17;

const DAILY_WINDOW_HOURS: i64 = 24;

/// Logical operation used to index rate and quota tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKey {
    CreatePost,
    DeletePost,
    LookupPost,
    SearchPosts,
    UploadMedia,
}

impl EndpointKey {
    pub const ALL: [EndpointKey; 5] = [
        EndpointKey::CreatePost,
        EndpointKey::DeletePost,
        EndpointKey::LookupPost,
        EndpointKey::SearchPosts,
        EndpointKey::UploadMedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKey::CreatePost => "create-post",
            EndpointKey::DeletePost => "delete-post",
            EndpointKey::LookupPost => "lookup-post",
            EndpointKey::SearchPosts => "search-posts",
            EndpointKey::UploadMedia => "upload-media",
        }
    }

    /// Whether the key changes remote state (and therefore has a daily ceiling)
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            EndpointKey::CreatePost | EndpointKey::DeletePost | EndpointKey::UploadMedia
        )
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Limits applied to a single endpoint key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub min_interval: Duration,
    pub daily_ceiling: Option<u32>,
}

/// Per-key limits for the governor
#[derive(Debug, Clone)]
pub struct LimitTable {
    limits: HashMap<EndpointKey, EndpointLimit>,
}

impl LimitTable {
    pub fn new(limits: HashMap<EndpointKey, EndpointLimit>) -> Self {
        Self { limits }
    }

    pub fn get(&self, key: EndpointKey) -> Option<&EndpointLimit> {
        self.limits.get(&key)
    }

    pub fn set(&mut self, key: EndpointKey, limit: EndpointLimit) {
        self.limits.insert(key, limit);
    }
}

impl Default for LimitTable {
    fn default() -> Self {
        let limits = EndpointKey::ALL
            .iter()
            .map(|key| {
                let limit = if key.is_mutating() {
                    EndpointLimit {
                        min_interval: Duration::seconds(MUTATING_INTERVAL_SECS),
                        daily_ceiling: Some(DAILY_CEILING),
                    }
                } else {
                    EndpointLimit {
                        min_interval: Duration::seconds(READ_INTERVAL_SECS),
                        daily_ceiling: None,
                    }
                };
                (*key, limit)
            })
            .collect();
        Self { limits }
    }
}

#[derive(Debug, Clone, Copy)]
struct DailyCounter {
    count: u32,
    resets_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GovernorState {
    last_call: HashMap<EndpointKey, DateTime<Utc>>,
    daily: HashMap<EndpointKey, DailyCounter>,
}

/// In-process rate and quota governor
///
/// All state lives behind a single mutex so the read-then-write of the last
/// call time and the daily counter is atomic. Nothing is persisted; a restart
/// starts every window fresh.
#[derive(Debug)]
pub struct RateGovernor {
    limits: LimitTable,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    /// Create a new governor with the given limits
    pub fn new(limits: LimitTable) -> Self {
        Self {
            limits,
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// Check limits for `key` at the current time and record the call
    pub fn check_and_record(&self, key: EndpointKey) -> Result<()> {
        self.check_and_record_at(key, Utc::now())
    }

    /// Check limits for `key` at `now` and record the call if allowed
    ///
    /// Keys without a configured limit are always allowed, but the call time
    /// is still recorded.
    pub fn check_and_record_at(&self, key: EndpointKey, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let limit = self.limits.get(key).copied();

        if let (Some(limit), Some(last)) = (limit, state.last_call.get(&key)) {
            let elapsed = now - *last;
            if elapsed < limit.min_interval {
                let wait_secs = ceil_div(remaining_ms(limit.min_interval - elapsed), 1000);
                tracing::debug!("{} rate limited, {}s remaining", key, wait_secs);
                return Err(QuotaError::RateLimited { key, wait_secs }.into());
            }
        }

        if let Some(ceiling) = limit.and_then(|l| l.daily_ceiling) {
            if let Some(counter) = state.daily.get(&key) {
                if counter.resets_at <= now {
                    state.daily.remove(&key);
                }
            }

            match state.daily.get_mut(&key) {
                Some(counter) if counter.count >= ceiling => {
                    let hours = ceil_div(remaining_ms(counter.resets_at - now), 3_600_000);
                    tracing::debug!("{} daily ceiling reached, resets in {}h", key, hours);
                    return Err(QuotaError::DailyLimitExceeded { key, hours }.into());
                }
                Some(counter) => counter.count += 1,
                None => {
                    state.daily.insert(
                        key,
                        DailyCounter {
                            count: 1,
                            resets_at: now + Duration::hours(DAILY_WINDOW_HOURS),
                        },
                    );
                }
            }
        }

        state.last_call.insert(key, now);
        Ok(())
    }

    /// Calls counted against the live daily window for `key`
    pub fn daily_count(&self, key: EndpointKey, now: DateTime<Utc>) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .daily
            .get(&key)
            .filter(|c| c.resets_at > now)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(LimitTable::default())
    }
}

fn remaining_ms(remaining: Duration) -> u64 {
    remaining.num_milliseconds().max(1) as u64
}

fn ceil_div(value: u64, divisor: u64) -> u64 {
    value.div_ceil(divisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChirpgateError;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn no_interval_limits(ceiling: u32) -> LimitTable {
        let mut limits = LimitTable::default();
        limits.set(
            EndpointKey::CreatePost,
            EndpointLimit {
                min_interval: Duration::zero(),
                daily_ceiling: Some(ceiling),
            },
        );
        limits
    }

    #[test]
    fn test_allows_first_call() {
        let governor = RateGovernor::default();
        assert!(governor.check_and_record_at(EndpointKey::CreatePost, t0()).is_ok());
    }

    #[test]
    fn test_second_call_within_interval_is_rejected() {
        let governor = RateGovernor::default();
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();

        let result =
            governor.check_and_record_at(EndpointKey::CreatePost, t0() + Duration::seconds(10));
        match result {
            Err(ChirpgateError::Quota(QuotaError::RateLimited { key, wait_secs })) => {
                assert_eq!(key, EndpointKey::CreatePost);
                assert_eq!(wait_secs, 50);
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_time_rounds_up() {
        let governor = RateGovernor::default();
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();

        // 59.999s elapsed leaves 1ms, which must still report a full second
        let result = governor.check_and_record_at(
            EndpointKey::CreatePost,
            t0() + Duration::milliseconds(59_999),
        );
        match result {
            Err(ChirpgateError::Quota(QuotaError::RateLimited { wait_secs, .. })) => {
                assert_eq!(wait_secs, 1);
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }

        let governor = RateGovernor::default();
        governor
            .check_and_record_at(EndpointKey::SearchPosts, t0())
            .unwrap();
        let result = governor.check_and_record_at(
            EndpointKey::SearchPosts,
            t0() + Duration::milliseconds(500),
        );
        match result {
            Err(ChirpgateError::Quota(QuotaError::RateLimited { wait_secs, .. })) => {
                assert_eq!(wait_secs, 900);
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_call_after_interval_is_allowed() {
        let governor = RateGovernor::default();
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();
        assert!(governor
            .check_and_record_at(EndpointKey::CreatePost, t0() + Duration::seconds(60))
            .is_ok());
    }

    #[test]
    fn test_rejected_call_does_not_reset_interval() {
        let governor = RateGovernor::default();
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();
        assert!(governor
            .check_and_record_at(EndpointKey::CreatePost, t0() + Duration::seconds(30))
            .is_err());
        assert!(governor
            .check_and_record_at(EndpointKey::CreatePost, t0() + Duration::seconds(61))
            .is_ok());
    }

    #[test]
    fn test_independent_keys() {
        let governor = RateGovernor::default();
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();
        assert!(governor
            .check_and_record_at(EndpointKey::DeletePost, t0())
            .is_ok());
        assert!(governor
            .check_and_record_at(EndpointKey::SearchPosts, t0())
            .is_ok());
    }

    #[test]
    fn test_daily_ceiling_blocks_next_call() {
        let governor = RateGovernor::new(no_interval_limits(DAILY_CEILING));
        for i in 0..DAILY_CEILING {
            let now = t0() + Duration::minutes(i as i64);
            assert!(
                governor.check_and_record_at(EndpointKey::CreatePost, now).is_ok(),
                "Call {} should be allowed",
                i + 1
            );
        }

        let now = t0() + Duration::hours(1);
        match governor.check_and_record_at(EndpointKey::CreatePost, now) {
            Err(ChirpgateError::Quota(QuotaError::DailyLimitExceeded { key, hours })) => {
                assert_eq!(key, EndpointKey::CreatePost);
                assert_eq!(hours, 23);
            }
            other => panic!("Expected DailyLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_daily_hours_remaining_rounds_up() {
        let governor = RateGovernor::new(no_interval_limits(1));
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();

        let now = t0() + Duration::hours(23) + Duration::minutes(59);
        match governor.check_and_record_at(EndpointKey::CreatePost, now) {
            Err(ChirpgateError::Quota(QuotaError::DailyLimitExceeded { hours, .. })) => {
                assert_eq!(hours, 1);
            }
            other => panic!("Expected DailyLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_daily_window_resets_after_24_hours() {
        let governor = RateGovernor::new(no_interval_limits(2));
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0())
            .unwrap();
        governor
            .check_and_record_at(EndpointKey::CreatePost, t0() + Duration::hours(1))
            .unwrap();
        assert!(governor
            .check_and_record_at(EndpointKey::CreatePost, t0() + Duration::hours(2))
            .is_err());

        let after_window = t0() + Duration::hours(24);
        assert!(governor
            .check_and_record_at(EndpointKey::CreatePost, after_window)
            .is_ok());
        assert_eq!(governor.daily_count(EndpointKey::CreatePost, after_window), 1);
    }

    #[test]
    fn test_read_keys_have_no_daily_ceiling() {
        let mut limits = LimitTable::default();
        limits.set(
            EndpointKey::SearchPosts,
            EndpointLimit {
                min_interval: Duration::zero(),
                daily_ceiling: None,
            },
        );
        let governor = RateGovernor::new(limits);
        for i in 0..50 {
            assert!(governor
                .check_and_record_at(EndpointKey::SearchPosts, t0() + Duration::seconds(i))
                .is_ok());
        }
        assert_eq!(governor.daily_count(EndpointKey::SearchPosts, t0()), 0);
    }

    #[test]
    fn test_unlimited_key_still_records() {
        let governor = RateGovernor::new(LimitTable::new(HashMap::new()));
        for _ in 0..5 {
            assert!(governor
                .check_and_record_at(EndpointKey::UploadMedia, t0())
                .is_ok());
        }
    }

    #[test]
    fn test_default_limits() {
        let limits = LimitTable::default();
        let create = limits.get(EndpointKey::CreatePost).unwrap();
        assert_eq!(create.min_interval, Duration::seconds(60));
        assert_eq!(create.daily_ceiling, Some(17));

        let lookup = limits.get(EndpointKey::LookupPost).unwrap();
        assert_eq!(lookup.min_interval, Duration::minutes(15));
        assert_eq!(lookup.daily_ceiling, None);
    }
}
